//! SQLite schema definition

/// SQL schema for the document catalog
pub const SCHEMA_SQL: &str = r#"
-- Documents: uploaded PDFs and their bibliographic metadata
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    title TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    blacklisted INTEGER NOT NULL DEFAULT 0,
    publication_year INTEGER,
    authors_json TEXT NOT NULL DEFAULT '[]',
    document_type TEXT,
    archive_path TEXT,
    processed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Page texts: derived per-page text for each document
CREATE TABLE IF NOT EXISTS page_texts (
    document_id INTEGER NOT NULL REFERENCES documents(id),
    page INTEGER NOT NULL,
    text TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (document_id, page)
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_documents_processed ON documents(processed, blacklisted);
CREATE INDEX IF NOT EXISTS idx_page_texts_doc ON page_texts(document_id);
"#;

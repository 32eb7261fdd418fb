//! Canonical document catalog using SQLite
//!
//! This module owns the records the vector index is derived from:
//! - Documents (uploaded PDFs with processing flags and bibliographic metadata)
//! - Page texts (derived text per page, used for rebuilds)

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{debug, info};

/// Format a timestamp the way the catalog stores it.
///
/// Fixed precision keeps lexical and chronological order identical, which the
/// staleness check relies on.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    format_timestamp(Utc::now())
}

/// An uploaded document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub title: Option<String>,
    pub processed: bool,
    pub blacklisted: bool,
    pub publication_year: Option<i64>,
    pub authors_json: String,
    pub document_type: Option<String>,
    pub archive_path: Option<String>,
    pub processed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Document {
    /// A new, unprocessed document; the id is assigned on insert
    pub fn new(filename: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: 0,
            filename: filename.into(),
            title: None,
            processed: false,
            blacklisted: false,
            publication_year: None,
            authors_json: "[]".to_string(),
            document_type: None,
            archive_path: None,
            processed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn authors(&self) -> Vec<String> {
        serde_json::from_str(&self.authors_json).unwrap_or_default()
    }

    pub fn set_authors(&mut self, authors: &[String]) {
        self.authors_json = serde_json::to_string(authors).unwrap_or_else(|_| "[]".to_string());
    }

    pub fn first_author(&self) -> Option<String> {
        self.authors().into_iter().next()
    }
}

/// Derived text of one page
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PageText {
    pub document_id: i64,
    pub page: i64,
    pub text: String,
    pub updated_at: String,
}

/// A partial edit of a document's bibliographic metadata.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataEdit {
    pub publication_year: Option<i64>,
    pub authors: Option<Vec<String>>,
    pub document_type: Option<String>,
    pub title: Option<String>,
}

impl MetadataEdit {
    pub fn is_empty(&self) -> bool {
        self.publication_year.is_none()
            && self.authors.is_none()
            && self.document_type.is_none()
            && self.title.is_none()
    }
}

/// Catalog-wide statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogStats {
    pub document_count: i64,
    pub processed_count: i64,
    pub blacklisted_count: i64,
    pub page_count: i64,
}

/// Document catalog handle
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Connect to the catalog configured in `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Open (creating if needed) the catalog at `db_path` and ensure its schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite catalog at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.init_schema().await?;
        Ok(catalog)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        debug!("Initializing catalog schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // ===== Document Operations =====

    /// Insert a document and return its assigned id
    pub async fn insert_document(&self, doc: &Document) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (filename, title, processed, blacklisted, publication_year,
                authors_json, document_type, archive_path, processed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.filename)
        .bind(&doc.title)
        .bind(doc.processed)
        .bind(doc.blacklisted)
        .bind(doc.publication_year)
        .bind(&doc.authors_json)
        .bind(&doc.document_type)
        .bind(&doc.archive_path)
        .bind(&doc.processed_at)
        .bind(&doc.created_at)
        .bind(&doc.updated_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(document_id = id, filename = %doc.filename, "Registered document");
        Ok(id)
    }

    /// Get document by ID
    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// Record a successful processing pass at `processed_at`
    pub async fn mark_processed(&self, id: i64, processed_at: DateTime<Utc>) -> Result<()> {
        let stamp = format_timestamp(processed_at);
        sqlx::query(
            "UPDATE documents SET processed = 1, processed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&stamp)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Exclude (or re-include) a document from indexing
    pub async fn set_blacklisted(&self, id: i64, blacklisted: bool) -> Result<()> {
        sqlx::query("UPDATE documents SET blacklisted = ?, updated_at = ? WHERE id = ?")
            .bind(blacklisted)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record where the document's PDF is archived
    pub async fn set_archive_path(&self, id: i64, archive_path: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE documents SET archive_path = ?, updated_at = ? WHERE id = ?")
            .bind(archive_path)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Apply a metadata edit and return the updated document
    pub async fn update_document_metadata(&self, id: i64, edit: &MetadataEdit) -> Result<Document> {
        let mut doc = self
            .get_document(id)
            .await?
            .ok_or(Error::DocumentNotFound(id))?;

        if let Some(year) = edit.publication_year {
            doc.publication_year = Some(year);
        }
        if let Some(authors) = &edit.authors {
            doc.set_authors(authors);
        }
        if let Some(document_type) = &edit.document_type {
            doc.document_type = Some(document_type.clone());
        }
        if let Some(title) = &edit.title {
            doc.title = Some(title.clone());
        }
        doc.updated_at = now();

        sqlx::query(
            r#"
            UPDATE documents
            SET publication_year = ?, authors_json = ?, document_type = ?, title = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(doc.publication_year)
        .bind(&doc.authors_json)
        .bind(&doc.document_type)
        .bind(&doc.title)
        .bind(&doc.updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(doc)
    }

    /// Documents eligible for an index rebuild.
    ///
    /// Eligible means processed, not blacklisted, and no page text updated after
    /// the last successful processing pass.
    pub async fn list_rebuild_candidates(&self) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            r#"
            SELECT d.* FROM documents d
            WHERE d.processed = 1
              AND d.blacklisted = 0
              AND NOT EXISTS (
                  SELECT 1 FROM page_texts p
                  WHERE p.document_id = d.id
                    AND d.processed_at IS NOT NULL
                    AND p.updated_at > d.processed_at
              )
            ORDER BY d.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    // ===== Page Text Operations =====

    /// Insert or replace the derived text of one page
    pub async fn upsert_page_text(
        &self,
        document_id: i64,
        page: i64,
        text: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO page_texts (document_id, page, text, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id, page) DO UPDATE SET
                text = excluded.text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document_id)
        .bind(page)
        .bind(text)
        .bind(format_timestamp(updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Page texts of a document in page order
    pub async fn get_page_texts(&self, document_id: i64) -> Result<Vec<PageText>> {
        let pages = sqlx::query_as::<_, PageText>(
            "SELECT * FROM page_texts WHERE document_id = ? ORDER BY page",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    /// Catalog statistics
    pub async fn get_stats(&self) -> Result<CatalogStats> {
        let (document_count, processed_count, blacklisted_count): (i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(processed), 0),
                       COALESCE(SUM(blacklisted), 0)
                FROM documents
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        let (page_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM page_texts")
            .fetch_one(&self.pool)
            .await?;

        Ok(CatalogStats {
            document_count,
            processed_count,
            blacklisted_count,
            page_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup_test_catalog() -> (Catalog, TempDir) {
        let tmp = TempDir::new().unwrap();
        let catalog = Catalog::open(&tmp.path().join("catalog.db")).await.unwrap();
        (catalog, tmp)
    }

    #[tokio::test]
    async fn test_document_roundtrip() {
        let (catalog, _tmp) = setup_test_catalog().await;

        let mut doc = Document::new("paper.pdf");
        doc.set_authors(&["Jane Doe".to_string(), "John Roe".to_string()]);
        doc.publication_year = Some(2021);
        let id = catalog.insert_document(&doc).await.unwrap();

        let loaded = catalog.get_document(id).await.unwrap().unwrap();
        assert_eq!(loaded.filename, "paper.pdf");
        assert_eq!(loaded.authors(), vec!["Jane Doe", "John Roe"]);
        assert_eq!(loaded.first_author().as_deref(), Some("Jane Doe"));
        assert!(!loaded.processed);

        assert!(catalog.get_document(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_edit_keeps_untouched_fields() {
        let (catalog, _tmp) = setup_test_catalog().await;

        let mut doc = Document::new("report.pdf");
        doc.publication_year = Some(2019);
        doc.document_type = Some("paper".to_string());
        let id = catalog.insert_document(&doc).await.unwrap();

        let edit = MetadataEdit {
            document_type: Some("report".to_string()),
            ..Default::default()
        };
        let updated = catalog.update_document_metadata(id, &edit).await.unwrap();
        assert_eq!(updated.document_type.as_deref(), Some("report"));
        assert_eq!(updated.publication_year, Some(2019));

        let missing = catalog.update_document_metadata(9999, &edit).await;
        assert!(matches!(missing, Err(Error::DocumentNotFound(9999))));
    }

    #[tokio::test]
    async fn test_rebuild_candidates_respect_flags_and_staleness() {
        let (catalog, _tmp) = setup_test_catalog().await;
        let processed_at = Utc::now();

        let current = catalog.insert_document(&Document::new("current.pdf")).await.unwrap();
        catalog
            .upsert_page_text(current, 1, "fresh", processed_at - Duration::seconds(10))
            .await
            .unwrap();
        catalog.mark_processed(current, processed_at).await.unwrap();

        let stale = catalog.insert_document(&Document::new("stale.pdf")).await.unwrap();
        catalog.mark_processed(stale, processed_at).await.unwrap();
        catalog
            .upsert_page_text(stale, 1, "rewritten", processed_at + Duration::seconds(10))
            .await
            .unwrap();

        let banned = catalog.insert_document(&Document::new("banned.pdf")).await.unwrap();
        catalog.mark_processed(banned, processed_at).await.unwrap();
        catalog.set_blacklisted(banned, true).await.unwrap();

        catalog.insert_document(&Document::new("pending.pdf")).await.unwrap();

        let candidates = catalog.list_rebuild_candidates().await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![current]);
    }

    #[tokio::test]
    async fn test_page_texts_ordered_and_upserted() {
        let (catalog, _tmp) = setup_test_catalog().await;
        let id = catalog.insert_document(&Document::new("a.pdf")).await.unwrap();

        catalog.upsert_page_text(id, 2, "two", Utc::now()).await.unwrap();
        catalog.upsert_page_text(id, 1, "one", Utc::now()).await.unwrap();
        catalog.upsert_page_text(id, 2, "two again", Utc::now()).await.unwrap();

        let pages = catalog.get_page_texts(id).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[1].text, "two again");

        let stats = catalog.get_stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.page_count, 2);
    }
}

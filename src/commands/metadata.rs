//! Metadata edit command implementation
//!
//! An edit touches three places: the catalog row, every indexed chunk of the
//! document, and the archive filename.

use crate::archive::rename_archive_for_document;
use crate::catalog::{Catalog, Document, MetadataEdit};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{check_publication_year, DocumentType};
use crate::index::VectorBackend;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of a metadata edit
#[derive(Debug, Clone, Serialize)]
pub struct MetadataUpdate {
    pub document: Document,
    pub index_synced: bool,
    pub archive_renamed: bool,
}

/// Apply `edit` to document `id` and propagate it to the index and archive
pub async fn cmd_set_metadata(
    config: &Config,
    catalog: &Catalog,
    backend: &dyn VectorBackend,
    id: i64,
    mut edit: MetadataEdit,
) -> Result<MetadataUpdate> {
    if edit.is_empty() {
        return Err(Error::Other(
            "Nothing to update: give at least one of --year, --author, --document-type, --title"
                .to_string(),
        ));
    }

    if let Some(year) = edit.publication_year {
        check_publication_year(year).map_err(Error::Other)?;
    }
    if let Some(document_type) = &edit.document_type {
        let parsed: DocumentType = document_type.parse().map_err(Error::Other)?;
        edit.document_type = Some(parsed.to_string());
    }

    info!(doc_id = id, "Updating document metadata");
    let mut document = catalog.update_document_metadata(id, &edit).await?;

    let authors = document.authors();
    let index_synced = backend
        .update_document_metadata(
            id,
            document.publication_year,
            Some(&authors),
            document.document_type.as_deref(),
        )
        .await;
    if !index_synced {
        warn!(doc_id = id, "Vector index metadata not updated; chunks keep their old values");
    }

    let renamed = rename_archive_for_document(
        &config.archive_dir(),
        document.archive_path.as_deref().map(Path::new),
        &document.filename,
        document.first_author().as_deref(),
        document.publication_year,
        document.title.as_deref(),
    );

    let archive_renamed = match renamed {
        Ok(Some(new_path)) => {
            let new_path = new_path.display().to_string();
            catalog.set_archive_path(id, Some(&new_path)).await?;
            document.archive_path = Some(new_path);
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!(doc_id = id, error = %e, "Failed to rename archive file");
            false
        }
    };

    Ok(MetadataUpdate {
        document,
        index_synced,
        archive_renamed,
    })
}

/// Print metadata update to console
pub fn print_metadata_update(update: &MetadataUpdate) {
    let doc = &update.document;
    println!("\n📝 Updated document {}\n", doc.id);
    println!("Filename: {}", doc.filename);
    if let Some(title) = &doc.title {
        println!("Title: {}", title);
    }

    let authors = doc.authors();
    if !authors.is_empty() {
        println!("Authors: {}", authors.join("; "));
    }
    if let Some(year) = doc.publication_year {
        println!("Year: {}", year);
    }
    if let Some(document_type) = &doc.document_type {
        println!("Type: {}", document_type);
    }

    println!(
        "\nVector index: {}",
        if update.index_synced {
            "✓ synchronized"
        } else {
            "✗ not synchronized"
        }
    );
    if update.archive_renamed {
        if let Some(path) = &doc.archive_path {
            println!("Archive: renamed to {}", path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::testing::HashEmbedder;
    use crate::embed::Embedder;
    use crate::index::lance::LanceBackend;
    use crate::index::{ChunkMetadata, Filter};
    use std::sync::Arc;
    use tempfile::TempDir;

    const DIM: usize = 8;

    struct Fixture {
        _tmp: TempDir,
        config: Config,
        catalog: Catalog,
        backend: Arc<LanceBackend>,
        embedder: HashEmbedder,
    }

    async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.archive.dir = Some(tmp.path().join("archive"));
        std::fs::create_dir_all(tmp.path().join("archive")).unwrap();

        let catalog = Catalog::open(&tmp.path().join("catalog.db")).await.unwrap();
        let backend = LanceBackend::open(&tmp.path().join("lance"), "pdf_documents", DIM, None)
            .await
            .unwrap();

        Fixture {
            _tmp: tmp,
            config,
            catalog,
            backend,
            embedder: HashEmbedder { dimension: DIM },
        }
    }

    async fn insert_indexed_document(fx: &Fixture) -> i64 {
        let archive_path = fx.config.archive_dir().join("upload.pdf");
        std::fs::write(&archive_path, b"%PDF-1.4").unwrap();

        let mut doc = Document::new("upload.pdf");
        doc.archive_path = Some(archive_path.display().to_string());
        doc.document_type = Some("paper".to_string());
        let id = fx.catalog.insert_document(&doc).await.unwrap();

        let chunks = vec!["first chunk".to_string(), "second chunk".to_string()];
        let embeddings = fx.embedder.embed(chunks.clone()).await.unwrap();
        let metadatas: Vec<ChunkMetadata> = (0..2)
            .map(|i| ChunkMetadata {
                pdf_id: Some(id),
                chunk_id: Some(format!("m_{}", i)),
                source: Some("upload.pdf".to_string()),
                document_type: Some("paper".to_string()),
                ..Default::default()
            })
            .collect();
        assert!(fx.backend.add_documents(&chunks, &embeddings, &metadatas).await);
        id
    }

    #[tokio::test]
    async fn test_edit_updates_catalog_index_and_archive() {
        let fx = fixture().await;
        let id = insert_indexed_document(&fx).await;

        let edit = MetadataEdit {
            publication_year: Some(2023),
            authors: Some(vec!["Smith, John".to_string()]),
            document_type: Some("Report".to_string()),
            title: Some("Test Title".to_string()),
        };
        let update = cmd_set_metadata(&fx.config, &fx.catalog, &*fx.backend, id, edit)
            .await
            .unwrap();

        assert!(update.index_synced);
        assert!(update.archive_renamed);
        assert_eq!(update.document.document_type.as_deref(), Some("report"));

        let expected = fx.config.archive_dir().join("Smith_2023_Test_Title.pdf");
        assert!(expected.exists());
        let stored = fx.catalog.get_document(id).await.unwrap().unwrap();
        assert_eq!(stored.archive_path, Some(expected.display().to_string()));

        let query = fx.embedder.vector_for("first chunk");
        let reports = fx
            .backend
            .search(&query, 10, Some(&Filter::new().eq("document_type", "report")), 0)
            .await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports.metadatas[0]["publication_year"], 2023);
    }

    #[tokio::test]
    async fn test_edit_unknown_document() {
        let fx = fixture().await;
        let edit = MetadataEdit {
            publication_year: Some(2020),
            ..Default::default()
        };

        let err = cmd_set_metadata(&fx.config, &fx.catalog, &*fx.backend, 404, edit)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(404)));
    }

    #[tokio::test]
    async fn test_empty_or_invalid_edit_is_rejected() {
        let fx = fixture().await;
        let id = insert_indexed_document(&fx).await;

        assert!(cmd_set_metadata(&fx.config, &fx.catalog, &*fx.backend, id, MetadataEdit::default())
            .await
            .is_err());

        let edit = MetadataEdit {
            document_type: Some("thesis".to_string()),
            ..Default::default()
        };
        assert!(cmd_set_metadata(&fx.config, &fx.catalog, &*fx.backend, id, edit)
            .await
            .is_err());

        let stored = fx.catalog.get_document(id).await.unwrap().unwrap();
        assert_eq!(stored.document_type.as_deref(), Some("paper"));
    }

    #[tokio::test]
    async fn test_out_of_range_year_is_rejected() {
        let fx = fixture().await;
        let id = insert_indexed_document(&fx).await;
        let before = fx.catalog.get_document(id).await.unwrap().unwrap();

        for year in [1800, 2200] {
            let edit = MetadataEdit {
                publication_year: Some(year),
                title: Some("Never Written".to_string()),
                ..Default::default()
            };
            assert!(cmd_set_metadata(&fx.config, &fx.catalog, &*fx.backend, id, edit)
                .await
                .is_err());
        }

        let stored = fx.catalog.get_document(id).await.unwrap().unwrap();
        assert_eq!(stored.publication_year, before.publication_year);
        assert_eq!(stored.title, before.title);

        let query = fx.embedder.vector_for("first chunk");
        let moved = fx
            .backend
            .search(&query, 10, Some(&Filter::new().eq("publication_year", 1800i64)), 0)
            .await;
        assert!(moved.is_empty());
    }
}

//! Status command implementation

use crate::catalog::{Catalog, CatalogStats};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::index::VectorBackend;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub backend: String,
    pub index_location: String,
    pub table_name: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub indexed_chunks: usize,
    pub archive_dir: String,
    pub catalog: CatalogStats,
}

/// Get system status
pub async fn cmd_status(
    config: &Config,
    catalog: &Catalog,
    backend: &dyn VectorBackend,
) -> Result<StatusInfo> {
    info!("Getting status");

    let catalog_stats = catalog.get_stats().await?;
    let indexed_chunks = backend.get_document_count().await;

    let index_location = match config.backend_kind()? {
        BackendKind::Lance => config.index_path().display().to_string(),
        BackendKind::Qdrant => config.index.qdrant_url.clone(),
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        backend: backend.name().to_string(),
        index_location,
        table_name: config.index.table_name.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_dimension: config.embedding.resolved_dimension(),
        indexed_chunks,
        archive_dir: config.archive_dir().display().to_string(),
        catalog: catalog_stats,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 pdfrag Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Catalog: {}", status.db_path);
    println!("Archive: {}", status.archive_dir);
    println!("\nVector index:");
    println!("  Backend: {}", status.backend);
    println!("  Location: {}", status.index_location);
    println!("  Table: {}", status.table_name);

    let index_status = if status.indexed_chunks > 0 {
        "✓ Populated"
    } else if status.catalog.processed_count > 0 {
        "⚠ Empty (run 'pdfrag rebuild' to index processed documents)"
    } else {
        "⚠ Empty"
    };
    println!("  Status: {}", index_status);
    println!("  Chunks: {}", status.indexed_chunks);
    println!(
        "\nEmbedding Model: {} ({} dimensions)",
        status.embedding_model, status.embedding_dimension
    );
    println!("\nCatalog Stats:");
    println!("  Documents: {}", status.catalog.document_count);
    println!("  Processed: {}", status.catalog.processed_count);
    println!("  Blacklisted: {}", status.catalog.blacklisted_count);
    println!("  Pages: {}", status.catalog.page_count);
}

//! Rebuild command implementation

use crate::error::Result;
use crate::index::VectorBackend;
use crate::rebuild::{RebuildStats, Reconciler};
use tracing::info;

/// Run one reconciliation pass and wait for it to finish
pub async fn cmd_rebuild(reconciler: &Reconciler, backend: &dyn VectorBackend) -> Result<RebuildStats> {
    info!("Rebuilding {} vector index", backend.name());

    // A rebuild scheduled when the index was opened takes precedence.
    backend.wait_for_rebuild().await;

    let stats = reconciler.run(backend).await?;
    info!(
        documents = stats.documents_indexed,
        chunks = stats.chunks_indexed,
        errors = stats.errors,
        "Rebuild finished"
    );
    Ok(stats)
}

/// Print rebuild statistics to console
pub fn print_rebuild_stats(stats: &RebuildStats) {
    println!("\n🔄 Rebuild\n");

    if stats.skipped_populated {
        println!("Index already populated; nothing to do.");
        println!("Use 'pdfrag reset' first to rebuild from scratch.");
        return;
    }

    println!("Documents scanned: {}", stats.documents_scanned);
    println!("Documents indexed: {}", stats.documents_indexed);
    println!("Documents without text: {}", stats.documents_skipped);
    println!("Chunks indexed: {}", stats.chunks_indexed);
    if stats.errors > 0 {
        println!("⚠ Errors: {} (see log for details)", stats.errors);
    }
}

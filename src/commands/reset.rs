//! Reset command implementation

use crate::error::{Error, Result};
use crate::index::VectorBackend;
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of a reset
#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub backend: String,
    pub chunks_before: usize,
    pub chunks_after: usize,
}

/// Drop the vector index and wait for the rebuild it schedules
pub async fn cmd_reset(backend: &dyn VectorBackend) -> Result<ResetOutcome> {
    let chunks_before = backend.get_document_count().await;
    warn!(chunks = chunks_before, "Resetting {} vector index", backend.name());

    if !backend.reset().await {
        return Err(Error::Other(format!(
            "Failed to reset {} vector index",
            backend.name()
        )));
    }

    backend.wait_for_rebuild().await;
    let chunks_after = backend.get_document_count().await;
    info!(chunks = chunks_after, "Reset complete");

    Ok(ResetOutcome {
        backend: backend.name().to_string(),
        chunks_before,
        chunks_after,
    })
}

/// Print reset outcome to console
pub fn print_reset(outcome: &ResetOutcome) {
    println!("\n🗑  Reset {} index\n", outcome.backend);
    println!("Chunks removed: {}", outcome.chunks_before);
    println!("Chunks after rebuild: {}", outcome.chunks_after);
}

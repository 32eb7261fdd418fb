//! CLI commands implementation

pub mod archive_name;
pub mod metadata;
pub mod query;
pub mod rebuild;
pub mod reset;
pub mod status;

pub use archive_name::*;
pub use metadata::*;
pub use query::*;
pub use rebuild::*;
pub use reset::*;
pub use status::*;

use crate::catalog::Catalog;
use crate::config::{BackendKind, Config};
use crate::embed::SharedEmbedder;
use crate::error::Result;
use crate::index::lance::LanceBackend;
use crate::index::qdrant::QdrantBackend;
use crate::index::VectorBackend;
use crate::rebuild::Reconciler;
use std::sync::Arc;
use tracing::debug;

/// Open the configured vector index.
///
/// With a reconciler, an absent or empty index schedules a background rebuild.
pub async fn open_backend(
    config: &Config,
    reconciler: Option<Arc<Reconciler>>,
) -> Result<Arc<dyn VectorBackend>> {
    let backend: Arc<dyn VectorBackend> = match config.backend_kind()? {
        BackendKind::Lance => LanceBackend::from_config(config, reconciler).await?,
        BackendKind::Qdrant => QdrantBackend::from_config(config, reconciler).await?,
    };
    debug!("Opened {} vector index", backend.name());
    Ok(backend)
}

/// Handles shared by the commands
pub struct Services {
    pub catalog: Catalog,
    pub embedder: Arc<SharedEmbedder>,
    pub reconciler: Arc<Reconciler>,
    pub backend: Arc<dyn VectorBackend>,
}

impl Services {
    /// Open catalog, embedder and index.
    ///
    /// `auto_rebuild` wires the reconciler into the index so that lifecycle
    /// transitions to an empty index trigger a rebuild.
    pub async fn open(config: &Config, auto_rebuild: bool) -> Result<Self> {
        let catalog = Catalog::connect(config).await?;
        let embedder = Arc::new(SharedEmbedder::from_config(&config.embedding));
        let reconciler = Arc::new(Reconciler::from_config(
            config,
            catalog.clone(),
            embedder.clone(),
        ));

        let attached = auto_rebuild.then(|| reconciler.clone());
        let backend = open_backend(config, attached).await?;

        Ok(Self {
            catalog,
            embedder,
            reconciler,
            backend,
        })
    }
}

//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - A process-wide, lazily initialised shared instance
//! - Batch processing for efficiency

#[cfg(feature = "local-embed")]
mod fastembed_impl;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; the output is parallel to the input
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    #[cfg(feature = "local-embed")]
    {
        let embedder = FastEmbedder::new(config)?;
        Ok(Arc::new(embedder))
    }

    #[cfg(not(feature = "local-embed"))]
    {
        Err(Error::Embedding(format!(
            "No local embedding backend compiled in for model '{}'; enable the `local-embed` feature",
            config.model
        )))
    }
}

type EmbedderFactory = Arc<dyn Fn() -> Result<Arc<dyn Embedder>> + Send + Sync>;

/// Process-wide embedding provider.
///
/// The model is loaded on first use and shared afterwards; concurrent first
/// callers wait on the same initialisation.
pub struct SharedEmbedder {
    cell: OnceCell<Arc<dyn Embedder>>,
    factory: EmbedderFactory,
}

impl SharedEmbedder {
    /// Lazily build the embedder described by `config`
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let config = config.clone();
        Self::with_factory(move || create_embedder(&config))
    }

    /// Lazily build the embedder with `factory`
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Arc::new(factory),
        }
    }

    /// Wrap an already loaded embedder
    pub fn preloaded(embedder: Arc<dyn Embedder>) -> Self {
        let fallback = Arc::clone(&embedder);
        Self {
            cell: OnceCell::from(embedder),
            factory: Arc::new(move || Ok(Arc::clone(&fallback))),
        }
    }

    /// Whether the model has been loaded
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Get the embedder, loading it on first call
    pub async fn get(&self) -> Result<Arc<dyn Embedder>> {
        let embedder = self
            .cell
            .get_or_try_init(|| async {
                let factory = Arc::clone(&self.factory);
                let embedder = tokio::task::spawn_blocking(move || factory())
                    .await
                    .map_err(|e| Error::Embedding(format!("Task join error: {}", e)))??;
                info!(
                    model = embedder.model_name(),
                    dimension = embedder.dimension(),
                    "Embedding provider ready"
                );
                Ok::<_, Error>(embedder)
            })
            .await?;
        Ok(Arc::clone(embedder))
    }
}

/// Helper to embed in batches
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let batch_texts: Vec<String> = chunk.to_vec();
        let expected = batch_texts.len();
        let embeddings = embedder.embed(batch_texts).await?;
        if embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "Embedder returned {} vectors for {} texts",
                embeddings.len(),
                expected
            )));
        }
        all_embeddings.extend(embeddings);
    }

    Ok(all_embeddings)
}


#[cfg(test)]
mod tests {
    use super::testing::HashEmbedder;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_batch_splitting() {
        let texts: Vec<String> = (0..10).map(|i| format!("text {}", i)).collect();
        let chunks: Vec<_> = texts.chunks(3).collect();

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[3].len(), 1);
    }

    #[tokio::test]
    async fn test_embed_in_batches_preserves_order() {
        let embedder = HashEmbedder { dimension: 8 };
        let texts: Vec<String> = (0..7).map(|i| format!("text {}", i)).collect();

        let vectors = embed_in_batches(&embedder, texts.clone(), 3).await.unwrap();
        assert_eq!(vectors.len(), 7);
        assert_eq!(vectors[5], embedder.vector_for(&texts[5]));
    }

    #[tokio::test]
    async fn test_shared_embedder_initialises_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let shared = Arc::new(SharedEmbedder::with_factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashEmbedder { dimension: 4 }) as Arc<dyn Embedder>)
        }));
        assert!(!shared.is_loaded());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = Arc::clone(&shared);
            handles.push(tokio::spawn(async move { shared.get().await.map(|e| e.dimension()) }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 4);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(shared.is_loaded());
    }

    #[tokio::test]
    async fn test_shared_embedder_failure_is_retried_on_next_call() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let shared = SharedEmbedder::with_factory(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Embedding("model download failed".to_string()))
            } else {
                Ok(Arc::new(HashEmbedder { dimension: 4 }) as Arc<dyn Embedder>)
            }
        });

        assert!(shared.get().await.is_err());
        assert!(shared.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

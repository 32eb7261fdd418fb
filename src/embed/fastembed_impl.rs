//! FastEmbed implementation for local embeddings

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// FastEmbed-based embedder
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

/// Map a configured model name to the fastembed model enum
pub fn model_for_name(name: &str) -> EmbeddingModel {
    match name {
        "sentence-transformers/all-MiniLM-L6-v2" | "all-MiniLM-L6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "BAAI/bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
        _ => {
            debug!("Unknown model '{}', using default AllMiniLML6V2", name);
            EmbeddingModel::AllMiniLML6V2
        }
    }
}

impl FastEmbedder {
    /// Create a new FastEmbed embedder.
    ///
    /// Loading is tiered: the configured device first, then fastembed's
    /// default execution provider. Only when both fail is the error returned.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        info!(
            model = %config.model,
            device = %config.device,
            "Initializing FastEmbed"
        );

        let model_enum = model_for_name(&config.model);

        let model = match load_on_device(model_enum.clone(), config) {
            Ok(model) => model,
            Err(e) => {
                warn!(
                    device = %config.device,
                    error = %e,
                    "Embedding model failed on preferred device; retrying with default provider"
                );
                load_default(model_enum, config).map_err(|final_err| {
                    error!(error = %final_err, "Embedding model initialization failed on all attempts");
                    final_err
                })?
            }
        };

        info!("FastEmbed model loaded successfully");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: config.model.clone(),
            dimension: config.resolved_dimension(),
        })
    }
}

fn base_options(model: EmbeddingModel, config: &EmbeddingConfig) -> InitOptions {
    let options = InitOptions::new(model).with_show_download_progress(true);
    match &config.cache_dir {
        Some(dir) => options.with_cache_dir(dir.clone()),
        None => options,
    }
}

fn load_on_device(model: EmbeddingModel, config: &EmbeddingConfig) -> Result<TextEmbedding> {
    let device = config.device.trim().to_lowercase();
    let options = match device.as_str() {
        "" | "cpu" => base_options(model, config),
        other => device_options(base_options(model, config), other)?,
    };

    TextEmbedding::try_new(options)
        .map_err(|e| Error::Embedding(format!("Failed to initialize model on '{}': {}", device, e)))
}

fn load_default(model: EmbeddingModel, config: &EmbeddingConfig) -> Result<TextEmbedding> {
    TextEmbedding::try_new(base_options(model, config))
        .map_err(|e| Error::Embedding(format!("Failed to initialize model: {}", e)))
}

#[cfg(feature = "cuda")]
fn device_options(options: InitOptions, device: &str) -> Result<InitOptions> {
    use ort::execution_providers::CUDAExecutionProvider;

    if device.starts_with("cuda") || device.starts_with("gpu") {
        Ok(options.with_execution_providers(vec![CUDAExecutionProvider::default()
            .build()
            .error_on_failure()]))
    } else {
        Err(Error::Embedding(format!("Unsupported embedding device '{}'", device)))
    }
}

#[cfg(not(feature = "cuda"))]
fn device_options(_options: InitOptions, device: &str) -> Result<InitOptions> {
    Err(Error::Embedding(format!(
        "Embedding device '{}' requires building with the `cuda` feature",
        device
    )))
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts", texts.len());

        // FastEmbed is synchronous, so we wrap in blocking task
        let model = self.model.clone();
        let embeddings = tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            model.embed(texts, None)
        })
        .await
        .map_err(|e| Error::Embedding(format!("Task join error: {}", e)))?
        .map_err(|e| Error::Embedding(format!("Embedding failed: {}", e)))?;

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::embedding_dimension_for_model;

    #[test]
    fn test_model_dimensions() {
        assert_eq!(
            embedding_dimension_for_model("sentence-transformers/all-MiniLM-L6-v2"),
            Some(384)
        );
        assert_eq!(
            embedding_dimension_for_model("BAAI/bge-base-en-v1.5"),
            Some(768)
        );
        assert_eq!(embedding_dimension_for_model("unknown-model"), None);
    }

    #[test]
    fn test_model_mapping() {
        assert!(matches!(
            model_for_name("all-MiniLM-L6-v2"),
            EmbeddingModel::AllMiniLML6V2
        ));
        assert!(matches!(
            model_for_name("BAAI/bge-small-en-v1.5"),
            EmbeddingModel::BGESmallENV15
        ));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_gpu_device_without_cuda_feature_is_rejected() {
        let options = base_options(EmbeddingModel::AllMiniLML6V2, &EmbeddingConfig::default());
        assert!(device_options(options, "cuda").is_err());
    }

    // Integration test - requires model download
    #[tokio::test]
    #[ignore] // Run manually with: cargo test -- --ignored
    async fn test_fastembed_falls_back_from_unknown_device() {
        let config = EmbeddingConfig {
            device: "tpu".to_string(),
            ..EmbeddingConfig::default()
        };

        let embedder = FastEmbedder::new(&config).unwrap();
        let embeddings = embedder
            .embed(vec!["Hello world".to_string(), "Test embedding".to_string()])
            .await
            .unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
    }
}

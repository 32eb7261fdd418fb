//! Configuration management for pdfrag
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Archive configuration
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Query configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Which vector index implementation backs the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Lance,
    Qdrant,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "lance" | "lancedb" => Ok(Self::Lance),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(Error::Config(format!(
                "Unsupported index backend '{}'; expected 'lance' or 'qdrant'",
                value
            ))),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Backend kind ("lance" or "qdrant")
    #[serde(default = "default_index_backend")]
    pub backend: String,

    /// Directory holding the LanceDB tables (defaults to `<base>/lance_db`)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Table (or collection) name
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Schedule a rebuild from the catalog when the index starts out empty
    #[serde(default = "default_rebuild_on_start")]
    pub rebuild_on_start: bool,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Preferred inference device ("cpu", "cuda", ...)
    #[serde(default = "default_embedding_device")]
    pub device: String,

    /// Model cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

/// Lookup the expected embedding dimension for a known model
pub fn embedding_dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "sentence-transformers/all-MiniLM-L6-v2" | "all-MiniLM-L6-v2" => Some(384),
        "BAAI/bge-small-en-v1.5" => Some(384),
        "BAAI/bge-base-en-v1.5" => Some(768),
        "BAAI/bge-large-en-v1.5" => Some(1024),
        _ => None,
    }
}

impl EmbeddingConfig {
    /// Resolve the effective embedding dimension based on the configured model
    pub fn resolved_dimension(&self) -> usize {
        if let Some(expected) = embedding_dimension_for_model(&self.model) {
            if expected != self.dimension {
                warn!(
                    "Embedding dimension {} does not match model '{}' ({}); using {}",
                    self.dimension, self.model, expected, expected
                );
            }
            expected
        } else {
            self.dimension
        }
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,

    /// Overlap characters between chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap_chars: usize,
}

/// Archive configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive directory (defaults to `PDF_RAG_ARCHIVE_DIR`, then `<base>/archive`)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Default number of results
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,

    /// Maximum results per page
    #[serde(default = "default_query_max_limit")]
    pub max_limit: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for pdfrag data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the SQLite document catalog
    pub db_file: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            path: None,
            table_name: default_table_name(),
            qdrant_url: default_qdrant_url(),
            rebuild_on_start: default_rebuild_on_start(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            device: default_embedding_device(),
            cache_dir: None,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_max_chars(),
            overlap_chars: default_chunk_overlap(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
            max_limit: default_query_max_limit(),
        }
    }
}

impl Config {
    /// Get the default base directory for pdfrag (~/.pdfrag)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pdfrag")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("catalog.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("catalog.db"),
            base_dir: base,
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Let `QDRANT_URL` and `PDFRAG_EMBEDDING_DEVICE` override file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("QDRANT_URL") {
            debug!("Qdrant URL overridden by QDRANT_URL");
            self.index.qdrant_url = url;
        }
        if let Some(device) = lookup("PDFRAG_EMBEDDING_DEVICE") {
            debug!("Embedding device overridden by PDFRAG_EMBEDDING_DEVICE");
            self.embedding.device = device;
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Parsed backend kind
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.index.backend.parse()
    }

    /// Directory holding the LanceDB tables
    pub fn index_path(&self) -> PathBuf {
        self.index
            .path
            .clone()
            .unwrap_or_else(|| self.paths.base_dir.join("lance_db"))
    }

    /// Directory holding archived PDFs
    pub fn archive_dir(&self) -> PathBuf {
        if let Some(dir) = &self.archive.dir {
            return dir.clone();
        }
        std::env::var("PDF_RAG_ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.paths.base_dir.join("archive"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.backend_kind()?;

        if self.chunk.max_chars == 0 {
            return Err(Error::Config("chunk.max_chars must be positive".to_string()));
        }

        if self.chunk.overlap_chars >= self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.overlap_chars must be < chunk.max_chars".to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.query.default_limit > self.query.max_limit {
            return Err(Error::Config(
                "query.default_limit must be <= query.max_limit".to_string(),
            ));
        }

        Ok(())
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CinematchError, Result};

/// Top-level configuration for the CineMatch service.
///
/// Loaded from `~/.cinematch/config.toml` by default. Every section falls
/// back to its defaults when absent, so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CinematchConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl CinematchConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CinematchConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CinematchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(CinematchError::Config(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        if self.embedding.crop == 0 || self.embedding.crop > self.embedding.resize {
            return Err(CinematchError::Config(format!(
                "embedding.crop ({}) must be in 1..=embedding.resize ({})",
                self.embedding.crop, self.embedding.resize
            )));
        }
        if self.ingest.batch_size == 0 {
            return Err(CinematchError::Config(
                "ingest.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            return Err(CinematchError::Config(format!(
                "search.default_limit ({}) must be in 1..=search.max_limit ({})",
                self.search.default_limit, self.search.max_limit
            )));
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP API port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.cinematch/data".to_string(),
            log_level: "info".to_string(),
            port: 5000,
        }
    }
}

/// Catalog storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name of the document collection holding catalog items.
    pub collection: String,
    /// Shard-routing field registered for the collection at startup.
    /// `None` leaves the collection unsharded.
    pub shard_key: Option<String>,
    /// Largest poster accepted from uploads or downloads.
    pub max_poster_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            collection: "movies".to_string(),
            shard_key: Some("release_year".to_string()),
            max_poster_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Poster embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Path to an ONNX image model. When unset the deterministic pooled
    /// embedder is used instead.
    pub model_path: Option<String>,
    /// Output dimensionality of every stored embedding.
    pub dimensions: usize,
    /// Target length of the shorter image side before cropping.
    pub resize: u32,
    /// Side length of the square center crop fed to the model.
    pub crop: u32,
    /// ONNX Runtime intra-op thread count.
    pub intra_threads: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            dimensions: 512,
            resize: 256,
            crop: 224,
            intra_threads: 1,
        }
    }
}

/// Similarity search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of matches returned when the caller does not ask for a limit.
    pub default_limit: usize,
    /// Upper bound on caller-supplied limits.
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 50,
        }
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Records inserted per `insert_many` call.
    pub batch_size: usize,
    /// Timeout for a single poster download.
    pub fetch_timeout_secs: u64,
    /// User-Agent header sent with poster downloads.
    pub user_agent: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            fetch_timeout_secs: 30,
            user_agent: format!("cinematch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

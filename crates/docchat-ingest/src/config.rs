//! Configuration for the ingestion engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Backend provider (remote or memory)
    pub backend: BackendProvider,
    /// Intake, processed and status document locations
    pub paths: PathsConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Batch upload configuration
    pub upload: UploadConfig,
    /// Retry policy for collaborator calls
    pub retry: RetrySettings,
    /// Queue scanner configuration
    pub scheduler: SchedulerConfig,
    /// Metadata generation configuration
    pub metadata: MetadataConfig,
    /// OpenAI configuration (embeddings and metadata)
    pub openai: OpenAiConfig,
    /// Pinecone configuration (vector storage)
    pub pinecone: PineconeConfig,
    /// HTTP server configuration
    pub server: ServerConfig,
}

impl IngestConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read config {}: {}", path.display(), e))
                })?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(key) = non_empty("PINECONE_API_KEY") {
            self.pinecone.api_key = Some(key);
        }
        if let Some(host) = non_empty("PINECONE_INDEX_HOST") {
            self.pinecone.index_host = Some(host);
        }
        if let Some(dir) = non_empty("DOCCHAT_INTAKE_DIR") {
            self.paths.intake_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty("DOCCHAT_PROCESSED_DIR") {
            self.paths.processed_dir = PathBuf::from(dir);
        }
        if let Some(file) = non_empty("DOCCHAT_STATUS_FILE") {
            self.paths.status_file = PathBuf::from(file);
        }
    }

    /// Validate the configuration before any file is touched
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            return Err(Error::Config("chunking.max_tokens must be at least 1".into()));
        }
        if self.chunking.fallback_chars == 0 {
            return Err(Error::Config("chunking.fallback_chars must be at least 1".into()));
        }
        if self.upload.batch_size == 0 {
            return Err(Error::Config("upload.batch_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.paths.intake_dir == self.paths.processed_dir {
            return Err(Error::Config(
                "paths.intake_dir and paths.processed_dir must differ".into(),
            ));
        }

        if self.openai.api_key.is_none() {
            return Err(Error::Config(
                "OpenAI API key is required. Please set the OPENAI_API_KEY environment variable."
                    .into(),
            ));
        }

        if self.backend == BackendProvider::Remote {
            if self.pinecone.api_key.is_none() {
                return Err(Error::Config(
                    "Pinecone API key is required. Please set the PINECONE_API_KEY environment variable."
                        .into(),
                ));
            }
            if self.pinecone.index_host.is_none() {
                return Err(Error::Config(
                    "Pinecone index host is required. Please set PINECONE_INDEX_HOST or pinecone.index_host."
                        .into(),
                ));
            }
        }

        Ok(())
    }
}

/// Backend provider selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    /// OpenAI embeddings + Pinecone index
    #[default]
    Remote,
    /// In-process vector store, OpenAI still used for embeddings
    Memory,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Folder watched for new documents
    pub intake_dir: PathBuf,
    /// Folder receiving fully ingested documents
    pub processed_dir: PathBuf,
    /// JSON status document
    pub status_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            intake_dir: PathBuf::from("upload_folder"),
            processed_dir: PathBuf::from("processed_folder"),
            status_file: PathBuf::from("processing_status.json"),
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk
    pub max_tokens: usize,
    /// Characters per chunk when tokenization is unavailable
    pub fallback_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            fallback_chars: 2000,
        }
    }
}

/// Batch upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Chunks embedded and upserted together
    pub batch_size: usize,
    /// Pause between batches in milliseconds
    pub batch_delay_ms: u64,
    /// Vector store namespace
    pub namespace: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay_ms: 500,
            namespace: "default".to_string(),
        }
    }
}

impl UploadConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Retry settings shared by every collaborator call site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier
    pub multiplier: f64,
    /// Randomize delays by up to 30%
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Queue scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between scans in watch mode (seconds)
    pub poll_interval_secs: u64,
    /// Sleep after a loop-level error (seconds)
    pub error_backoff_secs: u64,
    /// A processing task idle for longer than this is reclaimed (seconds)
    pub stuck_after_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            error_backoff_secs: 10,
            stuck_after_secs: 30 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }
}

/// Metadata generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Call the annotator at all
    pub enabled: bool,
    /// Maximum tags requested per document
    pub max_tags: usize,
    /// Leading characters of the document sent to the annotator
    pub sample_chars: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tags: 10,
            sample_chars: 20_000,
        }
    }
}

/// OpenAI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key, usually supplied through OPENAI_API_KEY
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL
    pub base_url: String,
    /// Embedding model
    pub embedding_model: String,
    /// Chat model used for metadata generation
    pub chat_model: String,
    /// Input longer than this is truncated before embedding
    pub max_input_chars: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            chat_model: "gpt-4o".to_string(),
            max_input_chars: 8000,
            timeout_secs: 60,
        }
    }
}

/// Pinecone configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PineconeConfig {
    /// API key, usually supplied through PINECONE_API_KEY
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Data-plane host of the index (e.g. "docai-abc123.svc.us-east-1.pinecone.io")
    pub index_host: Option<String>,
    /// Embedding dimensions of the index
    pub dimension: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            index_host: None,
            dimension: 1536,
            timeout_secs: 30,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Maximum upload size in bytes (default: 20MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_size: 20 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_pipeline_tuning() {
        let config = IngestConfig::default();
        assert_eq!(config.chunking.max_tokens, 500);
        assert_eq!(config.chunking.fallback_chars, 2000);
        assert_eq!(config.upload.batch_size, 5);
        assert_eq!(config.scheduler.stuck_after(), Duration::from_secs(1800));
        assert_eq!(config.metadata.max_tags, 10);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: IngestConfig = toml::from_str(
            r#"
            backend = "memory"

            [upload]
            batch_size = 3

            [scheduler]
            stuck_after_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendProvider::Memory);
        assert_eq!(config.upload.batch_size, 3);
        assert_eq!(config.upload.namespace, "default");
        assert_eq!(config.scheduler.stuck_after_secs, 600);
        assert_eq!(config.scheduler.poll_interval_secs, 5);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("PINECONE_API_KEY", "pc-test"),
            ("PINECONE_INDEX_HOST", "docai.svc.pinecone.io"),
            ("DOCCHAT_INTAKE_DIR", "/srv/intake"),
            ("DOCCHAT_STATUS_FILE", ""),
        ]
        .into_iter()
        .collect();

        let mut config = IngestConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.pinecone.api_key.as_deref(), Some("pc-test"));
        assert_eq!(config.paths.intake_dir, PathBuf::from("/srv/intake"));
        // Empty values do not override
        assert_eq!(config.paths.status_file, PathBuf::from("processing_status.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remote_backend_requires_keys() {
        let config = IngestConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let mut config = IngestConfig::default();
        config.openai.api_key = Some("sk-test".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PINECONE_API_KEY"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = IngestConfig {
            backend: BackendProvider::Memory,
            ..Default::default()
        };
        config.openai.api_key = Some("sk-test".into());
        config.upload.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}

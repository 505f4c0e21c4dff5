//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `RagConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a YAML file.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use awful_rag::config::{RagConfig, load_config};
//!
//! let config: RagConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{error::Error, fs};

use tracing::*;

use crate::embeddings::{EmbeddingProvider, HttpEmbedder, LocalEmbedder, MINILM_DIMENSION};
use crate::error::IndexError;
use crate::knowledge::DEFAULT_CHUNK_SIZE;
use crate::retrieval::{ContextOptions, DEFAULT_MAX_ENTRY_CHARS};

/// Where embeddings come from.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// all-MiniLM-L6-v2 in-process via Candle.
    #[default]
    Local,
    /// An OpenAI-compatible `/embeddings` endpoint.
    Http,
}

/// Settings for the embedding provider.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Base URL of the API (http provider only).
    #[serde(default)]
    pub api_base: String,

    /// The API key used to authenticate requests (http provider only).
    #[serde(default)]
    pub api_key: String,

    /// Model name; a Hugging Face repo id for the local provider.
    pub model: String,

    // Per-request timeout for the http provider.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Represents the application's configuration.
///
/// Constructed by loading a YAML configuration file with [`load_config`], or
/// by [`RagConfig::default_for`] when `rag init` writes a fresh one.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RagConfig {
    /// Base path of the index; `<index_path>.vec` and `<index_path>.json` are written.
    pub index_path: PathBuf,

    /// Embedding dimension. Must match the provider.
    pub dimension: usize,

    /// Directory scanned by `rag ingest`.
    pub knowledge_dir: PathBuf,

    // Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    // Results returned when -k is not given.
    #[serde(default = "default_k")]
    pub default_k: usize,

    // Per-entry cap in rendered context.
    #[serde(default = "default_max_entry_chars")]
    pub max_entry_chars: usize,

    pub embedding: EmbeddingConfig,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_k() -> usize {
    5
}

fn default_max_entry_chars() -> usize {
    DEFAULT_MAX_ENTRY_CHARS
}

impl RagConfig {
    /// The configuration `rag init` writes, rooted at `base_dir`.
    pub fn default_for(base_dir: &Path) -> Self {
        Self {
            index_path: base_dir.join("index").join("knowledge"),
            dimension: MINILM_DIMENSION,
            knowledge_dir: base_dir.join("knowledge"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_k: default_k(),
            max_entry_chars: DEFAULT_MAX_ENTRY_CHARS,
            embedding: EmbeddingConfig {
                provider: ProviderKind::Local,
                api_base: "http://localhost:11434/v1".to_string(),
                api_key: String::new(),
                model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
                timeout_secs: default_timeout_secs(),
            },
        }
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            max_entry_chars: self.max_entry_chars,
        }
    }

    /// Build the configured embedding provider.
    pub async fn embedding_provider(&self) -> Result<Arc<dyn EmbeddingProvider>, Box<dyn Error>> {
        let provider: Arc<dyn EmbeddingProvider> = match self.embedding.provider {
            ProviderKind::Local => {
                info!(model = %self.embedding.model, "loading local embedding model");
                Arc::new(LocalEmbedder::load(&self.embedding.model).await?)
            }
            ProviderKind::Http => {
                info!(api_base = %self.embedding.api_base, model = %self.embedding.model, "using http embeddings");
                Arc::new(HttpEmbedder::new(
                    &self.embedding.api_base,
                    Some(self.embedding.api_key.clone()),
                    self.embedding.model.clone(),
                    self.dimension,
                    Duration::from_secs(self.embedding.timeout_secs),
                )?)
            }
        };
        Ok(provider)
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Returns
///
/// - `Ok(RagConfig)`: The loaded configuration.
/// - `Err(Box<dyn Error>)`: An error occurred while reading the file or parsing the YAML.
///
/// # Examples
///
/// ```no_run
/// use awful_rag::config::load_config;
///
/// match load_config("/path/to/config.yaml") {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: impl AsRef<Path>) -> Result<RagConfig, Box<dyn Error>> {
    let file = file.as_ref();
    debug!("Loading config from {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: RagConfig = serde_yaml::from_str(&content)?;
    if config.dimension == 0 {
        return Err(IndexError::ZeroDimension.into());
    }
    Ok(config)
}

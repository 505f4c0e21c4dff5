//! # Awful RAG (library root)
//!
//! A persistent embedding index and the retrieval layer that sits on top of it,
//! for feeding relevant knowledge into LLM prompts:
//!
//! - Flat k-NN vector index with tombstones, compaction and write-through
//!   persistence (`vector_index`, `storage`).
//! - Pluggable embedding providers: local Candle MiniLM or any
//!   OpenAI-compatible endpoint (`embeddings`).
//! - Text-level retrieval and context rendering (`retrieval`).
//! - A directory-backed knowledge base with chunking (`knowledge`).
//! - CLI parsing, configuration and terminal output (`commands`, `config`, `pretty`).
//!
//! ## Modules
//! - [`commands`], [`config`], [`embeddings`], [`error`], [`knowledge`],
//!   [`metadata`], [`pretty`], [`retrieval`], [`storage`], [`vector_index`]

use directories::ProjectDirs;
use std::error::Error;

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod knowledge;
pub mod metadata;
pub mod pretty;
pub mod retrieval;
pub mod storage;
pub mod vector_index;

pub use error::{EmbeddingError, IndexError, KnowledgeError, RetrievalError};
pub use retrieval::{IndexOutcome, RetrievalService, RetrievedDocument};
pub use vector_index::{DocumentRecord, SearchHit, SharedIndex, VectorIndex};

/// Return the per-platform configuration directory used by Awful RAG.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "awful-sec", "rag")`, so you get the right place on each OS
/// (e.g., `~/Library/Application Support/com.awful-sec.rag` on macOS).
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "awful-sec", "rag")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

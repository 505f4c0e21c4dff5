//! # Errors
//!
//! Typed failures for the index, the embedding boundary, and the retrieval
//! layer that joins them.
//!
//! | Error | Raised when | Retry? |
//! |-------|-------------|--------|
//! | [`IndexError::DimensionMismatch`] | a vector/batch has the wrong shape | never |
//! | [`IndexError::NonFinite`] | a vector or query holds NaN or infinity | never |
//! | [`IndexError::ZeroDimension`] | an index is opened with dimension 0 | never |
//! | [`IndexError::CorruptIndex`] | persisted state is unreadable or inconsistent | never |
//! | [`IndexError::Persistence`] | the write-through after a mutation failed | yes, via `persist()` |
//! | [`IndexError::InvalidMetadata`] | caller metadata is not a flat scalar map | never |
//! | [`EmbeddingError`] | the external provider failed | caller's policy |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by [`VectorIndex`](crate::vector_index::VectorIndex).
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// `vector` is the position in the batch (always 0 for a query).
    #[error("vector {vector} has a non-finite component at {component}")]
    NonFinite { vector: usize, component: usize },

    #[error("index dimension must be non-zero")]
    ZeroDimension,

    /// A blocking index task was cancelled before it finished, which only
    /// happens while the runtime shuts down.
    #[error("index task did not complete: {0}")]
    Interrupted(String),

    #[error("corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    /// The in-memory mutation succeeded but could not be written out.
    #[error("failed to persist index to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}

impl IndexError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(expected: usize, actual: usize) -> Self {
        IndexError::DimensionMismatch { expected, actual }
    }

    /// The first NaN or infinite component across `vectors`, if any.
    pub(crate) fn check_finite<'a>(
        vectors: impl IntoIterator<Item = &'a [f32]>,
    ) -> IndexResult<()> {
        for (vector, v) in vectors.into_iter().enumerate() {
            if let Some(component) = v.iter().position(|x| !x.is_finite()) {
                return Err(IndexError::NonFinite { vector, component });
            }
        }
        Ok(())
    }
}

/// Errors produced by an [`EmbeddingProvider`](crate::embeddings::EmbeddingProvider).
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced by [`RetrievalService`](crate::retrieval::RetrievalService).
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl RetrievalError {
    /// Whether a caller may reasonably retry the same request.
    ///
    /// Provider failures and failed write-throughs are transient; shape and
    /// corruption errors point at a programmer or data problem.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RetrievalError::Embedding(_) | RetrievalError::Index(IndexError::Persistence { .. })
        )
    }
}

/// Errors surfaced by [`KnowledgeBase`](crate::knowledge::KnowledgeBase).
#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("knowledge file I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

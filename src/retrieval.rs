//! # Retrieval
//!
//! [`RetrievalService`] turns text into index operations: it embeds documents
//! before they are appended, embeds queries before they are searched, and
//! renders hits into a numbered context block for a language model.
//!
//! The service owns neither the index nor the provider; both are passed in.
//!
//! ```no_run
//! use std::sync::Arc;
//! use awful_rag::embeddings::LocalEmbedder;
//! use awful_rag::retrieval::RetrievalService;
//! use awful_rag::vector_index::{SharedIndex, VectorIndex};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let index = SharedIndex::new(VectorIndex::open("knowledge", 384)?);
//! let embedder = Arc::new(LocalEmbedder::load("sentence-transformers/all-MiniLM-L6-v2").await?);
//! let rag = RetrievalService::new(index, embedder).await?;
//!
//! rag.add_knowledge(vec!["Rust has no garbage collector.".into()], None).await?;
//! println!("{}", rag.get_context("how does Rust manage memory?", 3).await?);
//! # Ok(()) }
//! ```

use std::sync::Arc;
use tracing::{debug, warn};

use crate::embeddings::EmbeddingProvider;
use crate::error::{EmbeddingError, IndexError, RetrievalError};
use crate::metadata::Metadata;
use crate::vector_index::SharedIndex;

/// Default cap on characters per rendered context entry.
pub const DEFAULT_MAX_ENTRY_CHARS: usize = 1000;

/// A retrieved document, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    pub row_index: u64,
    pub text: String,
    /// Squared Euclidean distance to the query embedding.
    pub distance: f32,
    pub metadata: Metadata,
}

impl RetrievedDocument {
    pub fn similarity(&self) -> f32 {
        similarity(self.distance)
    }
}

/// Result of an indexing attempt that tolerates provider outages.
#[derive(Debug)]
pub enum IndexOutcome {
    Indexed(Vec<u64>),
    /// The provider failed; nothing was written.
    Skipped { reason: EmbeddingError },
}

impl IndexOutcome {
    pub fn is_indexed(&self) -> bool {
        matches!(self, IndexOutcome::Indexed(_))
    }
}

/// Options for [`RetrievalService::get_context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub max_entry_chars: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_entry_chars: DEFAULT_MAX_ENTRY_CHARS,
        }
    }
}

/// Map a squared distance onto `[0, 1]`; identical vectors score `1.0`.
///
/// A NaN or infinite distance scores `0.0`.
pub fn similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}

/// Text-level front end to a [`SharedIndex`].
pub struct RetrievalService {
    index: SharedIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    options: ContextOptions,
}

impl RetrievalService {
    /// Wire an index to a provider. Their dimensions must agree.
    pub async fn new(
        index: SharedIndex,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, IndexError> {
        let expected = index.dimension().await;
        if embedder.dimension() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: embedder.dimension(),
            });
        }
        Ok(Self {
            index,
            embedder,
            options: ContextOptions::default(),
        })
    }

    pub fn with_options(mut self, options: ContextOptions) -> Self {
        self.options = options;
        self
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Embed and append documents. A provider failure leaves the index untouched.
    pub async fn add_knowledge(
        &self,
        documents: Vec<String>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Vec<u64>, RetrievalError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed_batch(&documents).await?;
        let rows = self.index.add(documents, vectors, metadata).await?;
        debug!(count = rows.len(), "indexed knowledge");
        Ok(rows)
    }

    /// Like [`add_knowledge`](Self::add_knowledge), but a provider failure is a
    /// [`IndexOutcome::Skipped`] value instead of an error. Index failures
    /// (shape, persistence) still propagate.
    pub async fn try_add_knowledge(
        &self,
        documents: Vec<String>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<IndexOutcome, RetrievalError> {
        match self.add_knowledge(documents, metadata).await {
            Ok(rows) => Ok(IndexOutcome::Indexed(rows)),
            Err(RetrievalError::Embedding(reason)) => {
                warn!(error = %reason, "skipping indexing, embedding provider failed");
                Ok(IndexOutcome::Skipped { reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Top-`k` documents for `query`, nearest first.
    ///
    /// An empty index yields `[]` without contacting the provider. Provider
    /// failures are errors, never an empty result.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if k == 0 || self.index.size().await == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&vector, k).await?;
        Ok(hits
            .into_iter()
            .map(|h| RetrievedDocument {
                row_index: h.row_index,
                text: h.text,
                distance: h.distance,
                metadata: h.metadata,
            })
            .collect())
    }

    /// Numbered context block for `query`, or `""` when nothing matches.
    ///
    /// ```text
    /// [1] first document text
    /// (similarity: 98.04%)
    ///
    /// [2] second document text
    /// (similarity: 61.73%)
    /// ```
    pub async fn get_context(&self, query: &str, k: usize) -> Result<String, RetrievalError> {
        let results = self.retrieve(query, k).await?;
        Ok(render_context(&results, self.options))
    }

    pub async fn tombstone(&self, row_index: u64) -> Result<bool, RetrievalError> {
        Ok(self.index.tombstone(row_index).await?)
    }

    pub async fn size(&self) -> u64 {
        self.index.size().await
    }
}

/// Render retrieved documents as the context block described on
/// [`RetrievalService::get_context`].
pub fn render_context(results: &[RetrievedDocument], options: ContextOptions) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[{}] {}\n(similarity: {:.2}%)",
                i + 1,
                truncate_chars(&doc.text, options.max_entry_chars),
                doc.similarity() * 100.0
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut `text` to at most `max` characters, marking the cut with `…`.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((byte, _)) => {
            let mut cut = text[..byte].trim_end().to_string();
            cut.push('…');
            cut
        }
    }
}

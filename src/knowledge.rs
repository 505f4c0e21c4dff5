//! # Knowledge base
//!
//! A directory of markdown and text files kept in sync with a
//! [`RetrievalService`]. Files are split into word-aligned chunks of roughly
//! `chunk_size` characters and indexed with their file name as metadata.

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{KnowledgeError, RetrievalError};
use crate::metadata::{Metadata, MetadataValue};
use crate::retrieval::RetrievalService;

/// Default chunk size, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

const KNOWLEDGE_EXTENSIONS: &[&str] = &["md", "txt"];

/// Split `content` on whitespace into chunks of at least `chunk_size`
/// characters (the last chunk may be shorter). Words are never split.
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in content.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        if current.chars().count() >= chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// What [`KnowledgeBase::load_knowledge_files`] did.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// File names that were indexed.
    pub loaded: Vec<String>,
    /// Files that could not be read, with the reason.
    pub failed: Vec<(PathBuf, String)>,
    pub chunks: usize,
}

/// Knowledge files on disk plus the service that indexes them.
pub struct KnowledgeBase {
    rag: RetrievalService,
    dir: PathBuf,
    chunk_size: usize,
    loaded_files: Vec<String>,
}

impl KnowledgeBase {
    /// Open (and create if missing) the knowledge directory.
    pub fn new(rag: RetrievalService, dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            rag,
            dir,
            chunk_size: DEFAULT_CHUNK_SIZE,
            loaded_files: Vec::new(),
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn rag(&self) -> &RetrievalService {
        &self.rag
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn loaded_files(&self) -> &[String] {
        &self.loaded_files
    }

    /// Knowledge files in the directory, sorted by name.
    fn knowledge_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| KNOWLEDGE_EXTENSIONS.contains(&e))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Index every `*.md` and `*.txt` file in the directory.
    ///
    /// Unreadable files are collected in the report and skipped. An embedding
    /// or index failure aborts the load and is returned.
    pub async fn load_knowledge_files(&mut self) -> Result<LoadReport, KnowledgeError> {
        let files = self.knowledge_files().map_err(|source| KnowledgeError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut report = LoadReport::default();

        let bar = ProgressBar::new(files.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            bar.set_message(name.clone());

            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read knowledge file");
                    report.failed.push((path, e.to_string()));
                    bar.inc(1);
                    continue;
                }
            };

            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let rows = self.index_text(&content, &name, &extension).await?;
            report.chunks += rows.len();
            report.loaded.push(name.clone());
            self.loaded_files.push(name);
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            chunks = report.chunks,
            "loaded knowledge files"
        );
        Ok(report)
    }

    async fn index_text(
        &self,
        content: &str,
        source: &str,
        kind: &str,
    ) -> Result<Vec<u64>, RetrievalError> {
        let chunks = chunk_content(content, self.chunk_size);
        let mut meta = Metadata::new();
        meta.insert("source".into(), MetadataValue::from(source));
        meta.insert("type".into(), MetadataValue::from(kind));
        meta.insert("ingested_at".into(), MetadataValue::from(Utc::now().to_rfc3339()));
        let metadata = vec![meta; chunks.len()];
        self.rag.add_knowledge(chunks, Some(metadata)).await
    }

    /// Save `content` as `<title>.md` and index it.
    pub async fn add_document(
        &mut self,
        title: &str,
        content: &str,
    ) -> Result<Vec<u64>, KnowledgeError> {
        let path = self.dir.join(format!("{title}.md"));
        fs::write(&path, content).map_err(|source| KnowledgeError::Io {
            path: path.clone(),
            source,
        })?;

        let rows = self.index_text(content, title, ".md").await?;
        self.loaded_files.push(title.to_string());
        Ok(rows)
    }

    /// Texts of the `top_k` nearest chunks.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>, RetrievalError> {
        Ok(self
            .rag
            .retrieve(query, top_k)
            .await?
            .into_iter()
            .map(|d| d.text)
            .collect())
    }

    pub async fn get_context(&self, query: &str, max_docs: usize) -> Result<String, RetrievalError> {
        self.rag.get_context(query, max_docs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingProvider;
    use crate::error::EmbeddingError;
    use crate::vector_index::{SharedIndex, Vector, VectorIndex};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Bag-of-letters embedding: counts of a..=z, so overlapping text lands close.
    struct LetterEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        fn dimension(&self) -> usize {
            26
        }

        async fn embed(&self, text: &str) -> Result<Vector, EmbeddingError> {
            let mut v = vec![0.0; 26];
            for c in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                v[(c - b'a') as usize] += 1.0;
            }
            Ok(v)
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>, EmbeddingError> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    async fn knowledge_base(dir: &Path) -> KnowledgeBase {
        let index = SharedIndex::new(VectorIndex::in_memory(26));
        let rag = RetrievalService::new(index, Arc::new(LetterEmbedder))
            .await
            .unwrap();
        KnowledgeBase::new(rag, dir).unwrap()
    }

    #[test]
    fn chunks_on_word_boundaries() {
        let chunks = chunk_content("aaaa bbbb cccc dddd e", 9);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc dddd", "e"]);

        assert!(chunk_content("", 10).is_empty());
        assert!(chunk_content("   \n\t ", 10).is_empty());
        assert_eq!(chunk_content("one  two\nthree", 500), vec!["one two three"]);
    }

    #[test]
    fn long_words_are_their_own_chunk() {
        let chunks = chunk_content("supercalifragilistic a b", 5);
        assert_eq!(chunks, vec!["supercalifragilistic", "a b"]);
    }

    #[tokio::test]
    async fn loads_markdown_and_text_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "zebra zebra zebra").unwrap();
        fs::write(dir.path().join("b.txt"), "apple apple").unwrap();
        fs::write(dir.path().join("c.json"), "{\"ignored\": true}").unwrap();

        let mut kb = knowledge_base(dir.path()).await;
        let report = kb.load_knowledge_files().await.unwrap();
        assert_eq!(report.loaded, vec!["a.md", "b.txt"]);
        assert!(report.failed.is_empty());
        assert_eq!(report.chunks, 2);
        assert_eq!(kb.rag().size().await, 2);

        let docs = kb.rag().retrieve("zebra", 1).await.unwrap();
        assert_eq!(docs[0].text, "zebra zebra zebra");
        assert_eq!(docs[0].metadata["source"], MetadataValue::from("a.md"));
        assert_eq!(docs[0].metadata["type"], MetadataValue::from(".md"));
        assert!(docs[0].metadata.contains_key("ingested_at"));
    }

    #[tokio::test]
    async fn add_document_writes_and_indexes() {
        let dir = tempdir().unwrap();
        let mut kb = knowledge_base(dir.path()).await;

        let rows = kb.add_document("fruit", "banana banana").await.unwrap();
        assert_eq!(rows, vec![0]);
        assert_eq!(
            fs::read_to_string(dir.path().join("fruit.md")).unwrap(),
            "banana banana"
        );
        assert_eq!(kb.loaded_files(), ["fruit"]);

        assert_eq!(kb.search("banana", 3).await.unwrap(), vec!["banana banana"]);
        let context = kb.get_context("banana banana", 3).await.unwrap();
        assert!(context.starts_with("[1] banana banana\n(similarity: 100.00%)"));
    }
}

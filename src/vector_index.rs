//! # VectorIndex
//!
//! Persistent flat embedding index for Awful RAG.
//!
//! The index keeps a dense row-major matrix of `f32` vectors next to a parallel
//! list of [`DocumentRecord`]s. Row `i` of the matrix belongs to document `i`,
//! and that position (`row_index`) is the only identifier the index hands out.
//!
//! ## Responsibilities
//! - **Indexing**: append batches of vectors + documents, all-or-nothing.
//! - **Search**: exact k-NN by squared Euclidean distance over live rows.
//! - **Deletion**: logical tombstones; [`VectorIndex::compact`] rebuilds when
//!   the dead rows are worth reclaiming.
//! - **Persistence**: every mutation is written through to disk before it
//!   returns (see [`crate::storage`] for the layout).
//!
//! ## Quick Example
//! ```no_run
//! use awful_rag::vector_index::VectorIndex;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut index = VectorIndex::open("knowledge", 3)?;
//! index.add(vec!["cat".into()], vec![vec![1.0, 0.0, 0.0]], None)?;
//! let hits = index.search(&[0.9, 0.1, 0.0], 1)?;
//! println!("nearest: {}", hits[0].text);
//! # Ok(()) }
//! ```

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{IndexError, IndexResult};
use crate::metadata::Metadata;
use crate::storage::{self, IndexPaths};

/// A fixed-length embedding.
pub type Vector = Vec<f32>;

/// A stored document and its bookkeeping.
///
/// `row_index` is not written to the sidecar; it is the entry's position in
/// the `documents` array and is reassigned on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(skip)]
    pub row_index: u64,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tombstoned: bool,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub row_index: u64,
    pub text: String,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
    pub metadata: Metadata,
}

/// Flat vector index with an append-only document store.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    /// Row-major, `documents.len() * dimension` floats.
    vectors: Vec<f32>,
    documents: Vec<DocumentRecord>,
    /// `None` for an index that lives only in memory.
    paths: Option<IndexPaths>,
    live: u64,
}

impl VectorIndex {
    /// An empty index backed by `<base>.vec` / `<base>.json`.
    ///
    /// Nothing is written until the first mutation.
    ///
    /// # Panics
    /// If `dimension` is zero.
    pub fn create(base: impl AsRef<Path>, dimension: usize) -> Self {
        assert!(dimension > 0, "vector index dimension must be non-zero");
        Self {
            dimension,
            vectors: Vec::new(),
            documents: Vec::new(),
            paths: Some(IndexPaths::new(base)),
            live: 0,
        }
    }

    /// An empty index that is never persisted.
    ///
    /// # Panics
    /// If `dimension` is zero.
    pub fn in_memory(dimension: usize) -> Self {
        assert!(dimension > 0, "vector index dimension must be non-zero");
        Self {
            dimension,
            vectors: Vec::new(),
            documents: Vec::new(),
            paths: None,
            live: 0,
        }
    }

    /// Load a persisted index. Missing or inconsistent artifacts are
    /// [`IndexError::CorruptIndex`].
    pub fn load(base: impl AsRef<Path>, dimension: usize) -> IndexResult<Self> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        let paths = IndexPaths::new(base);
        let (vectors, documents) = storage::read_index(&paths, dimension)?;
        let live = documents.iter().filter(|d| !d.tombstoned).count() as u64;
        info!(
            rows = documents.len(),
            live,
            dimension,
            path = %paths.sidecar.display(),
            "loaded vector index"
        );
        Ok(Self {
            dimension,
            vectors,
            documents,
            paths: Some(paths),
            live,
        })
    }

    /// Load if the index exists on disk, otherwise start empty.
    ///
    /// Exactly one artifact present means a previous write was interrupted or a
    /// file was removed by hand; that is reported as corruption, not papered over.
    /// A zero `dimension` is [`IndexError::ZeroDimension`].
    pub fn open(base: impl AsRef<Path>, dimension: usize) -> IndexResult<Self> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        let paths = IndexPaths::new(base.as_ref());
        match (paths.vectors_exist(), paths.sidecar_exists()) {
            (true, true) => Self::load(base, dimension),
            (false, false) => {
                debug!(path = %paths.sidecar.display(), "no persisted index, starting empty");
                Ok(Self::create(base, dimension))
            }
            (true, false) => Err(IndexError::corrupt(&paths.sidecar, "sidecar is missing")),
            (false, true) => Err(IndexError::corrupt(&paths.vectors, "vector file is missing")),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live (non-tombstoned) documents.
    pub fn size(&self) -> u64 {
        self.live
    }

    /// Number of physical rows, tombstones included.
    pub fn row_count(&self) -> u64 {
        self.documents.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// A live document by row index.
    pub fn get(&self, row_index: u64) -> Option<&DocumentRecord> {
        self.documents
            .get(usize::try_from(row_index).ok()?)
            .filter(|d| !d.tombstoned)
    }

    /// Append documents with their vectors, returning the assigned row indices.
    ///
    /// The whole batch is validated before anything is touched: document and
    /// vector counts must agree, every vector must have the index dimension
    /// and only finite components, and `metadata` (when given) must have one
    /// entry per document.
    ///
    /// # Errors
    /// - [`IndexError::DimensionMismatch`] on any shape problem; the index is unchanged.
    /// - [`IndexError::NonFinite`] if a component is NaN or infinite; the index is unchanged.
    /// - [`IndexError::Persistence`] if the write-through fails; the rows stay
    ///   in memory and [`persist`](Self::persist) can be retried.
    pub fn add(
        &mut self,
        documents: Vec<String>,
        vectors: Vec<Vector>,
        metadata: Option<Vec<Metadata>>,
    ) -> IndexResult<Vec<u64>> {
        if documents.len() != vectors.len() {
            return Err(IndexError::mismatch(documents.len(), vectors.len()));
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::mismatch(self.dimension, v.len()));
        }
        IndexError::check_finite(vectors.iter().map(Vec::as_slice))?;
        if let Some(meta) = &metadata
            && meta.len() != documents.len()
        {
            return Err(IndexError::mismatch(documents.len(), meta.len()));
        }
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let start = self.row_count();
        let mut metadata = metadata.map(Vec::into_iter);
        self.vectors.reserve(vectors.len() * self.dimension);
        for vector in &vectors {
            self.vectors.extend_from_slice(vector);
        }
        let rows: Vec<u64> = (start..start + documents.len() as u64).collect();
        for (row_index, text) in rows.iter().copied().zip(documents) {
            let metadata = metadata.as_mut().and_then(|it| it.next()).unwrap_or_default();
            self.documents.push(DocumentRecord {
                row_index,
                text,
                metadata,
                tombstoned: false,
            });
        }
        self.live += rows.len() as u64;
        debug!(added = rows.len(), first_row = start, "appended documents");

        self.persist()?;
        Ok(rows)
    }

    /// Exact k-nearest-neighbour search over live rows.
    ///
    /// Results are ordered by ascending squared distance, ties by ascending
    /// `row_index`. Fewer than `k` live rows returns all of them; `k == 0` or
    /// an empty index returns nothing.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(IndexError::mismatch(self.dimension, query.len()));
        }
        IndexError::check_finite([query])?;
        if k == 0 || self.live == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, u64)> = self
            .vectors
            .par_chunks_exact(self.dimension)
            .zip(self.documents.par_iter())
            .filter(|(_, doc)| !doc.tombstoned)
            .map(|(row, doc)| (squared_euclidean(query, row), doc.row_index))
            .collect();

        let by_distance = |a: &(f32, u64), b: &(f32, u64)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored
            .into_iter()
            .map(|(distance, row_index)| {
                let doc = &self.documents[row_index as usize];
                SearchHit {
                    row_index,
                    text: doc.text.clone(),
                    distance,
                    metadata: doc.metadata.clone(),
                }
            })
            .collect())
    }

    /// Logically delete a row. The vector stays on disk until [`compact`](Self::compact).
    ///
    /// Returns `Ok(false)` when the row does not exist or is already tombstoned.
    pub fn tombstone(&mut self, row_index: u64) -> IndexResult<bool> {
        let Some(doc) = usize::try_from(row_index)
            .ok()
            .and_then(|i| self.documents.get_mut(i))
        else {
            return Ok(false);
        };
        if doc.tombstoned {
            return Ok(false);
        }
        doc.tombstoned = true;
        self.live -= 1;
        debug!(row_index, "tombstoned row");

        self.persist()?;
        Ok(true)
    }

    /// Drop everything and persist the empty state.
    pub fn clear(&mut self) -> IndexResult<()> {
        self.vectors.clear();
        self.documents.clear();
        self.live = 0;
        info!("cleared vector index");
        self.persist()
    }

    /// Rebuild the matrix without tombstoned rows.
    ///
    /// Live rows keep their relative order and are renumbered densely. The
    /// returned pairs map each surviving `old_row -> new_row` so callers that
    /// keep row indices elsewhere can rewrite them.
    pub fn compact(&mut self) -> IndexResult<Vec<(u64, u64)>> {
        let dead = self.row_count() - self.live;
        if dead == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(self.live as usize * self.dimension);
        let mut documents = Vec::with_capacity(self.live as usize);
        let mut mapping = Vec::with_capacity(self.live as usize);
        for (row, doc) in self
            .vectors
            .chunks_exact(self.dimension)
            .zip(std::mem::take(&mut self.documents))
        {
            if doc.tombstoned {
                continue;
            }
            let new_row = documents.len() as u64;
            mapping.push((doc.row_index, new_row));
            vectors.extend_from_slice(row);
            documents.push(DocumentRecord {
                row_index: new_row,
                ..doc
            });
        }
        self.vectors = vectors;
        self.documents = documents;
        info!(reclaimed = dead, live = self.live, "compacted vector index");

        self.persist()?;
        Ok(mapping)
    }

    /// Write the current state to disk. No-op for an in-memory index.
    pub fn persist(&self) -> IndexResult<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        storage::write_index(paths, self.dimension, &self.vectors, &self.documents).inspect_err(
            |e| warn!(error = %e, "index mutation kept in memory but not persisted"),
        )
    }
}

/// `Σ (a[i] - b[i])²` over two equal-length slices.
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cloneable handle that serializes access to one [`VectorIndex`].
///
/// Reads (`search`, `size`, `get`) share the lock; mutations take it
/// exclusively, so a batch append is never observed half-done. The distance
/// scan and the file writes run on the blocking pool with the guard moved
/// into the task, so they never stall a runtime worker.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<VectorIndex>>,
}

impl SharedIndex {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
        }
    }

    pub async fn dimension(&self) -> usize {
        self.inner.read().await.dimension()
    }

    pub async fn size(&self) -> u64 {
        self.inner.read().await.size()
    }

    pub async fn row_count(&self) -> u64 {
        self.inner.read().await.row_count()
    }

    pub async fn get(&self, row_index: u64) -> Option<DocumentRecord> {
        self.inner.read().await.get(row_index).cloned()
    }

    pub async fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<SearchHit>> {
        let index = Arc::clone(&self.inner).read_owned().await;
        let query = query.to_vec();
        blocking(move || index.search(&query, k)).await
    }

    pub async fn add(
        &self,
        documents: Vec<String>,
        vectors: Vec<Vector>,
        metadata: Option<Vec<Metadata>>,
    ) -> IndexResult<Vec<u64>> {
        let mut index = Arc::clone(&self.inner).write_owned().await;
        blocking(move || index.add(documents, vectors, metadata)).await
    }

    pub async fn tombstone(&self, row_index: u64) -> IndexResult<bool> {
        let mut index = Arc::clone(&self.inner).write_owned().await;
        blocking(move || index.tombstone(row_index)).await
    }

    pub async fn clear(&self) -> IndexResult<()> {
        let mut index = Arc::clone(&self.inner).write_owned().await;
        blocking(move || index.clear()).await
    }

    pub async fn compact(&self) -> IndexResult<Vec<(u64, u64)>> {
        let mut index = Arc::clone(&self.inner).write_owned().await;
        blocking(move || index.compact()).await
    }

    pub async fn persist(&self) -> IndexResult<()> {
        let index = Arc::clone(&self.inner).write_owned().await;
        blocking(move || index.persist()).await
    }
}

/// Run `f` on tokio's blocking pool. A panic inside `f` resumes on the caller.
async fn blocking<T, F>(f: F) -> IndexResult<T>
where
    F: FnOnce() -> IndexResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => match e.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(e) => Err(IndexError::Interrupted(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataValue;
    use tempfile::tempdir;

    fn docs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn pets() -> VectorIndex {
        let mut index = VectorIndex::in_memory(3);
        index
            .add(docs(&["cat"]), vec![vec![1.0, 0.0, 0.0]], None)
            .unwrap();
        index
            .add(docs(&["dog"]), vec![vec![0.0, 1.0, 0.0]], None)
            .unwrap();
        index
    }

    #[test]
    fn nearest_pet() {
        let index = pets();

        let hits = index.search(&[0.9, 0.1, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "cat");
        assert!((hits[0].distance - 0.02).abs() < 1e-6);

        let hits = index.search(&[0.9, 0.1, 0.0], 5).unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, ["cat", "dog"]);
        assert!((hits[1].distance - 1.62).abs() < 1e-6);
    }

    #[test]
    fn exact_vector_is_first_at_zero() {
        let mut index = VectorIndex::in_memory(4);
        let vectors = vec![
            vec![0.1, 0.2, 0.3, 0.4],
            vec![-1.0, 2.5, 0.0, 7.0],
            vec![3.0, 3.0, 3.0, 3.0],
        ];
        index
            .add(docs(&["a", "b", "c"]), vectors.clone(), None)
            .unwrap();

        for (row, v) in vectors.iter().enumerate() {
            let hits = index.search(v, 1).unwrap();
            assert_eq!(hits[0].row_index, row as u64);
            assert!(hits[0].distance.abs() < 1e-6);
        }
    }

    #[test]
    fn empty_index_and_zero_k() {
        let index = VectorIndex::in_memory(3);
        assert!(index.search(&[1.0, 2.0, 3.0], 5).unwrap().is_empty());

        let index = pets();
        assert!(index.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn rows_are_sequential_and_metadata_defaults_empty() {
        let mut index = pets();
        let mut meta = Metadata::new();
        meta.insert("id".into(), "external-42".into());

        let rows = index
            .add(
                docs(&["bird", "fish"]),
                vec![vec![0.0, 0.0, 1.0], vec![1.0, 1.0, 1.0]],
                Some(vec![meta.clone(), Metadata::new()]),
            )
            .unwrap();
        assert_eq!(rows, vec![2, 3]);
        assert_eq!(index.get(2).unwrap().metadata, meta);
        assert!(index.get(0).unwrap().metadata.is_empty());
        assert_eq!(
            index.get(2).unwrap().metadata["id"],
            MetadataValue::from("external-42")
        );
    }

    #[test]
    fn shape_errors_do_not_mutate() {
        let mut index = pets();

        let err = index
            .add(docs(&["x", "y"]), vec![vec![0.0, 0.0, 1.0]], None)
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));

        let err = index
            .add(
                docs(&["x", "y"]),
                vec![vec![0.0, 0.0, 1.0], vec![0.0, 1.0]],
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, actual: 2 }
        ));

        let err = index
            .add(docs(&["x"]), vec![vec![0.0, 0.0, 1.0]], Some(vec![]))
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));

        assert_eq!(index.size(), 2);
        assert_eq!(index.row_count(), 2);
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn non_finite_components_are_rejected() {
        let mut index = VectorIndex::in_memory(2);
        let err = index
            .add(
                docs(&["good", "poisoned"]),
                vec![vec![1.0, 0.0], vec![f32::NAN, 0.0]],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, IndexError::NonFinite { vector: 1, component: 0 }));
        assert_eq!(index.row_count(), 0);

        index
            .add(docs(&["good"]), vec![vec![1.0, 0.0]], None)
            .unwrap();
        assert!(matches!(
            index.search(&[0.0, f32::INFINITY], 1),
            Err(IndexError::NonFinite { vector: 0, component: 1 })
        ));
        assert!(matches!(
            index.search(&[f32::NAN, 0.0], 1),
            Err(IndexError::NonFinite { .. })
        ));
        assert_eq!(index.search(&[1.0, 0.0], 1).unwrap()[0].distance, 0.0);
    }

    #[test]
    fn zero_dimension_is_an_error() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("idx");
        assert!(matches!(
            VectorIndex::open(&base, 0),
            Err(IndexError::ZeroDimension)
        ));
        assert!(matches!(
            VectorIndex::load(&base, 0),
            Err(IndexError::ZeroDimension)
        ));
        assert!(!IndexPaths::new(&base).sidecar_exists());
    }

    #[test]
    fn tombstones_hide_rows_and_keep_slots() {
        let mut index = pets();
        assert!(index.tombstone(0).unwrap());
        assert!(!index.tombstone(0).unwrap());
        assert!(!index.tombstone(99).unwrap());

        assert_eq!(index.size(), 1);
        assert_eq!(index.row_count(), 2);
        assert!(index.get(0).is_none());

        // the exact cat vector still cannot surface the tombstoned row
        let hits = index.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "dog");

        let rows = index
            .add(docs(&["cow"]), vec![vec![0.0, 0.0, 1.0]], None)
            .unwrap();
        assert_eq!(rows, vec![2], "row indices are never reused");
    }

    #[test]
    fn size_after_adds_and_tombstones() {
        let mut index = VectorIndex::in_memory(2);
        let n = 10;
        let vectors = (0..n).map(|i| vec![i as f32, 0.0]).collect();
        let texts = (0..n).map(|i| format!("doc {i}")).collect();
        index.add(texts, vectors, None).unwrap();
        for row in [1, 3, 5, 7] {
            index.tombstone(row).unwrap();
        }
        assert_eq!(index.size(), n - 4);
        assert_eq!(index.search(&[0.0, 0.0], 100).unwrap().len(), (n - 4) as usize);
    }

    #[test]
    fn ordering_and_ties() {
        let mut index = VectorIndex::in_memory(2);
        // rows 0, 2 and 3 are equidistant from the origin
        index
            .add(
                docs(&["east", "far", "north", "west", "near"]),
                vec![
                    vec![1.0, 0.0],
                    vec![5.0, 5.0],
                    vec![0.0, 1.0],
                    vec![-1.0, 0.0],
                    vec![0.1, 0.0],
                ],
                None,
            )
            .unwrap();

        let hits = index.search(&[0.0, 0.0], 4).unwrap();
        let rows: Vec<u64> = hits.iter().map(|h| h.row_index).collect();
        assert_eq!(rows, vec![4, 0, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        let rows: Vec<u64> = hits.iter().map(|h| h.row_index).collect();
        assert_eq!(rows, vec![4, 0]);
    }

    #[test]
    fn persist_and_reload_reproduce_search() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("knowledge");

        let mut index = VectorIndex::open(&base, 3).unwrap();
        index
            .add(
                docs(&["cat", "dog", "emu"]),
                vec![
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.5, 0.5, 0.5],
                ],
                None,
            )
            .unwrap();
        index.tombstone(1).unwrap();

        let reloaded = VectorIndex::load(&base, 3).unwrap();
        assert_eq!(reloaded.size(), 2);
        assert_eq!(reloaded.row_count(), 3);
        for q in [[0.9_f32, 0.1, 0.0], [0.0, 1.0, 0.0], [0.3, 0.3, 0.9]] {
            assert_eq!(index.search(&q, 3).unwrap(), reloaded.search(&q, 3).unwrap());
        }
    }

    #[test]
    fn open_refuses_half_written_state() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("idx");
        let mut index = VectorIndex::open(&base, 2).unwrap();
        index
            .add(docs(&["a"]), vec![vec![1.0, 1.0]], None)
            .unwrap();

        std::fs::remove_file(base.with_extension("json")).unwrap();
        assert!(matches!(
            VectorIndex::open(&base, 2),
            Err(IndexError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn load_rejects_document_count_disagreement() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("idx");
        let mut index = VectorIndex::open(&base, 2).unwrap();
        index
            .add(docs(&["a", "b"]), vec![vec![1.0, 1.0], vec![2.0, 2.0]], None)
            .unwrap();

        std::fs::write(
            base.with_extension("json"),
            r#"{"row_count":1,"dimension":2,"documents":[{"text":"a","metadata":{},"tombstoned":false}]}"#,
        )
        .unwrap();
        assert!(matches!(
            VectorIndex::load(&base, 2),
            Err(IndexError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn persistence_failure_keeps_memory_state() {
        let dir = tempdir().unwrap();
        // a regular file where the index directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let mut index = VectorIndex::create(blocker.join("idx"), 2);
        let err = index
            .add(docs(&["a"]), vec![vec![1.0, 0.0]], None)
            .unwrap_err();
        assert!(matches!(err, IndexError::Persistence { .. }));
        assert_eq!(index.size(), 1);
        assert_eq!(index.search(&[1.0, 0.0], 1).unwrap()[0].text, "a");
    }

    #[test]
    fn clear_persists_empty_state() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("idx");
        let mut index = VectorIndex::open(&base, 2).unwrap();
        index
            .add(docs(&["a"]), vec![vec![1.0, 0.0]], None)
            .unwrap();
        index.clear().unwrap();

        let reloaded = VectorIndex::load(&base, 2).unwrap();
        assert_eq!(reloaded.size(), 0);
        assert_eq!(reloaded.row_count(), 0);
    }

    #[test]
    fn compaction_drops_dead_rows() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("idx");
        let mut index = VectorIndex::open(&base, 2).unwrap();
        index
            .add(
                docs(&["a", "b", "c", "d"]),
                vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0]],
                None,
            )
            .unwrap();
        index.tombstone(0).unwrap();
        index.tombstone(2).unwrap();
        let before: Vec<String> = index
            .search(&[0.0, 0.0], 10)
            .unwrap()
            .into_iter()
            .map(|h| h.text)
            .collect();

        let mapping = index.compact().unwrap();
        assert_eq!(mapping, vec![(1, 0), (3, 1)]);
        assert_eq!(index.row_count(), 2);
        assert_eq!(index.size(), 2);

        let reloaded = VectorIndex::load(&base, 2).unwrap();
        let after: Vec<String> = reloaded
            .search(&[0.0, 0.0], 10)
            .unwrap()
            .into_iter()
            .map(|h| h.text)
            .collect();
        assert_eq!(before, after);
        assert_eq!(reloaded.get(1).unwrap().text, "d");
        assert!(index.compact().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_index_serializes_writers() {
        let shared = SharedIndex::new(VectorIndex::in_memory(2));
        let mut tasks = Vec::new();
        for i in 0..8 {
            let shared = shared.clone();
            tasks.push(tokio::spawn(async move {
                let texts = vec![format!("{i}-a"), format!("{i}-b")];
                let vectors = vec![vec![i as f32, 0.0], vec![i as f32, 1.0]];
                shared.add(texts, vectors, None).await.unwrap()
            }));
        }
        let mut all_rows = Vec::new();
        for task in tasks {
            let rows = task.await.unwrap();
            // each batch lands contiguously
            assert_eq!(rows[1], rows[0] + 1);
            all_rows.extend(rows);
        }
        all_rows.sort_unstable();
        assert_eq!(all_rows, (0..16).collect::<Vec<u64>>());
        assert_eq!(shared.size().await, 16);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shared_index_runs_on_a_single_worker() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("idx");
        let shared = SharedIndex::new(VectorIndex::open(&base, 2).unwrap());

        let rows = shared
            .add(
                docs(&["a", "b", "c"]),
                vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![2.0, 0.0]],
                None,
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![0, 1, 2]);
        assert!(shared.tombstone(0).await.unwrap());
        assert_eq!(shared.compact().await.unwrap(), vec![(1, 0), (2, 1)]);

        let reader = shared.clone();
        let search = tokio::spawn(async move { reader.search(&[0.9, 0.0], 1).await });
        let hits = search.await.unwrap().unwrap();
        assert_eq!(hits[0].text, "b");
        assert!(matches!(
            shared.search(&[f32::NAN, 0.0], 1).await,
            Err(IndexError::NonFinite { .. })
        ));

        shared.persist().await.unwrap();
        let reloaded = VectorIndex::load(&base, 2).unwrap();
        assert_eq!(reloaded.row_count(), 2);
        assert_eq!(reloaded.get(0).unwrap().text, "b");
    }
}

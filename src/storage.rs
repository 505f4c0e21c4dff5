//! # Storage
//!
//! On-disk layout for a [`VectorIndex`](crate::vector_index::VectorIndex).
//!
//! Two artifacts share a base path:
//!
//! ```text
//! <base>.vec   row-major little-endian f32, row_count * dimension * 4 bytes
//! <base>.json  { "row_count", "dimension", "documents": [...], "checksum" }
//! ```
//!
//! `documents[i]` describes row `i` of the vector file. Tombstoned rows keep
//! their vector bytes so a later compaction can rebuild from the same files.
//!
//! Every write goes to a temp file in the target directory, is synced, and is
//! then renamed over the old artifact. The vector file is replaced first and
//! the sidecar last, so the sidecar is the commit point.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::vector_index::DocumentRecord;

const FLOAT_BYTES: usize = std::mem::size_of::<f32>();

/// The sidecar file as read from disk.
#[derive(Debug, Deserialize)]
struct Sidecar {
    row_count: u64,
    dimension: u32,
    documents: Vec<DocumentRecord>,
    /// blake3 of the vector file; absent in sidecars written without it.
    #[serde(default)]
    checksum: Option<String>,
}

/// The sidecar as written, borrowing the live document list.
#[derive(Serialize)]
struct SidecarRef<'a> {
    row_count: u64,
    dimension: u32,
    documents: &'a [DocumentRecord],
    checksum: String,
}

/// Resolved artifact paths for a base path.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub sidecar: PathBuf,
}

impl IndexPaths {
    /// The suffixes are appended to the whole base name, so `kb.v1` and
    /// `kb.v2` resolve to distinct artifacts.
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            vectors: with_suffix(base, ".vec"),
            sidecar: with_suffix(base, ".json"),
        }
    }

    pub fn vectors_exist(&self) -> bool {
        self.vectors.exists()
    }

    pub fn sidecar_exists(&self) -> bool {
        self.sidecar.exists()
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Encode a flat matrix as little-endian bytes.
pub fn encode_vectors(vectors: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vectors.len() * FLOAT_BYTES);
    for v in vectors {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes into a flat matrix. `bytes.len()` must be a
/// multiple of four; callers validate that first.
pub fn decode_vectors(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(FLOAT_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn write_atomic(target: &Path, bytes: &[u8]) -> IndexResult<()> {
    let persistence = |source: std::io::Error| IndexError::Persistence {
        path: target.to_path_buf(),
        source,
    };

    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(persistence)?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(persistence)?;
    tmp.write_all(bytes).map_err(persistence)?;
    tmp.as_file().sync_all().map_err(persistence)?;
    tmp.persist(target).map_err(|e| persistence(e.error))?;
    Ok(())
}

/// Write both artifacts. The sidecar is replaced only after the vector file.
pub fn write_index(
    paths: &IndexPaths,
    dimension: usize,
    vectors: &[f32],
    documents: &[DocumentRecord],
) -> IndexResult<()> {
    let bytes = encode_vectors(vectors);
    let sidecar = SidecarRef {
        row_count: documents.len() as u64,
        dimension: dimension as u32,
        documents,
        checksum: blake3::hash(&bytes).to_hex().to_string(),
    };
    let json = serde_json::to_vec(&sidecar).map_err(|e| IndexError::Persistence {
        path: paths.sidecar.clone(),
        source: std::io::Error::other(e),
    })?;

    write_atomic(&paths.vectors, &bytes)?;
    write_atomic(&paths.sidecar, &json)?;
    debug!(
        rows = sidecar.row_count,
        bytes = bytes.len(),
        path = %paths.vectors.display(),
        "index persisted"
    );
    Ok(())
}

/// Read and validate both artifacts.
///
/// Returns the flat vector matrix and the document list with row indices
/// assigned. Every inconsistency is a [`IndexError::CorruptIndex`]; nothing is
/// repaired.
pub fn read_index(
    paths: &IndexPaths,
    dimension: usize,
) -> IndexResult<(Vec<f32>, Vec<DocumentRecord>)> {
    let sidecar_bytes = fs::read(&paths.sidecar)
        .map_err(|e| IndexError::corrupt(&paths.sidecar, format!("unreadable sidecar: {e}")))?;
    let sidecar: Sidecar = serde_json::from_slice(&sidecar_bytes)
        .map_err(|e| IndexError::corrupt(&paths.sidecar, format!("malformed sidecar: {e}")))?;

    if sidecar.dimension as usize != dimension {
        return Err(IndexError::corrupt(
            &paths.sidecar,
            format!("dimension {} does not match configured {dimension}", sidecar.dimension),
        ));
    }
    if sidecar.row_count != sidecar.documents.len() as u64 {
        return Err(IndexError::corrupt(
            &paths.sidecar,
            format!(
                "row_count {} disagrees with {} documents",
                sidecar.row_count,
                sidecar.documents.len()
            ),
        ));
    }

    let bytes = fs::read(&paths.vectors)
        .map_err(|e| IndexError::corrupt(&paths.vectors, format!("unreadable vector file: {e}")))?;
    let row_bytes = dimension * FLOAT_BYTES;
    if row_bytes == 0 || bytes.len() % row_bytes != 0 {
        return Err(IndexError::corrupt(
            &paths.vectors,
            format!("size {} is not a multiple of a {dimension}-d row", bytes.len()),
        ));
    }
    let file_rows = (bytes.len() / row_bytes) as u64;
    if file_rows != sidecar.row_count {
        return Err(IndexError::corrupt(
            &paths.vectors,
            format!("holds {file_rows} rows, sidecar lists {}", sidecar.row_count),
        ));
    }
    if let Some(expected) = &sidecar.checksum {
        let actual = blake3::hash(&bytes).to_hex();
        if actual.as_str() != expected {
            return Err(IndexError::corrupt(&paths.vectors, "checksum mismatch"));
        }
    }

    let vectors = decode_vectors(&bytes);
    if let Err(e) = IndexError::check_finite(vectors.chunks_exact(dimension)) {
        return Err(IndexError::corrupt(&paths.vectors, e.to_string()));
    }

    let mut documents = sidecar.documents;
    for (row, doc) in documents.iter_mut().enumerate() {
        doc.row_index = row as u64;
    }
    Ok((vectors, documents))
}

//! An embedded, per-folder vector collection store.
//!
//! Each watched folder gets its own collection, persisted as a single JSON
//! file under `<cache_root>/chroma/<collection_name>.json`. There is no
//! external database process: loading, mutating, and atomically
//! rewriting the file on disk is the entire storage engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("failed to read collection file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write collection file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create collection directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("collection file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One embedded chunk of a source document, ready to persist.
///
/// Mirrors the Chroma metadata shape of the original daemon: `file_path`,
/// `file_name`, `mtime` and `folder` are stored on every chunk rather than
/// derived, so `get_indexed_files` can answer "what mtime did we last see
/// for this file" from the store alone when the side-car cache is invalid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub folder: PathBuf,
    pub chunk_index: usize,
    pub mtime: f64,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    chunks: Vec<ChunkRecord>,
}

/// A single folder's persisted chunk collection, loaded into memory.
pub struct Collection {
    path: PathBuf,
    data: CollectionFile,
}

impl Collection {
    async fn load_or_create(path: PathBuf) -> Result<Self, VectorStoreError> {
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let data: CollectionFile = serde_json::from_slice(&bytes)
                    .map_err(|source| VectorStoreError::Corrupt { path: path.clone(), source })?;
                Ok(Self { path, data })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self { path, data: CollectionFile::default() })
            }
            Err(source) => Err(VectorStoreError::Read { path, source }),
        }
    }

    /// Replaces all existing chunks for `chunks`'s file paths with the
    /// given chunks, then persists the collection atomically. Chunks for
    /// other files are left untouched.
    pub async fn upsert(&mut self, chunks: Vec<ChunkRecord>) -> Result<(), VectorStoreError> {
        let touched: std::collections::HashSet<&Path> =
            chunks.iter().map(|c| c.file_path.as_path()).collect();
        self.data.chunks.retain(|c| !touched.contains(c.file_path.as_path()));
        self.data.chunks.extend(chunks);
        self.persist().await
    }

    /// Removes every chunk belonging to `file_path`. Returns the number of
    /// chunks removed.
    pub async fn delete_by_path(&mut self, file_path: &Path) -> Result<usize, VectorStoreError> {
        let before = self.data.chunks.len();
        self.data.chunks.retain(|c| c.file_path != file_path);
        let removed = before - self.data.chunks.len();
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// The latest observed mtime per distinct file path currently
    /// represented in the collection. This is the fallback the initial
    /// scan uses to reconstruct "what was previously indexed" when the
    /// file-index cache is invalid — it is a full scan of the
    /// collection's metadata, not an O(1) operation, which is why the
    /// cache exists in the first place.
    #[must_use]
    pub fn get_indexed_files(&self) -> std::collections::HashMap<PathBuf, f64> {
        let mut files = std::collections::HashMap::new();
        for chunk in &self.data.chunks {
            let entry = files.entry(chunk.file_path.clone()).or_insert(chunk.mtime);
            if chunk.mtime > *entry {
                *entry = chunk.mtime;
            }
        }
        files
    }

    /// Total number of chunks in the collection. This is the trust-token
    /// value compared against the file-index cache's recorded `doc_count`
    /// to detect external tampering with the collection file.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.chunks.len()
    }

    pub fn chunks_for(&self, file_path: &Path) -> Vec<&ChunkRecord> {
        self.data.chunks.iter().filter(|c| c.file_path == file_path).collect()
    }

    async fn persist(&self) -> Result<(), VectorStoreError> {
        let bytes = serde_json::to_vec_pretty(&self.data)
            .map_err(|source| VectorStoreError::Corrupt { path: self.path.clone(), source })?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| VectorStoreError::Write { path: tmp_path.clone(), source })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| VectorStoreError::Write { path: self.path.clone(), source })
    }
}

/// Resolves collection files under a shared root directory.
pub struct VectorStore {
    collections_root: PathBuf,
}

impl VectorStore {
    #[must_use]
    pub fn new(cache_root: PathBuf) -> Self {
        Self { collections_root: cache_root.join("chroma") }
    }

    /// Stable collection name for a watched folder: `search-` followed by
    /// the first 16 hex characters of the SHA-256 digest of the folder's
    /// canonical path string.
    #[must_use]
    pub fn collection_name(folder_path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(folder_path.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        format!("search-{}", &hex[..16])
    }

    pub async fn get_or_create_collection(
        &self,
        folder_path: &Path,
    ) -> Result<Collection, VectorStoreError> {
        tokio::fs::create_dir_all(&self.collections_root)
            .await
            .map_err(|source| VectorStoreError::CreateDir {
                path: self.collections_root.clone(),
                source,
            })?;
        let name = Self::collection_name(folder_path);
        let path = self.collections_root.join(format!("{name}.json"));
        log::info!("using collection {name} for {}", folder_path.display());
        Collection::load_or_create(path).await
    }
}

/// Stable chunk id for a (file, chunk index) pair: first 32 hex characters
/// of the SHA-256 digest of `"{file_path}:{chunk_index}"`.
#[must_use]
pub fn chunk_id(file_path: &Path, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.to_string_lossy().as_bytes());
    hasher.update(b":");
    hasher.update(chunk_index.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

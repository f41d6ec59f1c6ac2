//! Per-folder file-index cache.
//!
//! Records, for each watched folder, the last-seen modification time of
//! every indexed file plus a `doc_count` trust token snapshotting how many
//! chunks the vector store held the last time this folder was fully
//! reconciled. The indexer compares `doc_count` against the store's live
//! `count()` to detect a collection file that was tampered with or lost
//! outside the daemon's control.
//!
//! The cache is a performance/consistency aid, not a source of truth: a
//! corrupt cache file is logged and treated as empty rather than treated
//! as a fatal error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct FolderEntry {
    doc_count: usize,
    files: HashMap<String, f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    folders: HashMap<String, FolderEntry>,
}

pub struct FileIndexCache {
    path: PathBuf,
    state: Mutex<CacheFile>,
}

impl FileIndexCache {
    /// Loads the cache from `path`. A missing file starts empty; a
    /// malformed file is logged and also starts empty rather than failing
    /// startup.
    pub async fn load(path: PathBuf) -> Self {
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!("cache file {} is malformed, starting empty: {err}", path.display());
                CacheFile::default()
            }),
            Err(_) => CacheFile::default(),
        };
        Self { path, state: Mutex::new(state) }
    }

    /// Recorded `(file_path -> mtime)` entries for `folder`.
    pub async fn get_files(&self, folder: &Path) -> HashMap<PathBuf, f64> {
        let state = self.state.lock().await;
        state
            .folders
            .get(&folder_key(folder))
            .map(|entry| {
                entry
                    .files
                    .iter()
                    .map(|(k, v)| (PathBuf::from(k), *v))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The `doc_count` trust token last recorded for `folder`.
    pub async fn get_doc_count(&self, folder: &Path) -> usize {
        let state = self.state.lock().await;
        state.folders.get(&folder_key(folder)).map_or(0, |e| e.doc_count)
    }

    /// Records `file_path`'s mtime and the vector store's chunk count
    /// observed immediately after the mutation that indexed it, in a
    /// single atomic write — so a crash between the two can never leave
    /// the cache's mtime and `doc_count` bookkeeping out of sync with each
    /// other (only, at worst, stale relative to the store, which the next
    /// scan's consistency check catches).
    pub async fn set_file(&self, folder: &Path, file_path: &Path, mtime: f64, doc_count: usize) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        let entry = state.folders.entry(folder_key(folder)).or_default();
        entry.files.insert(file_path.to_string_lossy().into_owned(), mtime);
        entry.doc_count = doc_count;
        self.persist(&state).await
    }

    /// Drops `file_path`'s entry and records the vector store's chunk count
    /// observed immediately after the corresponding delete, atomically.
    pub async fn remove_file(&self, folder: &Path, file_path: &Path, doc_count: usize) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        let entry = state.folders.entry(folder_key(folder)).or_default();
        entry.files.remove(&file_path.to_string_lossy().into_owned());
        entry.doc_count = doc_count;
        self.persist(&state).await
    }

    /// Updates the `doc_count` trust token for `folder` to the vector
    /// store's current chunk count, without touching any file entry. Used
    /// by the initial scan's pruning step, where several files may be
    /// removed before a single trailing count is recorded.
    pub async fn set_doc_count(&self, folder: &Path, doc_count: usize) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        state.folders.entry(folder_key(folder)).or_default().doc_count = doc_count;
        self.persist(&state).await
    }

    /// Drops all cached state for `folder`, forcing the next scan to treat
    /// every file as new.
    pub async fn invalidate(&self, folder: &Path) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        state.folders.remove(&folder_key(folder));
        self.persist(&state).await
    }

    async fn persist(&self, state: &CacheFile) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(state).expect("CacheFile always serializes");
        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::Write { path: parent.to_path_buf(), source })?;
        }
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| CacheError::Write { path: tmp_path.clone(), source })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| CacheError::Write { path: self.path.clone(), source })
    }
}

fn folder_key(folder: &Path) -> String {
    folder.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn unknown_folder_returns_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileIndexCache::load(dir.path().join("file-index.json")).await;
        let folder = Path::new("/watched/folder");

        assert!(cache.get_files(folder).await.is_empty());
        assert_eq!(cache.get_doc_count(folder).await, 0);
    }

    #[tokio::test]
    async fn set_and_get_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileIndexCache::load(dir.path().join("file-index.json")).await;
        let folder = Path::new("/watched/folder");

        cache.set_file(folder, Path::new("a.txt"), 100.5, 1).await.unwrap();
        let files = cache.get_files(folder).await;
        assert_eq!(files.get(Path::new("a.txt")), Some(&100.5));
        assert_eq!(cache.get_doc_count(folder).await, 1);
    }

    #[tokio::test]
    async fn remove_file_drops_entry_and_updates_doc_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileIndexCache::load(dir.path().join("file-index.json")).await;
        let folder = Path::new("/watched/folder");

        cache.set_file(folder, Path::new("a.txt"), 1.0, 1).await.unwrap();
        cache.remove_file(folder, Path::new("a.txt"), 0).await.unwrap();
        assert!(cache.get_files(folder).await.is_empty());
        assert_eq!(cache.get_doc_count(folder).await, 0);
    }

    #[tokio::test]
    async fn doc_count_tracks_independently_of_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileIndexCache::load(dir.path().join("file-index.json")).await;
        let folder = Path::new("/watched/folder");

        cache.set_doc_count(folder, 42).await.unwrap();
        assert_eq!(cache.get_doc_count(folder).await, 42);
    }

    #[tokio::test]
    async fn invalidate_clears_both_files_and_doc_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileIndexCache::load(dir.path().join("file-index.json")).await;
        let folder = Path::new("/watched/folder");

        cache.set_file(folder, Path::new("a.txt"), 1.0, 5).await.unwrap();
        cache.invalidate(folder).await.unwrap();

        assert!(cache.get_files(folder).await.is_empty());
        assert_eq!(cache.get_doc_count(folder).await, 0);
    }

    #[tokio::test]
    async fn state_survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index.json");
        let folder = Path::new("/watched/folder");

        {
            let cache = FileIndexCache::load(path.clone()).await;
            cache.set_file(folder, Path::new("a.txt"), 7.0, 1).await.unwrap();
        }

        let reloaded = FileIndexCache::load(path).await;
        let files = reloaded.get_files(folder).await;
        assert_eq!(files.get(Path::new("a.txt")), Some(&7.0));
    }

    #[tokio::test]
    async fn malformed_cache_file_starts_empty_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let cache = FileIndexCache::load(path).await;
        assert!(cache.get_files(Path::new("/watched/folder")).await.is_empty());
    }
}

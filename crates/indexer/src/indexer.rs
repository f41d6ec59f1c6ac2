//! The incremental sync engine (spec component H): single-file
//! index/remove, and the initial-scan/cache-validation/pruning sequence
//! that keeps a folder's collection, the file-index cache, and the
//! filesystem in agreement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use walkdir::WalkDir;

use semsync_cache::FileIndexCache;
use semsync_chunker::Chunker;
use semsync_config::{FolderConfig, Settings};
use semsync_embedder::EmbeddingBackend;
use semsync_status::StatusTracker;
use semsync_vector_store::{chunk_id, ChunkRecord, Collection, VectorStore};

use crate::error::{IndexerError, Result};

/// Owns the shared resources the sync engine mutates, and serializes
/// access per folder so a live filesystem event and a background
/// force-reindex scan never race on the same collection.
pub struct Indexer {
    store: Arc<VectorStore>,
    cache: Arc<FileIndexCache>,
    status: Arc<StatusTracker>,
    embedder: Arc<dyn EmbeddingBackend>,
    settings: Settings,
    folder_locks: std::sync::Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl Indexer {
    #[must_use]
    pub fn new(
        store: Arc<VectorStore>,
        cache: Arc<FileIndexCache>,
        status: Arc<StatusTracker>,
        embedder: Arc<dyn EmbeddingBackend>,
        settings: Settings,
    ) -> Self {
        Self { store, cache, status, embedder, settings, folder_locks: std::sync::Mutex::new(HashMap::new()) }
    }

    fn folder_lock(&self, folder: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self.folder_locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(folder.to_path_buf()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }

    /// Indexes (or re-indexes) a single file. A no-op if the extension is
    /// not allowed for `folder` or the path is not a regular file.
    /// `progress` is `Some((i, total))` during an initial scan; `None` for
    /// a live filesystem event.
    pub async fn index_file(
        &self,
        folder: &FolderConfig,
        path: &Path,
        progress: Option<(usize, usize)>,
    ) -> Result<()> {
        if !extension_allowed(path, &folder.extensions) {
            return Ok(());
        }
        if !tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false) {
            return Ok(());
        }

        let lock = self.folder_lock(&folder.path);
        let _guard = lock.lock().await;
        let mut collection = self.store.get_or_create_collection(&folder.path).await?;
        self.index_file_locked(&mut collection, folder, path, progress).await
    }

    async fn index_file_locked(
        &self,
        collection: &mut Collection,
        folder: &FolderConfig,
        path: &Path,
        progress: Option<(usize, usize)>,
    ) -> Result<()> {
        let mtime = match mtime_secs(path).await {
            Ok(mtime) => mtime,
            Err(_) => return Ok(()), // vanished between enumeration and stat
        };

        let path_owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || semsync_parser::parse_file(&path_owned))
            .await
            .map_err(|e| IndexerError::Other(e.to_string()))?;
        let Some(text) = text else {
            return Ok(());
        };
        if text.trim().is_empty() {
            return Ok(());
        }

        let chunker = Chunker::new(self.chunker_config()?);
        let texts = chunker.chunk_text(&text);
        if texts.is_empty() {
            return Ok(());
        }

        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        match progress {
            Some((i, total)) => {
                self.status.advance_scan_indexing(&folder.path, i, &file_name).await?;
                let _ = total;
            }
            None => {
                self.status.begin_live_indexing(&folder.path, &file_name).await?;
            }
        }

        collection.delete_by_path(path).await?;

        let embedder = Arc::clone(&self.embedder);
        let model = self.settings.model.clone();
        let batch_size = self.settings.batch_size;
        let texts_for_embed = texts.clone();
        let vectors = tokio::task::spawn_blocking(move || embedder.embed(&texts_for_embed, &model, batch_size))
            .await
            .map_err(|e| IndexerError::Other(e.to_string()))??;

        let folder_path = folder.path.clone();
        let records: Vec<ChunkRecord> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| ChunkRecord {
                chunk_id: chunk_id(path, i),
                file_path: path.to_path_buf(),
                file_name: file_name.clone(),
                folder: folder_path.clone(),
                chunk_index: i,
                mtime,
                text,
                embedding,
            })
            .collect();
        collection.upsert(records).await?;

        let doc_count = collection.count();
        self.cache.set_file(&folder.path, path, mtime, doc_count).await?;

        if progress.is_none() {
            let total = self.cache.get_files(&folder.path).await.len();
            self.status.finish_live_indexing(&folder.path, total).await?;
        }

        Ok(())
    }

    /// Removes a single file's chunks from its folder's collection, and
    /// the corresponding cache entry.
    pub async fn remove_file(&self, folder: &FolderConfig, path: &Path) -> Result<()> {
        let lock = self.folder_lock(&folder.path);
        let _guard = lock.lock().await;
        let mut collection = self.store.get_or_create_collection(&folder.path).await?;

        collection.delete_by_path(path).await?;
        let doc_count = collection.count();
        self.cache.remove_file(&folder.path, path, doc_count).await?;

        let total = self.cache.get_files(&folder.path).await.len();
        self.status.live_remove_complete(&folder.path, total).await?;
        Ok(())
    }

    /// Performs the full initial scan of `folder`: enumerate eligible
    /// files, validate the cache against the store's live chunk count,
    /// index changed files, and prune entries for files no longer on
    /// disk.
    ///
    /// `stop` is checked at each file boundary; once it fires the scan
    /// abandons the remaining files (and the pruning pass) and returns
    /// early rather than completing the reconciliation, so a shutdown
    /// request never waits on a long-running scan to visit every file.
    pub async fn initial_scan(&self, folder: &FolderConfig, stop: &watch::Receiver<bool>) -> Result<()> {
        let lock = self.folder_lock(&folder.path);
        let _guard = lock.lock().await;
        let mut collection = self.store.get_or_create_collection(&folder.path).await?;
        let collection_name = VectorStore::collection_name(&folder.path);

        let mut entries: Vec<PathBuf> = WalkDir::new(&folder.path)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| extension_allowed(path, &folder.extensions))
            .collect();
        entries.sort();

        let on_disk: std::collections::HashSet<PathBuf> = entries.iter().cloned().collect();

        self.status.begin_scan(&folder.path, &collection_name, entries.len()).await?;

        let cached_doc_count = self.cache.get_doc_count(&folder.path).await;
        let db_doc_count = collection.count();
        let cache_valid = cached_doc_count == db_doc_count;
        let known_files: HashMap<PathBuf, f64> = if cache_valid {
            self.cache.get_files(&folder.path).await
        } else {
            log::warn!(
                "cache doc_count ({cached_doc_count}) != store count ({db_doc_count}) for {}, invalidating",
                folder.path.display()
            );
            self.cache.invalidate(&folder.path).await?;
            HashMap::new()
        };

        let total = entries.len();
        for (i, path) in entries.iter().enumerate() {
            if *stop.borrow() {
                log::info!("aborting scan of {} at file boundary: shutdown requested", folder.path.display());
                return Ok(());
            }
            let current_mtime = match mtime_secs(path).await {
                Ok(mtime) => mtime,
                Err(_) => continue,
            };
            if known_files.get(path).is_some_and(|&cached| (cached - current_mtime).abs() < f64::EPSILON) {
                continue;
            }
            if let Err(err) = self.index_file_locked(&mut collection, folder, path, Some((i + 1, total))).await {
                log::warn!("failed to index {}: {err}", path.display());
            }
        }

        let previously_indexed: Vec<PathBuf> = if cache_valid {
            known_files.into_keys().collect()
        } else {
            collection.get_indexed_files().into_keys().collect()
        };
        for path in previously_indexed {
            if !on_disk.contains(&path) {
                collection.delete_by_path(&path).await?;
                self.cache.remove_file(&folder.path, &path, collection.count()).await?;
            }
        }

        let final_count = collection.count();
        self.cache.set_doc_count(&folder.path, final_count).await?;
        self.status.finish_scan(&folder.path).await?;
        Ok(())
    }

    /// Invalidates `folder`'s cache entry, then runs a full initial scan.
    /// This is the force-reindex path the reindex poll loop drives: by
    /// invalidating first, every file is re-embedded regardless of
    /// whether its mtime has changed, rather than relying on the scan's
    /// own doc-count consistency check (which would see no drift and
    /// skip everything if nothing external actually changed).
    pub async fn force_reindex(&self, folder: &FolderConfig, stop: &watch::Receiver<bool>) -> Result<()> {
        self.cache.invalidate(&folder.path).await?;
        self.initial_scan(folder, stop).await
    }

    fn chunker_config(&self) -> Result<semsync_chunker::ChunkerConfig> {
        semsync_chunker::ChunkerConfig::new(self.settings.chunk_size, self.settings.chunk_overlap)
            .map_err(|e| IndexerError::Other(e.to_string()))
    }
}

pub(crate) fn extension_allowed(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)))
}

async fn mtime_secs(path: &Path) -> std::io::Result<f64> {
    let metadata = tokio::fs::metadata(path).await?;
    let modified = metadata.modified()?;
    let duration = modified.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    Ok(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use semsync_config::FolderConfig;

    fn settings() -> Settings {
        Settings {
            model: "test-model".to_string(),
            chunk_size: 100,
            chunk_overlap: 0,
            batch_size: 8,
            extensions: vec!["txt".to_string()],
        }
    }

    fn test_embedder() -> Arc<dyn EmbeddingBackend> {
        Arc::new(semsync_embedder::FixedVectorEmbedder::new(4))
    }

    fn never_stop() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    async fn new_indexer(root: &Path) -> (Indexer, Arc<FileIndexCache>, Arc<StatusTracker>) {
        let store = Arc::new(VectorStore::new(root.join("store")));
        let cache = Arc::new(FileIndexCache::load(root.join("file-index.json")).await);
        let (status, _rx) = StatusTracker::load(root.join("status.json")).await;
        let indexer =
            Indexer::new(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&status), test_embedder(), settings());
        (indexer, cache, status)
    }

    #[tokio::test]
    async fn index_file_with_unparseable_contents_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched");
        tokio::fs::create_dir(&watched).await.unwrap();
        let file = watched.join("empty.txt");
        tokio::fs::write(&file, b"   \n\t  ").await.unwrap();

        let (indexer, cache, _status) = new_indexer(dir.path()).await;
        let folder = FolderConfig { path: watched.clone(), extensions: vec!["txt".to_string()] };

        indexer.index_file(&folder, &file, None).await.unwrap();

        assert!(cache.get_files(&watched).await.is_empty());
        assert_eq!(cache.get_doc_count(&watched).await, 0);
    }

    #[tokio::test]
    async fn index_file_rejects_disallowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched");
        tokio::fs::create_dir(&watched).await.unwrap();
        let file = watched.join("note.md");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let (indexer, cache, _status) = new_indexer(dir.path()).await;
        let folder = FolderConfig { path: watched.clone(), extensions: vec!["txt".to_string()] };

        indexer.index_file(&folder, &file, None).await.unwrap();
        assert!(cache.get_files(&watched).await.is_empty());
    }

    #[tokio::test]
    async fn initial_scan_on_empty_folder_sets_watching_with_zero_total() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched");
        tokio::fs::create_dir(&watched).await.unwrap();

        let (indexer, _cache, status) = new_indexer(dir.path()).await;
        let folder = FolderConfig { path: watched.clone(), extensions: vec!["txt".to_string()] };

        indexer.initial_scan(&folder, &never_stop()).await.unwrap();

        let mut rx = status.subscribe();
        let doc = rx.borrow_and_update().clone();
        let folder_status = doc.folders.get(&watched.to_string_lossy().into_owned()).unwrap();
        assert_eq!(folder_status.total_files, 0);
        assert!(folder_status.last_full_index.is_some());
    }

    #[tokio::test]
    async fn remove_file_clears_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched");
        tokio::fs::create_dir(&watched).await.unwrap();
        let file = watched.join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let (indexer, cache, _status) = new_indexer(dir.path()).await;
        let folder = FolderConfig { path: watched.clone(), extensions: vec!["txt".to_string()] };

        cache.set_file(&watched, &file, 1.0, 1).await.unwrap();

        indexer.remove_file(&folder, &file).await.unwrap();

        assert!(cache.get_files(&watched).await.is_empty());
        assert_eq!(cache.get_doc_count(&watched).await, 0);
    }
}

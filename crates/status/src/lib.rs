//! Tracks per-folder indexing status for external observers (the daemon
//! log, and a menu-bar-style UI reading `status.json` directly).
//!
//! Status is held three ways at once: in memory (source of truth for the
//! current process), broadcast over a [`tokio::sync::watch`] channel for
//! in-process subscribers, and mirrored to an atomically-written JSON file
//! so an external process can poll it without an IPC mechanism. The
//! top-level `updated_at` is the liveness signal an external UI polls: a
//! daemon that stops heartbeating for more than ~12s (2x the 5s heartbeat
//! interval) is considered dead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("failed to write status file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderState {
    Scanning,
    Indexing,
    Watching,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderStatus {
    pub state: FolderState,
    pub total_files: usize,
    pub indexed_files: usize,
    pub current_file: Option<String>,
    pub last_full_index: Option<String>,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub daemon_pid: u32,
    pub daemon_started: String,
    pub updated_at: String,
    pub folders: HashMap<String, FolderStatus>,
}

impl StatusDocument {
    fn fresh() -> Self {
        let now = now_iso();
        Self { daemon_pid: std::process::id(), daemon_started: now.clone(), updated_at: now, folders: HashMap::new() }
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub struct StatusTracker {
    path: PathBuf,
    state: Mutex<StatusDocument>,
    watch_tx: watch::Sender<StatusDocument>,
}

impl StatusTracker {
    /// Starts a fresh status document stamped with this process's pid and
    /// start time. A prior daemon's last-known `status.json` is not
    /// loaded back in: folder state is meaningless until this process
    /// re-scans.
    pub async fn load(path: PathBuf) -> (Arc<Self>, watch::Receiver<StatusDocument>) {
        let initial = StatusDocument::fresh();
        let (watch_tx, watch_rx) = watch::channel(initial.clone());
        let tracker = Arc::new(Self { path, state: Mutex::new(initial), watch_tx });
        (tracker, watch_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusDocument> {
        self.watch_tx.subscribe()
    }

    /// (none) -> scanning: initial scan begins.
    pub async fn begin_scan(&self, folder: &Path, collection: &str, total_files: usize) -> Result<(), StatusError> {
        self.set(folder, FolderStatus {
            state: FolderState::Scanning,
            total_files,
            indexed_files: 0,
            current_file: None,
            last_full_index: None,
            collection: collection.to_string(),
        }).await
    }

    /// scanning -> indexing: first file actually embedded during the scan.
    /// indexing -> indexing: next file indexed.
    pub async fn advance_scan_indexing(&self, folder: &Path, indexed_files: usize, current_file: &str) -> Result<(), StatusError> {
        self.update(folder, |status| {
            status.state = FolderState::Indexing;
            status.indexed_files = indexed_files;
            status.current_file = Some(current_file.to_string());
        }).await
    }

    /// indexing -> watching (scan complete), or scanning -> watching
    /// (scan complete with zero files to index, all cached).
    pub async fn finish_scan(&self, folder: &Path) -> Result<(), StatusError> {
        let now = now_iso();
        self.update(folder, |status| {
            status.state = FolderState::Watching;
            status.indexed_files = status.total_files;
            status.current_file = None;
            status.last_full_index = Some(now);
        }).await
    }

    /// watching -> indexing: a live filesystem event causes (re-)indexing.
    pub async fn begin_live_indexing(&self, folder: &Path, current_file: &str) -> Result<(), StatusError> {
        self.update(folder, |status| {
            status.state = FolderState::Indexing;
            status.current_file = Some(current_file.to_string());
        }).await
    }

    /// indexing -> watching: a live (re-)index completes.
    pub async fn finish_live_indexing(&self, folder: &Path, total_files: usize) -> Result<(), StatusError> {
        self.update(folder, |status| {
            status.state = FolderState::Watching;
            status.total_files = total_files;
            status.indexed_files = total_files;
            status.current_file = None;
        }).await
    }

    /// watching -> watching: a live remove completes.
    pub async fn live_remove_complete(&self, folder: &Path, total_files: usize) -> Result<(), StatusError> {
        self.update(folder, |status| {
            status.state = FolderState::Watching;
            status.total_files = total_files;
            status.indexed_files = total_files;
        }).await
    }

    async fn update(&self, folder: &Path, f: impl FnOnce(&mut FolderStatus)) -> Result<(), StatusError> {
        let mut state = self.state.lock().await;
        let entry = state.folders.entry(folder_key(folder)).or_insert_with(|| FolderStatus {
            state: FolderState::Scanning,
            total_files: 0,
            indexed_files: 0,
            current_file: None,
            last_full_index: None,
            collection: String::new(),
        });
        f(entry);
        state.updated_at = now_iso();
        self.persist(&state).await?;
        let _ = self.watch_tx.send(state.clone());
        Ok(())
    }

    async fn set(&self, folder: &Path, status: FolderStatus) -> Result<(), StatusError> {
        let mut state = self.state.lock().await;
        state.folders.insert(folder_key(folder), status);
        state.updated_at = now_iso();
        self.persist(&state).await?;
        let _ = self.watch_tx.send(state.clone());
        Ok(())
    }

    async fn persist(&self, state: &StatusDocument) -> Result<(), StatusError> {
        let bytes = serde_json::to_vec_pretty(state).expect("StatusDocument always serializes");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StatusError::Write { path: parent.to_path_buf(), source })?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| StatusError::Write { path: tmp_path.clone(), source })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| StatusError::Write { path: self.path.clone(), source })
    }

    /// Rewrites the document's `updated_at` every `interval`, so an
    /// external reader of `status.json` can tell a live-but-idle daemon
    /// apart from a crashed one.
    pub fn start_heartbeat(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut state = self.state.lock().await;
                state.updated_at = now_iso();
                if let Err(err) = self.persist(&state).await {
                    log::warn!("heartbeat failed to persist status: {err}");
                }
                let _ = self.watch_tx.send(state.clone());
            }
        })
    }
}

fn folder_key(folder: &Path) -> String {
    folder.to_string_lossy().into_owned()
}

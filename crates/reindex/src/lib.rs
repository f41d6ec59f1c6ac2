//! A file-backed mailbox for out-of-process "reindex this folder now"
//! requests (e.g. from a menu-bar UI button).
//!
//! Requests accumulate, deduplicated by folder path, until the daemon's
//! poll loop calls [`ReindexMailbox::pop_requests`], which atomically
//! drains and deletes the backing file.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ReindexError {
    #[error("failed to write reindex requests file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct ReindexMailbox {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ReindexMailbox {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, lock: Mutex::new(()) }
    }

    /// Appends `folder` to the pending-requests list, deduplicating by
    /// exact path. A no-op if `folder` is already queued.
    pub async fn request_reindex(&self, folder: &Path) -> Result<(), ReindexError> {
        let _guard = self.lock.lock().await;
        let mut requests = self.read().await;
        let entry = folder.to_path_buf();
        if !requests.contains(&entry) {
            requests.push(entry);
        }
        self.write(&requests).await
    }

    /// Reads and clears all pending requests. Returns an empty vec if no
    /// requests are pending; deletes the backing file once drained.
    pub async fn pop_requests(&self) -> Result<Vec<PathBuf>, ReindexError> {
        let _guard = self.lock.lock().await;
        let requests = self.read().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(ReindexError::Write { path: self.path.clone(), source }),
        }
        Ok(requests)
    }

    async fn read(&self) -> Vec<PathBuf> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn write(&self, requests: &[PathBuf]) -> Result<(), ReindexError> {
        let bytes = serde_json::to_vec_pretty(requests).expect("Vec<PathBuf> always serializes");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ReindexError::Write { path: parent.to_path_buf(), source })?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| ReindexError::Write { path: tmp_path.clone(), source })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| ReindexError::Write { path: self.path.clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn pop_on_empty_mailbox_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = ReindexMailbox::new(dir.path().join("reindex-requests.json"));
        assert!(mailbox.pop_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_then_pop_returns_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = ReindexMailbox::new(dir.path().join("reindex-requests.json"));
        let folder = Path::new("/watched/folder");

        mailbox.request_reindex(folder).await.unwrap();
        let requests = mailbox.pop_requests().await.unwrap();

        assert_eq!(requests, vec![folder.to_path_buf()]);
    }

    #[tokio::test]
    async fn duplicate_requests_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = ReindexMailbox::new(dir.path().join("reindex-requests.json"));
        let folder = Path::new("/watched/folder");

        mailbox.request_reindex(folder).await.unwrap();
        mailbox.request_reindex(folder).await.unwrap();
        let requests = mailbox.pop_requests().await.unwrap();

        assert_eq!(requests, vec![folder.to_path_buf()]);
    }

    #[tokio::test]
    async fn pop_clears_the_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reindex-requests.json");
        let mailbox = ReindexMailbox::new(path.clone());

        mailbox.request_reindex(Path::new("/a")).await.unwrap();
        mailbox.pop_requests().await.unwrap();

        assert!(!path.exists());
        assert!(mailbox.pop_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn multiple_distinct_folders_all_returned() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = ReindexMailbox::new(dir.path().join("reindex-requests.json"));

        mailbox.request_reindex(Path::new("/a")).await.unwrap();
        mailbox.request_reindex(Path::new("/b")).await.unwrap();
        let requests = mailbox.pop_requests().await.unwrap();

        assert_eq!(requests, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}

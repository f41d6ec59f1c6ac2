//! The daemon loop (spec component I): runs the initial scan for every
//! configured folder, then keeps each folder's collection in sync with
//! live filesystem events and out-of-process force-reindex requests
//! until a termination signal arrives.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use semsync_config::{Config, FolderConfig};
use semsync_reindex::ReindexMailbox;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::indexer::Indexer;

const REINDEX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Wires together the configured folders, the sync engine, and the
/// reindex mailbox into the daemon's long-running event loop.
pub struct Daemon {
    config: Config,
    indexer: Arc<Indexer>,
    mailbox: Arc<ReindexMailbox>,
}

impl Daemon {
    #[must_use]
    pub fn new(config: Config, indexer: Arc<Indexer>, mailbox: Arc<ReindexMailbox>) -> Self {
        Self { config, indexer, mailbox }
    }

    /// Runs the daemon until SIGINT/SIGTERM. Performs every folder's
    /// initial scan up front, then starts one filesystem watcher task per
    /// folder and a single reindex-poll task, and blocks until a
    /// termination signal is observed.
    ///
    /// The stop signal is created before the startup scans run, so a
    /// termination signal received mid-scan is honored at the next file
    /// boundary (see `Indexer::initial_scan`) instead of only taking effect
    /// once live watching has started.
    pub async fn run(self) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        spawn_signal_listener(stop_tx);

        for folder in &self.config.folders {
            self.indexer.initial_scan(folder, &stop_rx).await?;
        }

        let mut watchers = Vec::new();
        let mut handles = Vec::new();
        for folder in self.config.folders.clone() {
            let (tx, rx) = mpsc::channel(1024);
            let watcher = create_fs_watcher(&folder.path, tx)?;
            watchers.push(watcher);

            let indexer = Arc::clone(&self.indexer);
            let stop_rx = stop_rx.clone();
            handles.push(tokio::spawn(run_folder_event_loop(indexer, folder, rx, stop_rx)));
        }

        let in_flight_scans = Arc::new(StdMutex::new(HashSet::new()));
        handles.push(tokio::spawn(run_reindex_poll(
            Arc::clone(&self.indexer),
            Arc::clone(&self.mailbox),
            self.config.folders.clone(),
            in_flight_scans,
            stop_rx.clone(),
        )));

        let mut rx = stop_rx;
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        drop(watchers);
        Ok(())
    }
}

/// Installs a `RecommendedWatcher` on `path` (recursively) whose callback
/// forwards every event onto `tx`. The watcher must be kept alive for as
/// long as events are wanted; dropping it stops delivery.
fn create_fs_watcher(path: &Path, tx: mpsc::Sender<notify::Result<Event>>) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.blocking_send(res);
        },
        notify::Config::default(),
    )
    .map_err(|e| crate::error::IndexerError::Other(e.to_string()))?;
    watcher
        .watch(path, RecursiveMode::Recursive)
        .map_err(|e| crate::error::IndexerError::Other(e.to_string()))?;
    Ok(watcher)
}

/// Consumes one folder's filesystem events until `stop` fires, dispatching
/// each to `index_file` or `remove_file`. A rename/move event is split
/// into a remove of the source path followed by an index of the
/// destination path.
async fn run_folder_event_loop(
    indexer: Arc<Indexer>,
    folder: FolderConfig,
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    Ok(event) => handle_fs_event(&indexer, &folder, event).await,
                    Err(err) => log::warn!("filesystem watch error for {}: {err}", folder.path.display()),
                }
            }
        }
    }
}

async fn handle_fs_event(indexer: &Indexer, folder: &FolderConfig, event: Event) {
    use notify::event::{ModifyKind, RenameMode};

    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                index_one(indexer, folder, path).await;
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            remove_one(indexer, folder, &event.paths[0]).await;
            index_one(indexer, folder, &event.paths[1]).await;
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                remove_one(indexer, folder, path).await;
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                index_one(indexer, folder, path).await;
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                index_one(indexer, folder, path).await;
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                remove_one(indexer, folder, path).await;
            }
        }
        EventKind::Access(_) | EventKind::Other | EventKind::Any => {}
    }
}

/// Relevance test is extension-only (spec §4.I): a live event for a path
/// whose extension isn't in the folder's allowed set is ignored entirely,
/// before ever touching the collection/cache/status for this folder.
async fn index_one(indexer: &Indexer, folder: &FolderConfig, path: &Path) {
    if !crate::indexer::extension_allowed(path, &folder.extensions) {
        return;
    }
    if let Err(err) = indexer.index_file(folder, path, None).await {
        log::warn!("failed to index {}: {err}", path.display());
    }
}

async fn remove_one(indexer: &Indexer, folder: &FolderConfig, path: &Path) {
    if !crate::indexer::extension_allowed(path, &folder.extensions) {
        return;
    }
    if let Err(err) = indexer.remove_file(folder, path).await {
        log::warn!("failed to remove {}: {err}", path.display());
    }
}

/// Polls the reindex mailbox every [`REINDEX_POLL_INTERVAL`] and launches
/// a background `initial_scan` for each requested folder that isn't
/// already being scanned, so a burst of duplicate requests for the same
/// folder doesn't start overlapping rebuilds.
///
/// Every spawned scan's `JoinHandle` is tracked locally; once `stop` fires
/// the poll loop stops accepting new requests and awaits every in-flight
/// scan before returning, so this task (and, through it, the scans it
/// launched) reaches quiescence rather than being dropped mid-flight when
/// the daemon's runtime shuts down.
async fn run_reindex_poll(
    indexer: Arc<Indexer>,
    mailbox: Arc<ReindexMailbox>,
    folders: Vec<FolderConfig>,
    in_flight: Arc<StdMutex<HashSet<PathBuf>>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(REINDEX_POLL_INTERVAL);
    let mut scan_handles: Vec<JoinHandle<()>> = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let requests = match mailbox.pop_requests().await {
                    Ok(requests) => requests,
                    Err(err) => {
                        log::warn!("failed to read reindex requests: {err}");
                        continue;
                    }
                };
                for requested in requests {
                    let Some(folder) = folders.iter().find(|f| f.path == requested).cloned() else {
                        log::warn!("reindex requested for unconfigured folder {}", requested.display());
                        continue;
                    };
                    let already_running = {
                        let mut guard = in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                        !guard.insert(folder.path.clone())
                    };
                    if already_running {
                        log::info!("reindex already in progress for {}, skipping", folder.path.display());
                        continue;
                    }
                    let indexer = Arc::clone(&indexer);
                    let in_flight = Arc::clone(&in_flight);
                    let scan_stop = stop.clone();
                    scan_handles.push(tokio::spawn(async move {
                        if let Err(err) = indexer.force_reindex(&folder, &scan_stop).await {
                            log::warn!("force reindex failed for {}: {err}", folder.path.display());
                        }
                        in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&folder.path);
                    }));
                }
            }
        }
    }

    for handle in scan_handles {
        let _ = handle.await;
    }
}

#[cfg(unix)]
fn spawn_signal_listener(stop_tx: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                log::warn!("failed to install SIGTERM handler: {err}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("termination signal received, shutting down");
        let _ = stop_tx.send(true);
    });
}

#[cfg(not(unix))]
fn spawn_signal_listener(stop_tx: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("termination signal received, shutting down");
        let _ = stop_tx.send(true);
    });
}

//! Entry point for the semantic search sync daemon: parses CLI flags,
//! wires up logging, loads configuration, and runs the sync/watch loop
//! until a termination signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::prelude::*;

use semsync_cache::FileIndexCache;
use semsync_embedder::{Embedder, EmbeddingBackend};
use semsync_indexer::{Daemon, Indexer};
use semsync_reindex::ReindexMailbox;
use semsync_status::StatusTracker;
use semsync_vector_store::VectorStore;

const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "search-daemon")]
#[command(about = "Keeps per-folder semantic search collections in sync with the filesystem")]
struct Cli {
    /// Path to the TOML config file (default: ~/.config/search-daemon/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Logging verbosity: error, warn, info, debug, or trace
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("could not resolve home directory"))?;
    Ok(home.join(".config/search-daemon/config.toml"))
}

fn cache_root() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("could not resolve home directory"))?;
    Ok(home.join(".cache/search-mcp"))
}

/// Installs a dual-sink `tracing` subscriber (stdout + rotating file under
/// `<cache_root>/daemon.log`) and bridges the `log` facade (used by the
/// library crates) into it, so every crate's logging lands in both sinks.
/// Third-party embedding backends (`ort`, `tokenizers`) are noisy at
/// `info`/`debug` and are defaulted to `warn`, mirroring the original
/// daemon's suppression of `httpx`/`huggingface_hub`/`sentence_transformers`.
fn init_logging(cache_root: &std::path::Path, log_level: &str) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(cache_root)?;
    let file_appender = tracing_appender::rolling::never(cache_root, "daemon.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_directive = format!("{log_level},ort=warn,tokenizers=warn");
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let file_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking_writer);

    tracing_subscriber::registry().with(env_filter).with(stdout_layer).with(file_layer).init();
    tracing_log::LogTracer::init()?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cache_root = cache_root()?;
    let _log_guard = init_logging(&cache_root, &cli.log_level)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    let config = match semsync_config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("config error: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(folders = config.folders.len(), "starting search daemon");

    let store = Arc::new(VectorStore::new(cache_root.clone()));
    let cache = Arc::new(FileIndexCache::load(cache_root.join("file-index.json")).await);
    let (status, _status_rx) = StatusTracker::load(cache_root.join("status.json")).await;
    Arc::clone(&status).start_heartbeat(HEARTBEAT_INTERVAL);
    let mailbox = Arc::new(ReindexMailbox::new(cache_root.join("reindex-requests.json")));
    let embedder: Arc<dyn EmbeddingBackend> = Arc::new(Embedder::new(cache_root.join("models")));

    let indexer = Arc::new(Indexer::new(store, cache, status, embedder, config.settings.clone()));
    let daemon = Daemon::new(config, indexer, mailbox);

    daemon.run().await?;

    tracing::info!("search daemon stopped");
    Ok(())
}

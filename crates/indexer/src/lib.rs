//! Sync engine and daemon loop.
//!
//! ## Pipeline
//!
//! ```text
//! Folder
//!     │
//!     ├──> initial scan (walkdir, cache + doc_count validation)
//!     │      └─> changed files
//!     │
//!     ├──> Chunker + Embedder
//!     │      └─> chunk records
//!     │
//!     └──> Vector Store (per-folder collection)
//!            └─> Cache + Status updated
//! ```
//!
//! After the initial scan, [`watcher::Daemon`] keeps each folder's
//! collection in sync with live filesystem events and polled
//! force-reindex requests.

mod error;
mod indexer;
mod watcher;

pub use error::{IndexerError, Result};
pub use indexer::Indexer;
pub use watcher::Daemon;

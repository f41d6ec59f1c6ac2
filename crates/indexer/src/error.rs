use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    VectorStore(#[from] semsync_vector_store::VectorStoreError),

    #[error(transparent)]
    Cache(#[from] semsync_cache::CacheError),

    #[error(transparent)]
    Status(#[from] semsync_status::StatusError),

    #[error(transparent)]
    Reindex(#[from] semsync_reindex::ReindexError),

    #[error(transparent)]
    Embedder(#[from] semsync_embedder::EmbedderError),

    #[error("{0}")]
    Other(String),
}

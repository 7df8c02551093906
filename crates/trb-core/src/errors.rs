/// Core error type for the relay bot.
///
/// Adapter crates map their specific errors into this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("transport disconnected: {0}")]
    TransportDisconnect(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the share-link resolution API.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no downloadable file found")]
    NotFound,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("resolution timed out")]
    Timeout,
}

/// Failures of a single transfer job.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file is {size} bytes, limit is {ceiling} bytes")]
    TooLarge { size: u64, ceiling: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("write error: {0}")]
    Write(#[source] std::io::Error),
}

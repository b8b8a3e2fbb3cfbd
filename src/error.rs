use thiserror::Error;

/// Errors returned by price provider adapters.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider does not implement the requested operation.
    #[error("{provider} does not support {operation}")]
    Unsupported { provider: String, operation: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider}: {message}")]
    Parse { provider: String, message: String },

    #[error("cancelled")]
    Cancelled,
}

/// Errors returned by the storage gateway.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

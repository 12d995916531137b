use thiserror::Error;

/// Infrastructure-category cache errors. These are exactly the errors the
/// fail-open service layer absorbs; factory errors are never represented
/// here.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

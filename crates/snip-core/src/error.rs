use thiserror::Error;

/// Errors related to the core value types of the URL shortener.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

#[derive(Debug, Clone, Error)]
pub enum GeneratorError {
    #[error("entropy source failed: {0}")]
    Entropy(String),
    #[error("invalid generator configuration: {0}")]
    InvalidConfig(String),
    #[error("generated value is not a valid token: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("token not found: {0}")]
    TokenNotFound(String),
    #[error("url not found: {0}")]
    UrlNotFound(String),
    #[error("owner has no urls: {0}")]
    OwnerNotFound(String),
    #[error("already stored: {0}")]
    Conflict(String),
    #[error("invalid storage configuration: {0}")]
    Configuration(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("storage serialization failed: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns `true` for the lookup misses, as opposed to backend failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::TokenNotFound(_)
                | StorageError::UrlNotFound(_)
                | StorageError::OwnerNotFound(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("token not found: {0}")]
    NotFound(String),
    #[error("token expired: {0}")]
    Expired(String),
    #[error("token removed: {0}")]
    Removed(String),
    #[error("token generation failed: {0}")]
    Generator(#[from] GeneratorError),
    #[error("no free token after {0} attempts")]
    TokenSpaceExhausted(usize),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

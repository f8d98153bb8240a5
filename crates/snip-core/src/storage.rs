use crate::error::StorageError;
use crate::token::{Token, TokenValue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The (token, URL, owner) triple a backend maintains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub token: Token,
    pub url: String,
    pub owner: String,
}

/// One entry of an owner's listing.
///
/// Backends put the bare token value in `short_url`; the application core
/// rewrites it into an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPair {
    pub short_url: String,
    pub original_url: String,
}

/// The read half of the storage contract.
#[async_trait]
pub trait ReadStorage: Send + Sync + 'static {
    /// Returns `Err(TokenNotFound)` if no URL is bound to `value`.
    async fn get_token(&self, value: &TokenValue) -> Result<Token>;

    /// Returns `Err(TokenNotFound)` if `url` was never shortened.
    async fn get_token_by_url(&self, url: &str) -> Result<Token>;

    /// Returns the whole record stored for `url`, or `Err(UrlNotFound)`.
    async fn get_association(&self, url: &str) -> Result<Association>;

    /// Returns `Err(OwnerNotFound)` when the owner has no associations.
    async fn get_tokens_by_owner(&self, owner: &str) -> Result<Vec<Token>>;

    async fn get_url(&self, value: &TokenValue) -> Result<String>;

    /// Returns `Err(OwnerNotFound)` when the owner has no associations.
    async fn get_urls_by_owner(&self, owner: &str) -> Result<Vec<UrlPair>>;

    async fn has_url(&self, url: &str) -> Result<bool>;

    async fn has_token(&self, value: &TokenValue) -> Result<bool>;

    /// Number of stored associations, removed ones included.
    async fn count_urls(&self) -> Result<u64>;

    /// Number of distinct owners with at least one association.
    async fn count_owners(&self) -> Result<u64>;

    /// Liveness check.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait Storage: ReadStorage {
    /// Binds `url` to `token` for `owner`, replacing whatever `url` was bound to.
    ///
    /// Returns `Err(Conflict)` if the token value already belongs to another URL.
    async fn set(&self, owner: &str, url: &str, token: Token) -> Result<()>;

    /// Binds `url` to `token` for `owner` unless `url` is already stored.
    ///
    /// The check and the write are one atomic step. Returns `Ok(None)` when
    /// the association was inserted, or the stored association, untouched,
    /// when `url` was already present. Returns `Err(Conflict)` if `url` is new
    /// but the token value belongs to another URL.
    async fn set_if_absent(
        &self,
        owner: &str,
        url: &str,
        token: Token,
    ) -> Result<Option<Association>>;

    /// Inserts every association of `batch` or none of them.
    ///
    /// Returns `Err(Conflict)` if any URL or token value is already stored.
    async fn set_batch(&self, owner: &str, batch: HashMap<String, Token>) -> Result<()>;

    /// Tombstones the tokens in `values` that exist and belong to `owner`.
    /// Everything else is skipped silently.
    async fn remove_tokens(&self, values: &[TokenValue], owner: &str) -> Result<()>;
}

use crate::storage::UrlPair;
use crate::token::{Token, TokenValue};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// Whether `add` issued a new token or found the URL already shortened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortenStatus {
    Created,
    AlreadyExists,
}

/// The outcome of shortening a single URL.
#[derive(Debug, Clone)]
pub struct Shortened {
    pub token: Token,
    pub status: ShortenStatus,
}

impl Shortened {
    pub fn created(token: Token) -> Self {
        Self {
            token,
            status: ShortenStatus::Created,
        }
    }

    pub fn existing(token: Token) -> Self {
        Self {
            token,
            status: ShortenStatus::AlreadyExists,
        }
    }

    pub fn already_exists(&self) -> bool {
        self.status == ShortenStatus::AlreadyExists
    }
}

/// The outcome of shortening several URLs at once.
#[derive(Debug, Clone, Default)]
pub struct BatchShortened {
    /// Token for every requested URL.
    pub tokens: HashMap<String, Token>,
    /// URLs that were already shortened before this call.
    pub existing: HashSet<String>,
}

impl BatchShortened {
    /// `true` if at least one URL of the batch was already shortened.
    pub fn has_conflict(&self) -> bool {
        !self.existing.is_empty()
    }

    pub fn is_existing(&self, url: &str) -> bool {
        self.existing.contains(url)
    }
}

/// Aggregate counts over the active storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub urls: u64,
    pub owners: u64,
}

/// The operations a transport layer calls.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens `url` for `owner`. An already shortened URL yields its
    /// existing token, refreshed if it had expired.
    async fn add(&self, owner: &str, url: &str) -> Result<Shortened>;

    async fn add_batch(&self, owner: &str, urls: &[String]) -> Result<BatchShortened>;

    /// Resolves a token value to its original URL.
    async fn get(&self, value: &str) -> Result<String>;

    /// Lists the owner's URLs with absolute short URLs.
    async fn owner_urls(&self, owner: &str) -> Result<Vec<UrlPair>>;

    async fn remove_tokens(&self, values: &[TokenValue], owner: &str) -> Result<()>;

    async fn stats(&self) -> Result<Stats>;

    async fn ping(&self) -> Result<()>;
}

use crate::config::ShortenerConfig;
use async_trait::async_trait;
use snip_core::{
    Association, BatchShortened, Shortened, Shortener, ShortenerError, Stats, Storage,
    StorageError, Token, TokenValue, UrlPair,
};
use snip_generator::Generator;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type Result<T> = std::result::Result<T, ShortenerError>;

/// The application core over one storage backend.
///
/// Holds no mutable state of its own; every record lives in the storage,
/// so clones share everything and can be handed to several transports.
///
/// Generated values are checked against the storage before use and drawn
/// again on collision, up to `max_generate_attempts` times.
pub struct ShortenerService<S: ?Sized, G> {
    storage: Arc<S>,
    generator: Arc<G>,
    config: Arc<ShortenerConfig>,
}

impl<S: ?Sized, G> Clone for ShortenerService<S, G> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            generator: Arc::clone(&self.generator),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: Storage, G: Generator> ShortenerService<S, G> {
    pub fn new(storage: S, generator: G, config: ShortenerConfig) -> Self {
        Self::from_shared(Arc::new(storage), generator, config)
    }
}

impl<S: Storage + ?Sized, G: Generator> ShortenerService<S, G> {
    /// Creates a service over an already shared storage, e.g. the
    /// `Arc<dyn Storage>` returned by `snip_storage::open_storage`.
    pub fn from_shared(storage: Arc<S>, generator: G, config: ShortenerConfig) -> Self {
        Self {
            storage,
            generator: Arc::new(generator),
            config: Arc::new(config),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &ShortenerConfig {
        &self.config
    }

    /// Tombstones `values` on a detached task and returns immediately.
    ///
    /// Failures cannot reach the caller, so they are logged at error level.
    /// The returned handle may be dropped; the removal still runs.
    pub fn remove_tokens_detached(&self, values: Vec<TokenValue>, owner: String) -> JoinHandle<()> {
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move {
            match storage.remove_tokens(&values, &owner).await {
                Ok(()) => debug!(owner = %owner, count = values.len(), "detached removal applied"),
                Err(e) => error!(
                    owner = %owner,
                    count = values.len(),
                    error = %e,
                    "detached removal failed"
                ),
            }
        })
    }

    /// Returns the token already stored for `url`, refreshed if it expired.
    async fn existing_token(&self, url: &str) -> Result<Option<Token>> {
        if !self.storage.has_url(url).await? {
            return Ok(None);
        }

        let association = self.storage.get_association(url).await?;
        Ok(Some(self.refresh_if_expired(association).await?))
    }

    async fn refresh_if_expired(&self, association: Association) -> Result<Token> {
        let mut token = association.token;
        if token.is_expired() {
            token.refresh(self.config.token_lifetime);
            // The stored owner keeps the record even if someone else asked.
            self.storage
                .set(&association.owner, &association.url, token.clone())
                .await?;
            debug!(url = %association.url, token = %token.value, "refreshed expired token");
        }

        Ok(token)
    }

    /// Stores the fresh part of a batch. A URL shortened by another caller
    /// since the lookup fails the insert as a whole; such URLs move to
    /// `result.existing` and the rest is submitted once more.
    async fn store_batch(
        &self,
        owner: &str,
        mut fresh: HashMap<String, Token>,
        mut reserved: HashSet<TokenValue>,
        result: &mut BatchShortened,
    ) -> Result<usize> {
        let mut retried = false;
        loop {
            if fresh.is_empty() {
                return Ok(0);
            }

            let conflict = match self.storage.set_batch(owner, fresh.clone()).await {
                Ok(()) => return Ok(fresh.len()),
                Err(StorageError::Conflict(key)) if !retried => key,
                Err(e) => return Err(e.into()),
            };
            retried = true;
            debug!(owner = %owner, conflict = %conflict, "batch raced another writer, re-checking");

            let urls: Vec<String> = fresh.keys().cloned().collect();
            for url in urls {
                if let Some(token) = self.existing_token(&url).await? {
                    fresh.remove(&url);
                    result.existing.insert(url.clone());
                    result.tokens.insert(url, token);
                    continue;
                }

                let taken = match fresh.get(&url) {
                    Some(token) => self.storage.has_token(&token.value).await?,
                    None => false,
                };
                if taken {
                    let token = self.fresh_token(&reserved).await?;
                    reserved.insert(token.value.clone());
                    fresh.insert(url.clone(), token.clone());
                    result.tokens.insert(url, token);
                }
            }
        }
    }

    /// Draws a token value that is neither stored nor in `reserved`.
    async fn fresh_token(&self, reserved: &HashSet<TokenValue>) -> Result<Token> {
        let attempts = self.config.max_generate_attempts;
        for attempt in 1..=attempts {
            let value: TokenValue = self.generator.generate()?.into();
            if reserved.contains(&value) || self.storage.has_token(&value).await? {
                warn!(token = %value, attempt, "generated token collides, retrying");
                continue;
            }
            return Ok(Token::new(value, self.config.token_lifetime));
        }

        Err(ShortenerError::TokenSpaceExhausted(attempts))
    }
}

/// Turns a storage miss into `NotFound` and keeps backend failures as they are.
fn lookup_error(e: StorageError, key: &str) -> ShortenerError {
    if e.is_not_found() {
        ShortenerError::NotFound(key.to_owned())
    } else {
        ShortenerError::Storage(e)
    }
}

#[async_trait]
impl<S: Storage + ?Sized, G: Generator> Shortener for ShortenerService<S, G> {
    async fn add(&self, owner: &str, url: &str) -> Result<Shortened> {
        if let Some(token) = self.existing_token(url).await? {
            debug!(owner = %owner, url = %url, token = %token.value, "url already shortened");
            return Ok(Shortened::existing(token));
        }

        let token = self.fresh_token(&HashSet::new()).await?;
        if let Some(existing) = self
            .storage
            .set_if_absent(owner, url, token.clone())
            .await?
        {
            // Another caller stored the URL after the lookup above.
            let token = self.refresh_if_expired(existing).await?;
            debug!(owner = %owner, url = %url, token = %token.value, "url shortened concurrently");
            return Ok(Shortened::existing(token));
        }

        debug!(owner = %owner, url = %url, token = %token.value, "shortened url");
        Ok(Shortened::created(token))
    }

    async fn add_batch(&self, owner: &str, urls: &[String]) -> Result<BatchShortened> {
        let mut result = BatchShortened::default();
        let mut fresh: HashMap<String, Token> = HashMap::new();
        let mut reserved: HashSet<TokenValue> = HashSet::new();

        for url in urls {
            if result.tokens.contains_key(url) {
                continue;
            }

            if let Some(token) = self.existing_token(url).await? {
                result.existing.insert(url.clone());
                result.tokens.insert(url.clone(), token);
                continue;
            }

            let token = self.fresh_token(&reserved).await?;
            reserved.insert(token.value.clone());
            fresh.insert(url.clone(), token.clone());
            result.tokens.insert(url.clone(), token);
        }

        let created = self.store_batch(owner, fresh, reserved, &mut result).await?;

        debug!(
            owner = %owner,
            created,
            existing = result.existing.len(),
            "shortened url batch"
        );
        Ok(result)
    }

    async fn get(&self, value: &str) -> Result<String> {
        let Ok(token_value) = TokenValue::new(value) else {
            debug!(token = %value, "malformed token requested");
            return Err(ShortenerError::NotFound(value.to_owned()));
        };

        let token = self
            .storage
            .get_token(&token_value)
            .await
            .map_err(|e| lookup_error(e, value))?;

        if token.removed {
            debug!(token = %token_value, "removed token requested");
            return Err(ShortenerError::Removed(value.to_owned()));
        }
        if token.is_expired() {
            debug!(token = %token_value, expire = %token.expire, "expired token requested");
            return Err(ShortenerError::Expired(value.to_owned()));
        }

        self.storage
            .get_url(&token_value)
            .await
            .map_err(|e| lookup_error(e, value))
    }

    async fn owner_urls(&self, owner: &str) -> Result<Vec<UrlPair>> {
        let pairs = self
            .storage
            .get_urls_by_owner(owner)
            .await
            .map_err(|e| lookup_error(e, owner))?;

        Ok(pairs
            .into_iter()
            .map(|pair| UrlPair {
                short_url: TokenValue::new_unchecked(pair.short_url).to_url(&self.config.base_url),
                original_url: pair.original_url,
            })
            .collect())
    }

    async fn remove_tokens(&self, values: &[TokenValue], owner: &str) -> Result<()> {
        self.storage.remove_tokens(values, owner).await?;
        debug!(owner = %owner, count = values.len(), "removed tokens");
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            urls: self.storage.count_urls().await?,
            owners: self.storage.count_owners().await?,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(self.storage.ping().await?)
    }
}

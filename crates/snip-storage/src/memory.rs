use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::storage::{Association, ReadStorage, Result, Storage, UrlPair};
use snip_core::{StorageError, Token, TokenValue};
use std::collections::{HashMap, HashSet};

/// The three lookup indexes, always updated together.
#[derive(Debug, Default)]
struct Indexes {
    by_token: HashMap<TokenValue, Association>,
    by_url: HashMap<String, TokenValue>,
    by_owner: HashMap<String, Vec<TokenValue>>,
}

impl Indexes {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            by_token: HashMap::with_capacity(capacity),
            by_url: HashMap::with_capacity(capacity),
            by_owner: HashMap::new(),
        }
    }

    fn token_taken_by_other_url(&self, value: &TokenValue, url: &str) -> bool {
        self.by_token
            .get(value)
            .is_some_and(|association| association.url != url)
    }

    fn unlink_owner(&mut self, owner: &str, value: &TokenValue) {
        if let Some(values) = self.by_owner.get_mut(owner) {
            values.retain(|v| v != value);
            if values.is_empty() {
                self.by_owner.remove(owner);
            }
        }
    }

    fn insert(&mut self, owner: &str, url: &str, token: Token) {
        if let Some(previous) = self.by_url.get(url).cloned() {
            if let Some(old) = self.by_token.remove(&previous) {
                self.unlink_owner(&old.owner, &previous);
            }
        }

        let value = token.value.clone();
        self.by_url.insert(url.to_owned(), value.clone());
        self.by_owner
            .entry(owner.to_owned())
            .or_default()
            .push(value.clone());
        self.by_token.insert(
            value,
            Association {
                token,
                url: url.to_owned(),
                owner: owner.to_owned(),
            },
        );
    }

    fn association_by_url(&self, url: &str) -> Option<&Association> {
        self.by_url
            .get(url)
            .and_then(|value| self.by_token.get(value))
    }

    fn owner_associations(&self, owner: &str) -> Option<Vec<&Association>> {
        let values = self.by_owner.get(owner)?;
        let associations: Vec<&Association> = values
            .iter()
            .filter_map(|value| self.by_token.get(value))
            .collect();
        (!associations.is_empty()).then_some(associations)
    }
}

/// In-memory implementation of the [`Storage`] contract.
///
/// A single reader/writer lock guards all indexes as a unit, so no reader
/// ever observes a partially applied write.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    indexes: RwLock<Indexes>,
}

impl InMemoryStorage {
    /// Creates a new, empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory storage sized for `capacity` URLs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            indexes: RwLock::new(Indexes::with_capacity(capacity)),
        }
    }
}

#[async_trait]
impl ReadStorage for InMemoryStorage {
    async fn get_token(&self, value: &TokenValue) -> Result<Token> {
        self.indexes
            .read()
            .by_token
            .get(value)
            .map(|association| association.token.clone())
            .ok_or_else(|| StorageError::TokenNotFound(value.to_string()))
    }

    async fn get_token_by_url(&self, url: &str) -> Result<Token> {
        self.indexes
            .read()
            .association_by_url(url)
            .map(|association| association.token.clone())
            .ok_or_else(|| StorageError::TokenNotFound(url.to_owned()))
    }

    async fn get_association(&self, url: &str) -> Result<Association> {
        self.indexes
            .read()
            .association_by_url(url)
            .cloned()
            .ok_or_else(|| StorageError::UrlNotFound(url.to_owned()))
    }

    async fn get_tokens_by_owner(&self, owner: &str) -> Result<Vec<Token>> {
        let indexes = self.indexes.read();
        let associations = indexes
            .owner_associations(owner)
            .ok_or_else(|| StorageError::OwnerNotFound(owner.to_owned()))?;

        Ok(associations.into_iter().map(|a| a.token.clone()).collect())
    }

    async fn get_url(&self, value: &TokenValue) -> Result<String> {
        self.indexes
            .read()
            .by_token
            .get(value)
            .map(|association| association.url.clone())
            .ok_or_else(|| StorageError::UrlNotFound(value.to_string()))
    }

    async fn get_urls_by_owner(&self, owner: &str) -> Result<Vec<UrlPair>> {
        let indexes = self.indexes.read();
        let associations = indexes
            .owner_associations(owner)
            .ok_or_else(|| StorageError::OwnerNotFound(owner.to_owned()))?;

        Ok(associations
            .into_iter()
            .map(|a| UrlPair {
                short_url: a.token.value.to_string(),
                original_url: a.url.clone(),
            })
            .collect())
    }

    async fn has_url(&self, url: &str) -> Result<bool> {
        Ok(self.indexes.read().by_url.contains_key(url))
    }

    async fn has_token(&self, value: &TokenValue) -> Result<bool> {
        Ok(self.indexes.read().by_token.contains_key(value))
    }

    async fn count_urls(&self) -> Result<u64> {
        Ok(self.indexes.read().by_url.len() as u64)
    }

    async fn count_owners(&self) -> Result<u64> {
        Ok(self.indexes.read().by_owner.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn set(&self, owner: &str, url: &str, token: Token) -> Result<()> {
        let mut indexes = self.indexes.write();

        if indexes.token_taken_by_other_url(&token.value, url) {
            return Err(StorageError::Conflict(token.value.to_string()));
        }

        indexes.insert(owner, url, token);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        owner: &str,
        url: &str,
        token: Token,
    ) -> Result<Option<Association>> {
        let mut indexes = self.indexes.write();

        if let Some(existing) = indexes.association_by_url(url) {
            return Ok(Some(existing.clone()));
        }
        if indexes.by_token.contains_key(&token.value) {
            return Err(StorageError::Conflict(token.value.to_string()));
        }

        indexes.insert(owner, url, token);
        Ok(None)
    }

    async fn set_batch(&self, owner: &str, batch: HashMap<String, Token>) -> Result<()> {
        let mut indexes = self.indexes.write();

        // Validate the whole batch before touching any index.
        {
            let mut seen = HashSet::with_capacity(batch.len());
            for (url, token) in &batch {
                if indexes.by_url.contains_key(url) {
                    return Err(StorageError::Conflict(url.clone()));
                }
                if indexes.by_token.contains_key(&token.value) || !seen.insert(&token.value) {
                    return Err(StorageError::Conflict(token.value.to_string()));
                }
            }
        }

        for (url, token) in batch {
            indexes.insert(owner, &url, token);
        }
        Ok(())
    }

    async fn remove_tokens(&self, values: &[TokenValue], owner: &str) -> Result<()> {
        let mut indexes = self.indexes.write();

        for value in values {
            let Some(association) = indexes.by_token.get_mut(value) else {
                continue;
            };
            if association.owner != owner {
                continue;
            }
            association.token.remove();
        }

        Ok(())
    }
}

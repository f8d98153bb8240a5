use async_trait::async_trait;
use snip_core::storage::{Association, ReadStorage, Result, Storage, UrlPair};
use snip_core::{StorageError, Token, TokenValue};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// The on-disk document: URL to association record.
type Snapshot = BTreeMap<String, Association>;

/// File-backed implementation of the [`Storage`] contract.
///
/// The whole state lives in one JSON document that is re-read on every
/// operation and rewritten on every mutation. A single mutex covers each
/// read-modify-write cycle end to end, so operations are fully serialized.
/// Fine for low write volume; every call costs a full snapshot round trip.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Opens the snapshot at `path`, validating it if it already exists.
    ///
    /// A missing or empty file is an empty storage; the file is created on
    /// the first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let storage = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };

        let snapshot = storage.load().await?;
        info!(
            path = %storage.path.display(),
            urls = snapshot.len(),
            "opened file storage"
        );

        Ok(storage)
    }

    /// Returns the snapshot location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Snapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Snapshot::new()),
            Err(e) => return Err(io_error(&self.path, e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Snapshot::new());
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::Serialization(format!(
                "failed to parse snapshot {}: {e}",
                self.path.display()
            ))
        })
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        // Write aside and rename so a crash never leaves a torn snapshot.
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| io_error(&staging, e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        debug!(path = %self.path.display(), urls = snapshot.len(), "persisted snapshot");
        Ok(())
    }

    /// Runs `f` against a freshly loaded snapshot under the storage lock.
    async fn read<T>(&self, f: impl FnOnce(&Snapshot) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let snapshot = self.load().await?;
        f(&snapshot)
    }

    /// Loads, mutates and persists the snapshot as one serialized step.
    async fn update(&self, f: impl FnOnce(&mut Snapshot) -> Result<()>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.load().await?;
        f(&mut snapshot)?;
        self.persist(&snapshot).await
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io(format!("{}: {e}", path.display()))
}

fn find_by_token<'a>(snapshot: &'a Snapshot, value: &TokenValue) -> Option<&'a Association> {
    snapshot
        .values()
        .find(|association| association.token.value == *value)
}

fn owner_associations<'a>(snapshot: &'a Snapshot, owner: &str) -> Vec<&'a Association> {
    snapshot
        .values()
        .filter(|association| association.owner == owner)
        .collect()
}

#[async_trait]
impl ReadStorage for FileStorage {
    async fn get_token(&self, value: &TokenValue) -> Result<Token> {
        self.read(|snapshot| {
            find_by_token(snapshot, value)
                .map(|association| association.token.clone())
                .ok_or_else(|| StorageError::TokenNotFound(value.to_string()))
        })
        .await
    }

    async fn get_token_by_url(&self, url: &str) -> Result<Token> {
        self.read(|snapshot| {
            snapshot
                .get(url)
                .map(|association| association.token.clone())
                .ok_or_else(|| StorageError::TokenNotFound(url.to_owned()))
        })
        .await
    }

    async fn get_association(&self, url: &str) -> Result<Association> {
        self.read(|snapshot| {
            snapshot
                .get(url)
                .cloned()
                .ok_or_else(|| StorageError::UrlNotFound(url.to_owned()))
        })
        .await
    }

    async fn get_tokens_by_owner(&self, owner: &str) -> Result<Vec<Token>> {
        self.read(|snapshot| {
            let tokens: Vec<Token> = owner_associations(snapshot, owner)
                .into_iter()
                .map(|association| association.token.clone())
                .collect();
            if tokens.is_empty() {
                return Err(StorageError::OwnerNotFound(owner.to_owned()));
            }
            Ok(tokens)
        })
        .await
    }

    async fn get_url(&self, value: &TokenValue) -> Result<String> {
        self.read(|snapshot| {
            find_by_token(snapshot, value)
                .map(|association| association.url.clone())
                .ok_or_else(|| StorageError::UrlNotFound(value.to_string()))
        })
        .await
    }

    async fn get_urls_by_owner(&self, owner: &str) -> Result<Vec<UrlPair>> {
        self.read(|snapshot| {
            let pairs: Vec<UrlPair> = owner_associations(snapshot, owner)
                .into_iter()
                .map(|association| UrlPair {
                    short_url: association.token.value.to_string(),
                    original_url: association.url.clone(),
                })
                .collect();
            if pairs.is_empty() {
                return Err(StorageError::OwnerNotFound(owner.to_owned()));
            }
            Ok(pairs)
        })
        .await
    }

    async fn has_url(&self, url: &str) -> Result<bool> {
        self.read(|snapshot| Ok(snapshot.contains_key(url))).await
    }

    async fn has_token(&self, value: &TokenValue) -> Result<bool> {
        self.read(|snapshot| Ok(find_by_token(snapshot, value).is_some()))
            .await
    }

    async fn count_urls(&self) -> Result<u64> {
        self.read(|snapshot| Ok(snapshot.len() as u64)).await
    }

    async fn count_owners(&self) -> Result<u64> {
        self.read(|snapshot| {
            let owners: HashSet<&str> = snapshot
                .values()
                .map(|association| association.owner.as_str())
                .collect();
            Ok(owners.len() as u64)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn set(&self, owner: &str, url: &str, token: Token) -> Result<()> {
        self.update(|snapshot| {
            if find_by_token(snapshot, &token.value).is_some_and(|a| a.url != url) {
                return Err(StorageError::Conflict(token.value.to_string()));
            }

            snapshot.insert(
                url.to_owned(),
                Association {
                    token,
                    url: url.to_owned(),
                    owner: owner.to_owned(),
                },
            );
            Ok(())
        })
        .await
    }

    async fn set_if_absent(
        &self,
        owner: &str,
        url: &str,
        token: Token,
    ) -> Result<Option<Association>> {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.load().await?;

        if let Some(existing) = snapshot.get(url) {
            return Ok(Some(existing.clone()));
        }
        if find_by_token(&snapshot, &token.value).is_some() {
            return Err(StorageError::Conflict(token.value.to_string()));
        }

        snapshot.insert(
            url.to_owned(),
            Association {
                token,
                url: url.to_owned(),
                owner: owner.to_owned(),
            },
        );
        self.persist(&snapshot).await?;
        Ok(None)
    }

    async fn set_batch(&self, owner: &str, batch: HashMap<String, Token>) -> Result<()> {
        self.update(|snapshot| {
            let mut taken: HashSet<TokenValue> = snapshot
                .values()
                .map(|association| association.token.value.clone())
                .collect();

            for (url, token) in &batch {
                if snapshot.contains_key(url) {
                    return Err(StorageError::Conflict(url.clone()));
                }
                if !taken.insert(token.value.clone()) {
                    return Err(StorageError::Conflict(token.value.to_string()));
                }
            }

            for (url, token) in batch {
                snapshot.insert(
                    url.clone(),
                    Association {
                        token,
                        url,
                        owner: owner.to_owned(),
                    },
                );
            }
            Ok(())
        })
        .await
    }

    async fn remove_tokens(&self, values: &[TokenValue], owner: &str) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let wanted: HashSet<&TokenValue> = values.iter().collect();
        self.update(|snapshot| {
            for association in snapshot.values_mut() {
                if association.owner == owner && wanted.contains(&association.token.value) {
                    association.token.remove();
                }
            }
            Ok(())
        })
        .await
    }
}

//! Cache Store Module
//!
//! The key-value seam the coordinator talks to, and an in-process
//! implementation with absolute expiry and atomic conditional writes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::{current_timestamp_ms, CacheEntry, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::error::CacheError;

// == KvStore Trait ==
/// Minimal cache store interface consumed by the coordinator.
///
/// Implementations must make `set_if_absent` atomic and must expire entries on
/// their own; the coordinator relies on both for its locks. A networked store
/// maps these onto `GET`, `SET NX PX`, `SET EX` and `DEL`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the live value under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` only if `key` holds no live value. Returns whether it did.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        expiry: Duration,
    ) -> Result<bool, CacheError>;

    /// Stores `value`, replacing whatever was there.
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        expiry: Duration,
    ) -> Result<(), CacheError>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes `key` only while it still holds `expected`.
    ///
    /// The default is a read followed by a delete, which can race with a
    /// concurrent writer. Stores with a compare-and-delete primitive should
    /// override it.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, CacheError> {
        match self.get(key).await? {
            Some(current) if current == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// == Memory Store ==
/// In-process store with per-entry expiry and a capacity bound.
///
/// When full, expired entries are purged first; if that frees nothing, the
/// entry closest to expiry is evicted.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    // == Cleanup Expired ==
    /// Removes all expired entries and returns how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remaining lifetime of `key` in milliseconds.
    pub async fn ttl_remaining_ms(&self, key: &str) -> Option<u64> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(CacheEntry::ttl_remaining_ms)
    }

    fn validate(key: &str, value: &[u8]) -> Result<(), CacheError> {
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key must be between 1 and {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::InvalidRequest(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }
        Ok(())
    }

    /// Frees a slot for a new key. Caller holds the write lock.
    fn make_room(&self, entries: &mut HashMap<String, CacheEntry>, key: &str) {
        if entries.contains_key(key) || entries.len() < self.max_entries {
            return;
        }

        let now = current_timestamp_ms();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        if entries.len() < self.max_entries {
            return;
        }

        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(k, _)| k.clone());
        if let Some(victim) = victim {
            entries.remove(&victim);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Lazily drop the expired entry
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        expiry: Duration,
    ) -> Result<bool, CacheError> {
        Self::validate(key, value)?;
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_expired()) {
            return Ok(false);
        }
        self.make_room(&mut entries, key);
        entries.insert(key.to_string(), CacheEntry::new(value.to_vec(), expiry));
        Ok(true)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        expiry: Duration,
    ) -> Result<(), CacheError> {
        Self::validate(key, value)?;
        let mut entries = self.entries.write().await;
        self.make_room(&mut entries, key);
        entries.insert(key.to_string(), CacheEntry::new(value.to_vec(), expiry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired() && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}

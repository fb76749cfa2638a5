//! In-process backend.
//!
//! Entries live in a `HashMap` behind an `RwLock`; every mutation takes the
//! write lock, so `add` and `incr` are atomic. Expiry is evaluated lazily
//! against the backend's [`Clock`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use cairn_core::codec::canonical_integer;
use cairn_core::{is_expired, BackendError, BackendResult, CacheFlags, Clock, SystemClock};

use crate::traits::{not_an_integer, BackendAdapter, CasToken, Fetched};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expiry: i64,
    version: u64,
}

/// Shared in-memory backend.
///
/// Cloning is cheap and every clone sees the same entries, which is how
/// tests model several processes talking to one medium.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    next_version: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty backend on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty backend with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_version: Arc::new(AtomicU64::new(1)),
            clock,
        }
    }

    fn read(&self) -> BackendResult<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries.read().map_err(|_| BackendError::LockPoisoned)
    }

    fn write(&self) -> BackendResult<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries.write().map_err(|_| BackendError::LockPoisoned)
    }

    fn version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn live<'a>(&self, entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        let now = self.clock.now();
        entries.get(key).filter(|e| !is_expired(e.expiry, now))
    }

    /// Raw stored blob of a live entry.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.read().ok()?;
        self.live(&entries, key).map(|e| e.value.clone())
    }

    /// Absolute expiry of a live entry.
    pub fn expiry_of(&self, key: &str) -> Option<i64> {
        let entries = self.read().ok()?;
        self.live(&entries, key).map(|e| e.expiry)
    }

    /// Whether a live entry exists.
    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    /// Sorted keys of all live entries.
    pub fn keys(&self) -> Vec<String> {
        let Ok(entries) = self.read() else {
            return Vec::new();
        };
        let now = self.clock.now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| !is_expired(e.expiry, now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Live keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns true if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.write() {
            entries.clear();
        }
    }
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    async fn get(&self, key: &str, _flags: CacheFlags) -> BackendResult<Option<Fetched>> {
        let entries = self.read()?;
        Ok(self.live(&entries, key).map(|e| Fetched {
            value: e.value.clone(),
            token: CasToken::new(e.version),
        }))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expiry: i64,
        _flags: CacheFlags,
    ) -> BackendResult<()> {
        let version = self.version();
        let mut entries = self.write()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expiry,
                version,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str, _flags: CacheFlags) -> BackendResult<()> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], expiry: i64) -> BackendResult<bool> {
        let mut entries = self.write()?;
        if self.live(&entries, key).is_some() {
            return Ok(false);
        }
        let version = self.version();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expiry,
                version,
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str, delta: i64) -> BackendResult<Option<i64>> {
        let mut entries = self.write()?;
        let Some(current) = self.live(&entries, key) else {
            return Ok(None);
        };
        let value = canonical_integer(&current.value)
            .and_then(|n| n.checked_add(delta))
            .ok_or_else(|| not_an_integer(key))?;
        let expiry = current.expiry;
        let version = self.version();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string().into_bytes(),
                expiry,
                version,
            },
        );
        Ok(Some(value))
    }
}

//! Backend adapter trait.
//!
//! A backend is a flat key/value medium with per-key absolute expiry, atomic
//! create-if-absent, atomic increment and an opaque compare token on reads.
//! Everything else (segmentation, locking, merge) is layered on top by the
//! cache facade.

use async_trait::async_trait;
use cairn_core::{BackendError, BackendResult, CacheFlags};

/// Opaque comparison token for check-and-set.
///
/// Two reads of the same key return equal tokens only if no write to that key
/// happened in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasToken(u64);

impl CasToken {
    /// Wrap a backend version number.
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    /// The backend version number.
    pub fn version(&self) -> u64 {
        self.0
    }
}

/// A stored blob together with its comparison token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub value: Vec<u8>,
    pub token: CasToken,
}

/// Capability interface of a storage medium.
///
/// # Contract
///
/// - Expiries are absolute UNIX timestamps in seconds; `0` never expires.
///   Expired entries behave exactly like absent ones.
/// - `delete` succeeds when the key is already absent.
/// - `add` returns `Ok(false)` when a live entry already exists.
/// - `incr` returns `Ok(None)` when the key is absent, keeps the entry's
///   expiry, and fails with [`BackendError::UnexpectedValue`] when the stored
///   blob is not integer text.
/// - Any `Err` is a transport or medium failure, never a race.
///
/// The batch methods default to a sequential loop over the single-key calls.
/// Every key is attempted even after a failure. Batch writes return the last
/// error; `get_multi` reports each key's outcome.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Fetch a blob and its comparison token.
    async fn get(&self, key: &str, flags: CacheFlags) -> BackendResult<Option<Fetched>>;

    /// Store a blob unconditionally.
    async fn set(&self, key: &str, value: &[u8], expiry: i64, flags: CacheFlags)
        -> BackendResult<()>;

    /// Remove a key.
    async fn delete(&self, key: &str, flags: CacheFlags) -> BackendResult<()>;

    /// Store a blob only if no live entry exists.
    async fn add(&self, key: &str, value: &[u8], expiry: i64) -> BackendResult<bool>;

    /// Atomically add `delta` to an integer entry.
    async fn incr(&self, key: &str, delta: i64) -> BackendResult<Option<i64>>;

    /// Fetch many keys. The result is aligned with `keys`, one outcome per key,
    /// so a failed read never hides the keys that were fetched.
    async fn get_multi(
        &self,
        keys: &[String],
        flags: CacheFlags,
    ) -> Vec<BackendResult<Option<Fetched>>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            found.push(self.get(key, flags).await);
        }
        found
    }

    /// Store many blobs with one expiry.
    async fn set_multi(
        &self,
        entries: &[(String, Vec<u8>)],
        expiry: i64,
        flags: CacheFlags,
    ) -> BackendResult<()> {
        let mut last_error = None;
        for (key, value) in entries {
            if let Err(e) = self.set(key, value, expiry, flags).await {
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Remove many keys.
    async fn delete_multi(&self, keys: &[String], flags: CacheFlags) -> BackendResult<()> {
        let mut last_error = None;
        for key in keys {
            if let Err(e) = self.delete(key, flags).await {
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Whether a write to `key` has reached every replica.
    ///
    /// Single-node media are always in sync.
    async fn is_synced(&self, _key: &str) -> BackendResult<bool> {
        Ok(true)
    }
}

/// Build the error returned when an entry that must be an integer is not.
pub fn not_an_integer(key: &str) -> BackendError {
    BackendError::UnexpectedValue {
        key: key.to_string(),
        reason: "stored value is not an integer".to_string(),
    }
}

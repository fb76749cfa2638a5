//! CAIRN Test Utilities
//!
//! Centralized test infrastructure for the cairn workspace:
//! - A fault-injecting backend wrapper
//! - Proptest generators for values, keys and configs
//! - Test fixtures for common scenarios
//! - Custom assertions for cairn-specific validation

pub use cairn_storage::InMemoryBackend;

pub use cairn_core::{
    BackendError, BackendResult, CacheConfig, CacheError, CacheFlags, CacheResult, CacheValue,
    Clock, ConfigError, ErrorCode, KeyBuilder, ManualClock, SegmentHash, ValueContainer,
};

use async_trait::async_trait;
use cairn_storage::{BackendAdapter, Fetched};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Backend calls counted by [`FlakyBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCall {
    Get,
    Set,
    Delete,
    Add,
    Incr,
    IsSynced,
}

#[derive(Debug, Default)]
struct Faults {
    write_prefixes: Vec<String>,
    read_prefixes: Vec<String>,
    calls: HashMap<BackendCall, usize>,
}

/// Wraps an [`InMemoryBackend`] and fails selected calls on demand.
///
/// Only the single-key methods are implemented, so batch calls go through
/// the trait's sequential defaults and see the same faults key by key.
#[derive(Debug, Clone)]
pub struct FlakyBackend {
    inner: InMemoryBackend,
    faults: Arc<Mutex<Faults>>,
    down: Arc<AtomicBool>,
    unsynced: Arc<AtomicBool>,
}

impl FlakyBackend {
    /// Wrap `inner`; no faults are active.
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
            down: Arc::new(AtomicBool::new(false)),
            unsynced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The wrapped backend, for inspecting stored state.
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// Fail every write (set, add, delete, incr) to keys starting with `prefix`.
    pub fn fail_writes_with_prefix(&self, prefix: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.write_prefixes.push(prefix.into());
        }
    }

    /// Fail every read of keys starting with `prefix`.
    pub fn fail_reads_with_prefix(&self, prefix: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.read_prefixes.push(prefix.into());
        }
    }

    /// Make every call fail (`true`) or restore service (`false`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make `is_synced` report `false` until turned off.
    pub fn set_unsynced(&self, unsynced: bool) {
        self.unsynced.store(unsynced, Ordering::SeqCst);
    }

    /// Clear prefix faults and call counts.
    pub fn heal(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
        self.set_down(false);
        self.set_unsynced(false);
    }

    /// Number of calls of the given kind so far.
    pub fn calls(&self, call: BackendCall) -> usize {
        self.faults
            .lock()
            .map(|f| f.calls.get(&call).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn check(&self, call: BackendCall, key: &str, operation: &'static str) -> BackendResult<()> {
        let mut faults = self.faults.lock().map_err(|_| BackendError::LockPoisoned)?;
        *faults.calls.entry(call).or_insert(0) += 1;

        let prefixes = match call {
            BackendCall::Get | BackendCall::IsSynced => &faults.read_prefixes,
            _ => &faults.write_prefixes,
        };
        if self.down.load(Ordering::SeqCst) || prefixes.iter().any(|p| key.starts_with(p)) {
            return Err(BackendError::Unreachable {
                operation,
                reason: format!("injected fault for {key}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for FlakyBackend {
    async fn get(&self, key: &str, flags: CacheFlags) -> BackendResult<Option<Fetched>> {
        self.check(BackendCall::Get, key, "get")?;
        self.inner.get(key, flags).await
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expiry: i64,
        flags: CacheFlags,
    ) -> BackendResult<()> {
        self.check(BackendCall::Set, key, "set")?;
        self.inner.set(key, value, expiry, flags).await
    }

    async fn delete(&self, key: &str, flags: CacheFlags) -> BackendResult<()> {
        self.check(BackendCall::Delete, key, "delete")?;
        self.inner.delete(key, flags).await
    }

    async fn add(&self, key: &str, value: &[u8], expiry: i64) -> BackendResult<bool> {
        self.check(BackendCall::Add, key, "add")?;
        self.inner.add(key, value, expiry).await
    }

    async fn incr(&self, key: &str, delta: i64) -> BackendResult<Option<i64>> {
        self.check(BackendCall::Incr, key, "incr")?;
        self.inner.incr(key, delta).await
    }

    async fn is_synced(&self, key: &str) -> BackendResult<bool> {
        self.check(BackendCall::IsSynced, key, "is_synced")?;
        Ok(!self.unsynced.load(Ordering::SeqCst))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cairn values and keys.

    use super::*;
    use proptest::prelude::*;

    /// Generate an arbitrary cache value.
    pub fn arb_cache_value() -> impl Strategy<Value = CacheValue> {
        prop_oneof![
            any::<i64>().prop_map(CacheValue::Int),
            arb_opaque_bytes(0..256).prop_map(CacheValue::Bytes),
        ]
    }

    /// Generate bytes that never read back as an integer.
    pub fn arb_opaque_bytes(
        len: std::ops::Range<usize>,
    ) -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), len)
            .prop_filter("integer text reads back as Int", |b| {
                cairn_core::codec::canonical_integer(b).is_none()
            })
    }

    /// Generate a key component, including colons and spaces.
    pub fn arb_key_component() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9: _-]{0,16}"
    }

    /// Generate a non-empty keyspace.
    pub fn arb_keyspace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    /// Generate a valid configuration with small segmentation limits.
    pub fn arb_small_segment_config() -> impl Strategy<Value = CacheConfig> {
        (arb_keyspace(), 1usize..64, 1usize..16).prop_map(|(keyspace, chunk, factor)| {
            CacheConfig::default()
                .with_keyspace(keyspace)
                .with_segmentation_size(Some(chunk))
                .with_segmented_value_max_size(Some(chunk * factor))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common scenarios.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// Fixed clock start for deterministic expiry tests.
    pub const TEST_NOW: i64 = 1_700_000_000;

    /// A typed record for JSON value tests.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Revision {
        pub id: u64,
        pub title: String,
        pub text: String,
    }

    /// A small revision.
    pub fn revision(id: u64) -> Revision {
        Revision {
            id,
            title: format!("Page {id}"),
            text: "Lorem ipsum".to_string(),
        }
    }

    /// Config with tiny chunks so segmentation kicks in for short values.
    pub fn tiny_segments_config(chunk: usize, max: usize) -> CacheConfig {
        CacheConfig::default()
            .with_segmentation_size(Some(chunk))
            .with_segmented_value_max_size(Some(max))
    }

    /// A manual clock at [`TEST_NOW`].
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(TEST_NOW))
    }

    /// An in-memory backend on the given clock.
    pub fn memory_backend(clock: Arc<ManualClock>) -> InMemoryBackend {
        InMemoryBackend::with_clock(clock)
    }

    /// Deterministic payload of `len` bytes that is not integer text.
    pub fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| b'a' + (i % 26) as u8).collect()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for cairn-specific validation.

    use super::*;

    /// Assert that a result is Ok.
    pub fn assert_ok<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got {:?}", result);
    }

    /// Assert that an error latched in the register has the given code.
    pub fn assert_latched(error: Option<CacheError>, code: ErrorCode) {
        match error {
            Some(e) => assert_eq!(e.code(), code, "unexpected latched error: {e}"),
            None => panic!("Expected a latched {code:?} error, register is empty"),
        }
    }

    /// Assert that a result is a configuration error.
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(
            matches!(result, Err(CacheError::Config(_))),
            "Expected Config error, got {:?}",
            result
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_faults_only_hit_matching_keys() {
        let backend = FlakyBackend::new(InMemoryBackend::new());
        backend.fail_writes_with_prefix("global:segment:");

        assert!(backend
            .set("global:segment:x", b"1", 0, CacheFlags::empty())
            .await
            .is_err());
        assert!(backend
            .set("local:x", b"1", 0, CacheFlags::empty())
            .await
            .is_ok());
        assert_eq!(backend.calls(BackendCall::Set), 2);
    }

    #[tokio::test]
    async fn test_down_and_heal() {
        let backend = FlakyBackend::new(InMemoryBackend::new());
        backend.set_down(true);
        assert!(backend.get("k", CacheFlags::empty()).await.is_err());
        backend.heal();
        assert!(backend.get("k", CacheFlags::empty()).await.is_ok());
        assert_eq!(backend.calls(BackendCall::Get), 1);
    }

    #[tokio::test]
    async fn test_unsynced_flag() {
        let backend = FlakyBackend::new(InMemoryBackend::new());
        assert!(backend.is_synced("k").await.expect("is_synced should succeed"));
        backend.set_unsynced(true);
        assert!(!backend.is_synced("k").await.expect("is_synced should succeed"));
    }
}

//! Public cache surface.
//!
//! # Error Reporting
//!
//! Operations return `bool`/`Option` sentinels. A `false`/`None` means the
//! key was absent, a race was lost, or a backend call failed; the last case
//! also latches the error in the facade's register (see
//! [`CacheFacade::last_error`]). Only violated call contracts return `Err`.

use std::sync::Arc;

use cairn_core::{
    convert_to_expiry, BackendError, CacheConfig, CacheError, CacheFlags, CacheResult,
    CacheValue, Clock, ConfigError, KeyBuilder, SystemClock,
};
use cairn_storage::{BackendAdapter, CasToken};

use crate::busy::BusyQueue;
use crate::dupes::{DeferredScheduler, DuplicateKeyTracker, TokioScheduler};
use crate::lock::{ConcurrencyController, LockOptions};
use crate::segment::{SegmentEngine, WriteMode};
use crate::tracked::{ErrorRegister, TrackedBackend};
use crate::wait::{Condition, Step, WaitLoop, WaitOutcome};

/// Segmenting, locking cache over a backend.
///
/// # Example
///
/// ```ignore
/// use cairn_cache::CacheFacade;
/// use cairn_core::{CacheConfig, CacheFlags, CacheValue};
/// use cairn_storage::InMemoryBackend;
///
/// let cache = CacheFacade::new(Arc::new(InMemoryBackend::new()), CacheConfig::default())?;
/// let key = cache.make_key("page", &["42"]);
/// cache.set(&key, &CacheValue::from("body"), 300, CacheFlags::WRITE_ALLOW_SEGMENTS).await;
/// ```
#[derive(Debug)]
pub struct CacheFacade<B> {
    pub(crate) backend: TrackedBackend<B>,
    pub(crate) register: Arc<ErrorRegister>,
    keys: KeyBuilder,
    pub(crate) segments: SegmentEngine,
    pub(crate) locks: ConcurrencyController,
    dupes: DuplicateKeyTracker,
    pub(crate) busy: BusyQueue,
    pub(crate) clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl<B: BackendAdapter> CacheFacade<B> {
    /// Create a facade over `backend`.
    ///
    /// Duplicate-get reporting is enabled only when `config.report_dupes` is
    /// set and the call happens inside a tokio runtime; use
    /// [`with_scheduler`](Self::with_scheduler) to supply another scheduler.
    pub fn new(backend: Arc<B>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let register = Arc::new(ErrorRegister::default());
        let keys = KeyBuilder::new(config.keyspace.clone());
        let dupes = match TokioScheduler::current() {
            Some(scheduler) if config.report_dupes => DuplicateKeyTracker::new(Arc::new(scheduler)),
            _ => DuplicateKeyTracker::disabled(),
        };

        Ok(Self {
            backend: TrackedBackend::new(backend, Arc::clone(&register)),
            register,
            segments: SegmentEngine::new(keys.clone(), &config),
            keys,
            locks: ConcurrencyController::new(config.lock_backoff.clone()),
            dupes,
            busy: BusyQueue::new(),
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Use `clock` for TTL normalization.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report duplicate gets through `scheduler` (if `report_dupes` is set).
    pub fn with_scheduler(mut self, scheduler: Arc<dyn DeferredScheduler>) -> Self {
        self.dupes = if self.config.report_dupes {
            DuplicateKeyTracker::new(scheduler)
        } else {
            DuplicateKeyTracker::disabled()
        };
        self
    }

    // === Configuration ===

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Chunk size of segmented values; `None` means segmentation is off.
    pub fn segmentation_size(&self) -> Option<usize> {
        self.config.segmentation_size
    }

    /// Largest value that may be segmented; `None` means unlimited.
    pub fn segmented_value_max_size(&self) -> Option<usize> {
        self.config.segmented_value_max_size
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<B> {
        self.backend.inner()
    }

    // === Keys ===

    /// Make a key scoped to this facade's keyspace.
    pub fn make_key(&self, class: &str, components: &[&str]) -> String {
        self.keys.make_key(class, components)
    }

    /// Make a key in the shared `global` keyspace.
    pub fn make_global_key(&self, class: &str, components: &[&str]) -> String {
        self.keys.make_global_key(class, components)
    }

    // === Error register ===

    /// The most recent latched error.
    pub fn last_error(&self) -> Option<CacheError> {
        self.register.get()
    }

    pub fn clear_last_error(&self) {
        self.register.clear();
    }

    // === Single-key operations ===

    /// Fetch a value, reassembling segments.
    ///
    /// A missing chunk reads as `None`.
    pub async fn get(&self, key: &str, flags: CacheFlags) -> Option<CacheValue> {
        self.dupes.track(key);
        self.get_with_token(key, flags).await.0
    }

    /// Fetch a value and the comparison token of its main key.
    pub(crate) async fn get_with_token(
        &self,
        key: &str,
        flags: CacheFlags,
    ) -> (Option<CacheValue>, Option<CasToken>) {
        let Ok(Some(fetched)) = self.backend.get(key, flags).await else {
            return (None, None);
        };
        let value = self
            .segments
            .resolve(&self.backend, key, &fetched.value, flags)
            .await;
        (value, Some(fetched.token))
    }

    /// Store a value.
    ///
    /// `exptime` is a relative TTL (below ten years), an absolute UNIX time,
    /// or zero for no expiry.
    pub async fn set(&self, key: &str, value: &CacheValue, exptime: i64, flags: CacheFlags) -> bool {
        self.write(key, value, exptime, flags, WriteMode::Set).await
    }

    /// Store a value only if the key is absent.
    pub async fn add(&self, key: &str, value: &CacheValue, exptime: i64, flags: CacheFlags) -> bool {
        self.write(key, value, exptime, flags, WriteMode::Add).await
    }

    async fn write(
        &self,
        key: &str,
        value: &CacheValue,
        exptime: i64,
        flags: CacheFlags,
        mode: WriteMode,
    ) -> bool {
        let expiry = convert_to_expiry(exptime, self.clock.now());
        self.segments
            .store(&self.backend, key, value, expiry, flags, mode)
            .await
            && self.confirm_sync(key, flags).await
    }

    /// Delete a key.
    ///
    /// Chunks of a segmented value are left to expire unless
    /// `WRITE_PRUNE_SEGMENTS` is given.
    pub async fn delete(&self, key: &str, flags: CacheFlags) -> bool {
        self.segments.delete(&self.backend, key, flags).await
    }

    /// Wait for a `WRITE_SYNC` write to reach every replica.
    async fn confirm_sync(&self, key: &str, flags: CacheFlags) -> bool {
        if !flags.contains(CacheFlags::WRITE_SYNC) {
            return true;
        }

        let mut wait = WaitLoop::new(self.config.sync_timeout, self.config.lock_backoff.clone())
            .with_busy_queue(&self.busy);
        let outcome = loop {
            let condition = match self.backend.is_synced(key).await {
                Ok(true) => Condition::Reached,
                Ok(false) => Condition::Continue,
                Err(_) => Condition::Aborted,
            };
            match wait.step(condition).await {
                Step::Retry => continue,
                Step::Done(outcome) => break outcome,
            }
        };

        match outcome {
            WaitOutcome::Reached => true,
            WaitOutcome::Aborted => false,
            WaitOutcome::TimedOut => {
                tracing::warn!(key = %key, "Write not confirmed on all replicas");
                self.register.latch(BackendError::NoResponse {
                    operation: "sync",
                    key: key.to_string(),
                });
                false
            }
        }
    }

    // === Batch operations ===

    /// Fetch many keys.
    ///
    /// Returns only keys with a present, fully reassembled value, in the order
    /// they were requested. A key whose read fails is skipped and its error
    /// latched; the other keys are still returned.
    pub async fn get_multi(&self, keys: &[&str], flags: CacheFlags) -> Vec<(String, CacheValue)> {
        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let found = self.backend.get_multi(&owned, flags).await;

        let mut values = Vec::with_capacity(found.len());
        for (key, fetched) in owned.into_iter().zip(found) {
            let Some(fetched) = fetched else {
                continue;
            };
            if let Some(value) = self
                .segments
                .resolve(&self.backend, &key, &fetched.value, flags)
                .await
            {
                values.push((key, value));
            }
        }
        values
    }

    /// Store many values with one TTL.
    ///
    /// Every key is attempted. Fails with
    /// [`ConfigError::SegmentationNotAllowed`] if `WRITE_ALLOW_SEGMENTS` is set.
    pub async fn set_multi(
        &self,
        entries: &[(&str, CacheValue)],
        exptime: i64,
        flags: CacheFlags,
    ) -> CacheResult<bool> {
        if flags.contains(CacheFlags::WRITE_ALLOW_SEGMENTS) {
            return Err(ConfigError::SegmentationNotAllowed {
                operation: "set_multi",
            }
            .into());
        }

        let mut blobs = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            blobs.push((key.to_string(), self.segments.plan(key, value, flags)?.main));
        }

        let expiry = convert_to_expiry(exptime, self.clock.now());
        let mut ok = self.backend.set_multi(&blobs, expiry, flags).await.is_ok();
        for (key, _) in entries {
            ok = self.confirm_sync(key, flags).await && ok;
        }
        Ok(ok)
    }

    /// Delete many keys. Chunks of segmented values are never pruned.
    ///
    /// Fails with [`ConfigError::SegmentationNotAllowed`] if
    /// `WRITE_ALLOW_SEGMENTS` is set.
    pub async fn delete_multi(&self, keys: &[&str], flags: CacheFlags) -> CacheResult<bool> {
        if flags.contains(CacheFlags::WRITE_ALLOW_SEGMENTS) {
            return Err(ConfigError::SegmentationNotAllowed {
                operation: "delete_multi",
            }
            .into());
        }

        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        Ok(self.backend.delete_multi(&owned, flags).await.is_ok())
    }

    // === TTL ===

    /// Change the expiry of an existing key.
    ///
    /// An expiry in the past deletes the key. For segmented values only the
    /// main key is touched, so raising the TTL does not extend the chunks.
    /// Returns false if the key is absent or could not be locked.
    pub async fn change_ttl(&self, key: &str, exptime: i64, flags: CacheFlags) -> bool {
        let now = self.clock.now();
        let expiry = convert_to_expiry(exptime, now);
        let expire_now = expiry != 0 && expiry < now;

        if !self.lock(key, &LockOptions::non_blocking()).await {
            return false;
        }

        let ok = match self.backend.get(key, CacheFlags::READ_LATEST).await {
            Ok(Some(_)) if expire_now => self.backend.delete(key, flags).await.is_ok(),
            Ok(Some(blob)) => self
                .backend
                .set(key, &blob.value, expiry, flags)
                .await
                .is_ok(),
            _ => false,
        };

        self.unlock(key).await;
        ok
    }

    /// [`change_ttl`](Self::change_ttl) over many keys; true only if all succeed.
    pub async fn change_ttl_multi(&self, keys: &[&str], exptime: i64, flags: CacheFlags) -> bool {
        let mut ok = true;
        for key in keys {
            ok = self.change_ttl(key, exptime, flags).await && ok;
        }
        ok
    }

    // === Locks ===

    /// Acquire an advisory lock on `key`.
    pub async fn lock(&self, key: &str, options: &LockOptions) -> bool {
        self.locks
            .lock(&self.backend, &self.busy, self.clock.as_ref(), key, options)
            .await
    }

    /// Release one level of a lock acquired with [`lock`](Self::lock).
    pub async fn unlock(&self, key: &str) -> bool {
        self.locks.unlock(&self.backend, key).await
    }

    /// Reentrancy depth of a lock this facade holds.
    pub fn lock_depth(&self, key: &str) -> Option<u32> {
        self.locks.depth(key)
    }

    // === Counters ===

    /// Atomically add `delta`, keeping the key's TTL.
    ///
    /// Returns `None` if the key is absent or the call failed.
    pub async fn incr(&self, key: &str, delta: i64) -> Option<i64> {
        self.backend.incr(key, delta).await.ok().flatten()
    }

    /// Atomically subtract `delta`, keeping the key's TTL.
    pub async fn decr(&self, key: &str, delta: i64) -> Option<i64> {
        self.incr(key, delta.saturating_neg()).await
    }

    /// Increment, creating the key with `init` and `ttl` if it is absent.
    pub async fn incr_with_init(&self, key: &str, ttl: i64, delta: i64, init: i64) -> Option<i64> {
        self.register.clear();
        if let Some(value) = self.incr(key, delta).await {
            return Some(value);
        }
        if self.register.get().is_some() {
            return None;
        }

        if self
            .add(key, &CacheValue::Int(init), ttl, CacheFlags::empty())
            .await
        {
            return Some(init);
        }
        if self.register.get().is_some() {
            return None;
        }

        // Lost the race to initialize.
        self.incr(key, delta).await
    }

    // === Busy work and diagnostics ===

    /// Register work that may run while this facade waits on the backend.
    pub fn add_busy_callback(&self, callback: impl FnOnce() + Send + 'static) {
        self.busy.push(Box::new(callback));
    }

    /// Keys fetched more than once in the current window, with counts.
    pub fn duplicate_keys(&self) -> Vec<(String, u64)> {
        self.dupes.duplicates()
    }

    /// Start a new duplicate-tracking window.
    pub fn reset_duplicate_window(&self) {
        self.dupes.reset_window();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::ErrorCode;
    use cairn_test_utils::fixtures::{manual_clock, memory_backend, tiny_segments_config, TEST_NOW};
    use cairn_test_utils::{FlakyBackend, InMemoryBackend};

    fn facade(config: CacheConfig) -> (CacheFacade<InMemoryBackend>, InMemoryBackend) {
        let clock = manual_clock();
        let backend = memory_backend(clock.clone());
        let cache = CacheFacade::new(Arc::new(backend.clone()), config)
            .expect("config should be valid")
            .with_clock(clock);
        (cache, backend)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = CacheFacade::new(
            Arc::new(InMemoryBackend::new()),
            CacheConfig::default().with_keyspace(""),
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Config);
    }

    #[test]
    fn test_make_key_uses_configured_keyspace() {
        let (cache, _) = facade(CacheConfig::default().with_keyspace("enwiki"));
        assert_eq!(cache.make_key("page", &["1"]), "enwiki:page:1");
        assert_eq!(cache.make_global_key("page", &["1"]), "global:page:1");
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (cache, _) = facade(CacheConfig::default());
        assert!(cache.set("k", &CacheValue::from("v"), 0, CacheFlags::empty()).await);
        assert_eq!(cache.get("k", CacheFlags::empty()).await, Some(CacheValue::from("v")));
        assert!(cache.delete("k", CacheFlags::empty()).await);
        assert_eq!(cache.get("k", CacheFlags::empty()).await, None);
    }

    #[tokio::test]
    async fn test_relative_ttl_is_stored_absolute() {
        let (cache, backend) = facade(CacheConfig::default());
        assert!(cache.set("k", &CacheValue::Int(1), 60, CacheFlags::empty()).await);
        assert_eq!(backend.expiry_of("k"), Some(TEST_NOW + 60));
    }

    #[tokio::test]
    async fn test_add_only_when_absent() {
        let (cache, _) = facade(CacheConfig::default());
        assert!(cache.add("k", &CacheValue::Int(1), 0, CacheFlags::empty()).await);
        assert!(!cache.add("k", &CacheValue::Int(2), 0, CacheFlags::empty()).await);
        assert_eq!(cache.get("k", CacheFlags::empty()).await, Some(CacheValue::Int(1)));
        assert!(cache.last_error().is_none());
    }

    #[tokio::test]
    async fn test_get_multi_preserves_request_order() {
        let (cache, _) = facade(tiny_segments_config(4, 1024));
        cache.set("a", &CacheValue::Int(1), 0, CacheFlags::empty()).await;
        cache
            .set("b", &CacheValue::from("segmented!"), 0, CacheFlags::WRITE_ALLOW_SEGMENTS)
            .await;
        cache.set("c", &CacheValue::from("x"), 0, CacheFlags::empty()).await;

        let found = cache
            .get_multi(&["c", "missing", "b", "a"], CacheFlags::empty())
            .await;
        assert_eq!(
            found,
            vec![
                ("c".to_string(), CacheValue::from("x")),
                ("b".to_string(), CacheValue::from("segmented!")),
                ("a".to_string(), CacheValue::Int(1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_writes_reject_segmentation() {
        let (cache, _) = facade(CacheConfig::default());
        let entries = [("a", CacheValue::Int(1))];
        let err = cache
            .set_multi(&entries, 0, CacheFlags::WRITE_ALLOW_SEGMENTS)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Config(ConfigError::SegmentationNotAllowed { .. })
        ));
        assert!(cache
            .delete_multi(&["a"], CacheFlags::WRITE_ALLOW_SEGMENTS)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_set_multi_and_delete_multi() {
        let (cache, backend) = facade(CacheConfig::default());
        let entries = [("a", CacheValue::Int(1)), ("b", CacheValue::from("two"))];
        assert!(cache
            .set_multi(&entries, 0, CacheFlags::empty())
            .await
            .expect("no segmentation flag"));
        assert_eq!(cache.get("b", CacheFlags::empty()).await, Some(CacheValue::from("two")));
        assert!(cache
            .delete_multi(&["a", "b", "never"], CacheFlags::empty())
            .await
            .expect("no segmentation flag"));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_change_ttl() {
        let (cache, backend) = facade(CacheConfig::default());
        assert!(!cache.change_ttl("k", 100, CacheFlags::empty()).await);

        cache.set("k", &CacheValue::from("v"), 10, CacheFlags::empty()).await;
        assert!(cache.change_ttl("k", 100, CacheFlags::empty()).await);
        assert_eq!(backend.expiry_of("k"), Some(TEST_NOW + 100));
        assert!(!backend.contains("k:lock"));

        assert!(cache.change_ttl("k", -1, CacheFlags::empty()).await);
        assert!(!backend.contains("k"));
    }

    #[tokio::test]
    async fn test_change_ttl_stops_when_lock_write_fails() {
        let flaky = FlakyBackend::new(InMemoryBackend::new());
        let cache = CacheFacade::new(Arc::new(flaky.clone()), CacheConfig::default())
            .expect("config should be valid");
        assert!(cache.set("k", &CacheValue::from("v"), 0, CacheFlags::empty()).await);
        flaky.fail_writes_with_prefix("k");

        assert!(!cache.change_ttl("k", 100, CacheFlags::empty()).await);
        assert_eq!(cache.last_error().map(|e| e.code()), Some(ErrorCode::Unreachable));
        assert_eq!(flaky.inner().expiry_of("k"), Some(0));
        assert_eq!(cache.lock_depth("k"), None);
    }

    #[tokio::test]
    async fn test_change_ttl_read_error_still_unlocks() {
        let flaky = FlakyBackend::new(InMemoryBackend::new());
        let cache = CacheFacade::new(Arc::new(flaky.clone()), CacheConfig::default())
            .expect("config should be valid");
        assert!(cache.set("k", &CacheValue::from("v"), 0, CacheFlags::empty()).await);
        flaky.fail_reads_with_prefix("k");

        assert!(!cache.change_ttl("k", 100, CacheFlags::empty()).await);
        assert_eq!(cache.last_error().map(|e| e.code()), Some(ErrorCode::Unreachable));
        assert_eq!(flaky.inner().expiry_of("k"), Some(0));
        assert!(!flaky.inner().contains("k:lock"));
    }

    #[tokio::test]
    async fn test_get_multi_skips_only_failed_keys() {
        let flaky = FlakyBackend::new(InMemoryBackend::new());
        let cache = CacheFacade::new(Arc::new(flaky.clone()), CacheConfig::default())
            .expect("config should be valid");
        cache.set("a", &CacheValue::Int(1), 0, CacheFlags::empty()).await;
        cache.set("b", &CacheValue::Int(2), 0, CacheFlags::empty()).await;
        cache.set("c", &CacheValue::Int(3), 0, CacheFlags::empty()).await;
        flaky.fail_reads_with_prefix("b");

        let found = cache.get_multi(&["a", "b", "c"], CacheFlags::empty()).await;
        assert_eq!(
            found,
            vec![
                ("a".to_string(), CacheValue::Int(1)),
                ("c".to_string(), CacheValue::Int(3)),
            ]
        );
        assert_eq!(cache.last_error().map(|e| e.code()), Some(ErrorCode::Unreachable));
    }

    #[tokio::test]
    async fn test_change_ttl_multi_ands_results() {
        let (cache, _) = facade(CacheConfig::default());
        cache.set("a", &CacheValue::Int(1), 0, CacheFlags::empty()).await;
        assert!(!cache.change_ttl_multi(&["a", "missing"], 50, CacheFlags::empty()).await);
        assert!(cache.change_ttl_multi(&["a"], 50, CacheFlags::empty()).await);
    }

    #[tokio::test]
    async fn test_incr_and_decr() {
        let (cache, _) = facade(CacheConfig::default());
        assert_eq!(cache.incr("n", 1).await, None);
        cache.set("n", &CacheValue::Int(10), 0, CacheFlags::empty()).await;
        assert_eq!(cache.incr("n", 5).await, Some(15));
        assert_eq!(cache.decr("n", 20).await, Some(-5));
        assert_eq!(cache.get("n", CacheFlags::empty()).await, Some(CacheValue::Int(-5)));
    }

    #[tokio::test]
    async fn test_incr_on_bytes_latches_unexpected_value() {
        let (cache, _) = facade(CacheConfig::default());
        cache.set("s", &CacheValue::from("text"), 0, CacheFlags::empty()).await;
        assert_eq!(cache.incr("s", 1).await, None);
        assert_eq!(cache.last_error().map(|e| e.code()), Some(ErrorCode::UnexpectedValue));
    }

    #[tokio::test]
    async fn test_incr_with_init() {
        let (cache, backend) = facade(CacheConfig::default());
        assert_eq!(cache.incr_with_init("k", 60, 1, 5).await, Some(5));
        assert_eq!(cache.incr_with_init("k", 60, 1, 5).await, Some(6));
        assert_eq!(backend.expiry_of("k"), Some(TEST_NOW + 60));
    }

    #[tokio::test]
    async fn test_incr_with_init_stops_on_backend_error() {
        let flaky = FlakyBackend::new(InMemoryBackend::new());
        flaky.set_down(true);
        let cache = CacheFacade::new(Arc::new(flaky.clone()), CacheConfig::default())
            .expect("config should be valid");
        assert_eq!(cache.incr_with_init("k", 60, 1, 5).await, None);
        assert_eq!(flaky.calls(cairn_test_utils::BackendCall::Add), 0);
        assert_eq!(cache.last_error().map(|e| e.code()), Some(ErrorCode::Unreachable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_sync_timeout_latches_no_response() {
        let flaky = FlakyBackend::new(InMemoryBackend::new());
        flaky.set_unsynced(true);
        let cache = CacheFacade::new(Arc::new(flaky.clone()), CacheConfig::default())
            .expect("config should be valid");

        assert!(!cache.set("k", &CacheValue::Int(1), 0, CacheFlags::WRITE_SYNC).await);
        assert_eq!(cache.last_error().map(|e| e.code()), Some(ErrorCode::NoResponse));
        assert!(flaky.inner().contains("k"), "the write itself went through");

        flaky.set_unsynced(false);
        cache.clear_last_error();
        assert!(cache.set("k", &CacheValue::Int(2), 0, CacheFlags::WRITE_SYNC).await);
        assert!(cache.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_callbacks_run_while_waiting_for_sync() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let flaky = FlakyBackend::new(InMemoryBackend::new());
        flaky.set_unsynced(true);
        let cache = CacheFacade::new(Arc::new(flaky), CacheConfig::default())
            .expect("config should be valid");

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        cache.add_busy_callback(move || flag.store(true, Ordering::SeqCst));

        cache.set("k", &CacheValue::Int(1), 0, CacheFlags::WRITE_SYNC).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_duplicate_gets_are_tracked() {
        let (cache, _) = facade(CacheConfig::default().with_report_dupes(true));
        cache.get("a", CacheFlags::empty()).await;
        cache.get("a", CacheFlags::empty()).await;
        cache.get("b", CacheFlags::empty()).await;
        assert_eq!(cache.duplicate_keys(), vec![("a".to_string(), 2)]);
        cache.reset_duplicate_window();
        assert!(cache.duplicate_keys().is_empty());
    }

    #[tokio::test]
    async fn test_dupes_disabled_by_default() {
        let (cache, _) = facade(CacheConfig::default());
        cache.get("a", CacheFlags::empty()).await;
        cache.get("a", CacheFlags::empty()).await;
        assert!(cache.duplicate_keys().is_empty());
    }
}

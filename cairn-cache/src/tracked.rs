//! Last-error register and the backend handle that feeds it.
//!
//! Every backend call made by the facade goes through [`TrackedBackend`],
//! which latches any `Err` into the shared [`ErrorRegister`] before handing
//! the result back. Callers that only see a `bool`/`Option` sentinel consult
//! the register to tell "absent" from "failed".

use std::sync::{Arc, Mutex};

use cairn_core::{BackendError, BackendResult, CacheError, CacheFlags};
use cairn_storage::{BackendAdapter, Fetched};

/// One latched error per facade instance.
#[derive(Debug, Default)]
pub struct ErrorRegister {
    last: Mutex<Option<CacheError>>,
}

impl ErrorRegister {
    /// Latch `error`, replacing any previous one.
    pub fn latch(&self, error: impl Into<CacheError>) {
        let error = error.into();
        match self.last.lock() {
            Ok(mut last) => *last = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }

    /// The most recently latched error.
    pub fn get(&self) -> Option<CacheError> {
        match self.last.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Clear the register.
    pub fn clear(&self) {
        match self.last.lock() {
            Ok(mut last) => *last = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// Returns true if any error is latched.
    pub fn has_error(&self) -> bool {
        self.get().is_some()
    }
}

/// Backend handle that latches every failure.
#[derive(Debug)]
pub struct TrackedBackend<B> {
    backend: Arc<B>,
    register: Arc<ErrorRegister>,
}

impl<B> Clone for TrackedBackend<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            register: Arc::clone(&self.register),
        }
    }
}

impl<B: BackendAdapter> TrackedBackend<B> {
    pub fn new(backend: Arc<B>, register: Arc<ErrorRegister>) -> Self {
        Self { backend, register }
    }

    /// The untracked backend.
    pub fn inner(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn register(&self) -> &ErrorRegister {
        &self.register
    }

    fn track<T>(&self, result: BackendResult<T>) -> BackendResult<T> {
        if let Err(e) = &result {
            self.register.latch(e.clone());
        }
        result
    }

    pub async fn get(&self, key: &str, flags: CacheFlags) -> BackendResult<Option<Fetched>> {
        self.track(self.backend.get(key, flags).await)
    }

    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        expiry: i64,
        flags: CacheFlags,
    ) -> BackendResult<()> {
        self.track(self.backend.set(key, value, expiry, flags).await)
    }

    pub async fn delete(&self, key: &str, flags: CacheFlags) -> BackendResult<()> {
        self.track(self.backend.delete(key, flags).await)
    }

    pub async fn add(&self, key: &str, value: &[u8], expiry: i64) -> BackendResult<bool> {
        self.track(self.backend.add(key, value, expiry).await)
    }

    pub async fn incr(&self, key: &str, delta: i64) -> BackendResult<Option<i64>> {
        self.track(self.backend.incr(key, delta).await)
    }

    /// Fetch many keys. A key whose read failed comes back as `None`, with
    /// its error latched.
    pub async fn get_multi(&self, keys: &[String], flags: CacheFlags) -> Vec<Option<Fetched>> {
        self.backend
            .get_multi(keys, flags)
            .await
            .into_iter()
            .map(|result| self.track(result).ok().flatten())
            .collect()
    }

    pub async fn set_multi(
        &self,
        entries: &[(String, Vec<u8>)],
        expiry: i64,
        flags: CacheFlags,
    ) -> BackendResult<()> {
        self.track(self.backend.set_multi(entries, expiry, flags).await)
    }

    pub async fn delete_multi(&self, keys: &[String], flags: CacheFlags) -> BackendResult<()> {
        self.track(self.backend.delete_multi(keys, flags).await)
    }

    pub async fn is_synced(&self, key: &str) -> BackendResult<bool> {
        self.track(self.backend.is_synced(key).await)
    }
}

/// Latch a poisoned-lock failure and return it.
pub(crate) fn poisoned(register: &ErrorRegister) -> BackendError {
    register.latch(BackendError::LockPoisoned);
    BackendError::LockPoisoned
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::ErrorCode;
    use cairn_test_utils::{FlakyBackend, InMemoryBackend};

    #[test]
    fn test_register_latch_and_clear() {
        let register = ErrorRegister::default();
        assert!(register.get().is_none());
        register.latch(BackendError::NoResponse {
            operation: "set",
            key: "k".to_string(),
        });
        assert_eq!(register.get().map(|e| e.code()), Some(ErrorCode::NoResponse));
        assert!(register.has_error());
        register.clear();
        assert!(register.get().is_none());
    }

    #[tokio::test]
    async fn test_failures_are_latched_successes_are_not() {
        let flaky = FlakyBackend::new(InMemoryBackend::new());
        flaky.fail_writes_with_prefix("bad");
        let tracked = TrackedBackend::new(Arc::new(flaky), Arc::new(ErrorRegister::default()));

        tracked
            .set("good", b"1", 0, CacheFlags::empty())
            .await
            .expect("set should succeed");
        assert!(tracked.register().get().is_none());

        assert!(tracked.set("bad", b"1", 0, CacheFlags::empty()).await.is_err());
        assert_eq!(
            tracked.register().get().map(|e| e.code()),
            Some(ErrorCode::Unreachable)
        );

        // A later success does not clear the latch.
        tracked
            .get("good", CacheFlags::empty())
            .await
            .expect("get should succeed");
        assert!(tracked.register().has_error());
    }

    #[tokio::test]
    async fn test_get_multi_keeps_keys_around_a_failed_read() {
        let flaky = FlakyBackend::new(InMemoryBackend::new());
        flaky
            .inner()
            .set("a", b"1", 0, CacheFlags::empty())
            .await
            .expect("set should succeed");
        flaky
            .inner()
            .set("c", b"3", 0, CacheFlags::empty())
            .await
            .expect("set should succeed");
        flaky.fail_reads_with_prefix("b");
        let tracked = TrackedBackend::new(Arc::new(flaky), Arc::new(ErrorRegister::default()));

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values: Vec<Option<Vec<u8>>> = tracked
            .get_multi(&keys, CacheFlags::empty())
            .await
            .into_iter()
            .map(|f| f.map(|f| f.value))
            .collect();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]);
        assert_eq!(
            tracked.register().get().map(|e| e.code()),
            Some(ErrorCode::Unreachable)
        );
    }
}

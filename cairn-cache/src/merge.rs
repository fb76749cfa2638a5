//! Optimistic read-modify-write.
//!
//! [`CacheFacade::merge`] reads the current value with its comparison token,
//! lets the caller compute a replacement, and writes it back only if the
//! token is unchanged. A lost race retries from a fresh read.

use cairn_core::{CacheFlags, CacheValue};
use cairn_storage::{BackendAdapter, CasToken};

use crate::facade::CacheFacade;
use crate::lock::LockOptions;

/// Default number of read-compute-write rounds for [`CacheFacade::merge`].
pub const MERGE_ATTEMPTS: u32 = 10;

/// What a merge callback wants written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Leave the key as it is; the merge succeeds
    NoOp,
    /// Write `value`, with `exptime` overriding the merge's TTL if set
    Store {
        value: CacheValue,
        exptime: Option<i64>,
    },
}

impl MergeOutcome {
    /// Store `value` with the merge's own TTL.
    pub fn store(value: impl Into<CacheValue>) -> Self {
        MergeOutcome::Store {
            value: value.into(),
            exptime: None,
        }
    }
}

impl<B: BackendAdapter> CacheFacade<B> {
    /// Merge a new value into `key` with compare-and-swap.
    ///
    /// `callback` receives the current value (`None` if absent) and may run
    /// once per attempt. An absent key is created with an add, so two
    /// concurrent creators cannot both win. Returns false when every attempt
    /// lost a race, or at once when any step latches an error (a backend
    /// failure or an oversized value); `attempts` of zero means one.
    pub async fn merge<F>(
        &self,
        key: &str,
        mut callback: F,
        exptime: i64,
        attempts: u32,
        flags: CacheFlags,
    ) -> bool
    where
        F: FnMut(Option<&CacheValue>) -> MergeOutcome + Send,
    {
        let mut remaining = attempts.max(1);
        loop {
            self.register.clear();
            let (current, token) = self
                .get_with_token(key, flags | CacheFlags::READ_LATEST)
                .await;
            if self.register.has_error() {
                tracing::warn!(key = %key, "Merge aborted by error on get");
                return false;
            }

            self.register.clear();
            let success = match callback(current.as_ref()) {
                MergeOutcome::NoOp => true,
                MergeOutcome::Store {
                    value,
                    exptime: override_exptime,
                } => {
                    let exptime = override_exptime.unwrap_or(exptime);
                    match token {
                        Some(token) => self.cas(token, key, &value, exptime, flags).await,
                        None => self.add(key, &value, exptime, flags).await,
                    }
                }
            };
            if self.register.has_error() {
                tracing::warn!(key = %key, "Merge aborted by error on write");
                return false;
            }

            remaining -= 1;
            if success || remaining == 0 {
                return success;
            }
            tracing::debug!(key = %key, remaining, "Merge lost a race, retrying");
        }
    }

    /// Overwrite `key` only if its token still equals `token`.
    ///
    /// Serialized against other writers of this key by a non-blocking lock.
    pub(crate) async fn cas(
        &self,
        token: CasToken,
        key: &str,
        value: &CacheValue,
        exptime: i64,
        flags: CacheFlags,
    ) -> bool {
        if !self.lock(key, &LockOptions::non_blocking()).await {
            tracing::info!(key = %key, "CAS lost the race for the key lock");
            return false;
        }

        let current = self.backend.get(key, CacheFlags::READ_LATEST).await;
        let success = match current {
            Ok(Some(fetched)) if fetched.token == token => {
                self.set(key, value, exptime, flags).await
            }
            Ok(_) => {
                tracing::info!(key = %key, "CAS failed due to race condition");
                false
            }
            Err(_) => false,
        };

        self.unlock(key).await;
        success
    }
}

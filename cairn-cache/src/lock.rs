//! Advisory locks with per-process reentrancy.
//!
//! The backend lock key `"{key}:lock"` is the only authority across
//! processes; it is taken with an atomic create-if-absent and always carries
//! an expiry, so a crashed holder's lock heals on its own. The local table
//! only tracks which keys this facade holds and how deeply.
//!
//! # State Transition Diagram
//!
//! ```text
//! (unheld) ── lock() ──→ Held{class, depth=1} ── lock(same class) ──→ depth+1
//!                              │                                        │
//!                              └──────── unlock() at depth 1 ◄──────────┘ unlock(): depth-1
//!                                              │
//!                                   (unheld, backend key deleted)
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use cairn_core::{convert_to_expiry, BackoffPolicy, CacheFlags, Clock, TTL_DAY};
use cairn_storage::BackendAdapter;

use crate::busy::BusyQueue;
use crate::tracked::{poisoned, TrackedBackend};
use crate::wait::{Condition, Step, WaitLoop, WaitOutcome};

/// Suffix appended to a key to form its backend lock key.
pub const LOCK_SUFFIX: &str = ":lock";

/// Options for [`ConcurrencyController::lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// How long to keep polling; zero means a single attempt
    pub timeout: Duration,
    /// Lock key TTL in seconds; zero means the one-day maximum
    pub expiry: i64,
    /// Callers sharing a class may re-acquire a lock this process holds
    pub reentrancy_class: Option<String>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(6),
            expiry: 6,
            reentrancy_class: None,
        }
    }
}

impl LockOptions {
    /// A single attempt with the default expiry.
    pub fn non_blocking() -> Self {
        Self {
            timeout: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_reentrancy_class(mut self, class: impl Into<String>) -> Self {
        self.reentrancy_class = Some(class.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LockEntry {
    class: Option<String>,
    depth: u32,
}

/// Process-local lock table plus the backend polling protocol.
#[derive(Debug)]
pub struct ConcurrencyController {
    held: Mutex<HashMap<String, LockEntry>>,
    backoff: BackoffPolicy,
}

impl ConcurrencyController {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            backoff,
        }
    }

    /// Backend key guarding `key`.
    pub fn lock_key(key: &str) -> String {
        format!("{key}{LOCK_SUFFIX}")
    }

    /// Current reentrancy depth of a lock this process holds.
    pub fn depth(&self, key: &str) -> Option<u32> {
        self.held.lock().ok()?.get(key).map(|entry| entry.depth)
    }

    /// Acquire the lock on `key`.
    ///
    /// Returns false on timeout, on a backend failure (latched), or
    /// immediately when this process already holds the key under a different
    /// (or no) reentrancy class.
    pub async fn lock<B: BackendAdapter>(
        &self,
        backend: &TrackedBackend<B>,
        busy: &BusyQueue,
        clock: &dyn Clock,
        key: &str,
        options: &LockOptions,
    ) -> bool {
        {
            let Ok(mut held) = self.held.lock() else {
                poisoned(backend.register());
                return false;
            };
            if let Some(entry) = held.get_mut(key) {
                let reentrant = options.reentrancy_class.as_deref().is_some_and(|class| {
                    !class.is_empty() && entry.class.as_deref() == Some(class)
                });
                if reentrant {
                    entry.depth += 1;
                    return true;
                }
                tracing::debug!(key = %key, "Lock already held by this process");
                return false;
            }
        }

        let ttl = if options.expiry == 0 {
            TTL_DAY
        } else {
            options.expiry.min(TTL_DAY)
        };
        let lock_key = Self::lock_key(key);

        let mut wait = WaitLoop::new(options.timeout, self.backoff.clone()).with_busy_queue(busy);
        let outcome = loop {
            let expiry = convert_to_expiry(ttl, clock.now());
            let condition = match backend.add(&lock_key, b"1", expiry).await {
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
            WaitOutcome::Reached => {
                let Ok(mut held) = self.held.lock() else {
                    poisoned(backend.register());
                    return false;
                };
                held.insert(
                    key.to_string(),
                    LockEntry {
                        class: options.reentrancy_class.clone(),
                        depth: 1,
                    },
                );
                true
            }
            WaitOutcome::Aborted => {
                tracing::warn!(key = %key, "Lock acquisition aborted by backend error");
                false
            }
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    key = %key,
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Lock acquisition timed out"
                );
                false
            }
        }
    }

    /// Release one level of the lock on `key`.
    ///
    /// Only the outermost release touches the backend. Returns false if the
    /// key is not held here or the backend delete failed.
    pub async fn unlock<B: BackendAdapter>(&self, backend: &TrackedBackend<B>, key: &str) -> bool {
        {
            let Ok(mut held) = self.held.lock() else {
                poisoned(backend.register());
                return false;
            };
            let Some(entry) = held.get_mut(key) else {
                return false;
            };
            entry.depth -= 1;
            if entry.depth > 0 {
                return true;
            }
            held.remove(key);
        }

        let lock_key = Self::lock_key(key);
        match backend.delete(&lock_key, CacheFlags::empty()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to release lock");
                false
            }
        }
    }
}

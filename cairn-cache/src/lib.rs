//! CAIRN Cache - Cache Facade
//!
//! The facade callers talk to. It layers transparent value segmentation,
//! advisory locks, compare-and-swap merges, TTL rewrites, counters and
//! duplicate-get instrumentation on top of any [`BackendAdapter`].
//!
//! Operations report failure through `bool`/`Option` sentinels and latch the
//! cause in a per-facade register, readable via [`CacheFacade::last_error`].

pub mod busy;
pub mod dupes;
pub mod facade;
pub mod lock;
pub mod merge;
pub mod segment;
pub mod tracked;
pub mod wait;

pub use busy::{BusyCallback, BusyQueue};
pub use dupes::{DeferredScheduler, DeferredTask, DuplicateKeyTracker, TokioScheduler};
pub use facade::CacheFacade;
pub use lock::{ConcurrencyController, LockOptions, LOCK_SUFFIX};
pub use merge::{MergeOutcome, MERGE_ATTEMPTS};
pub use segment::{SegmentEngine, WriteMode, WritePlan};
pub use tracked::{ErrorRegister, TrackedBackend};
pub use wait::{Condition, Step, WaitLoop, WaitOutcome};

pub use cairn_core::{CacheConfig, CacheError, CacheFlags, CacheResult, CacheValue};
pub use cairn_storage::BackendAdapter;

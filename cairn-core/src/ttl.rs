//! TTL normalization and time sources.
//!
//! A caller-supplied `exptime` is relative when it is non-zero and below ten
//! years, and an absolute UNIX timestamp otherwise. Zero means "never expires".
//! Stored expiries are always absolute (or zero).

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Seconds in a day.
pub const TTL_DAY: i64 = 86_400;

/// Seconds in a (365 day) year.
pub const TTL_YEAR: i64 = 365 * TTL_DAY;

/// No expiry.
pub const TTL_INDEFINITE: i64 = 0;

/// Whether `exptime` is a relative TTL rather than an absolute timestamp.
pub fn expiry_is_relative(exptime: i64) -> bool {
    exptime != 0 && exptime < 10 * TTL_YEAR
}

/// Convert an optionally relative `exptime` to an absolute expiry (0 = never).
///
/// - zero: returns zero
/// - negative, or positive below ten years: `now + exptime`
/// - ten years or more: returned unchanged
pub fn convert_to_expiry(exptime: i64, now: i64) -> i64 {
    if expiry_is_relative(exptime) {
        now.saturating_add(exptime)
    } else {
        exptime
    }
}

/// Whether an absolute expiry has passed.
pub fn is_expired(expiry: i64, now: i64) -> bool {
    expiry != TTL_INDEFINITE && expiry <= now
}

/// Source of the current UNIX time in seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UNIX time in seconds.
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Set the clock to `now`.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CacheError, CacheResult, ConfigError};

/// Default chunk size for segmented values (8 MiB).
pub const DEFAULT_SEGMENTATION_SIZE: usize = 8 * 1024 * 1024;

/// Default cap on the total size of a segmented value (64 MiB).
pub const DEFAULT_SEGMENTED_VALUE_MAX_SIZE: usize = 64 * 1024 * 1024;

/// Backoff between wait loop attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// First sleep duration
    pub initial: Duration,
    /// Upper bound on a single sleep
    pub max: Duration,
    pub multiplier: f32,
}

impl BackoffPolicy {
    /// Sleep duration before retry number `attempt` (0-based).
    ///
    /// Saturates at `max`, including when the growth overflows.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        Duration::try_from_secs_f32(self.initial.as_secs_f32() * factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

/// Cache facade configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keyspace for `make_key`
    pub keyspace: String,
    /// Bound on WRITE_SYNC confirmation
    pub sync_timeout: Duration,
    /// Bytes per chunk; `None` disables segmentation
    pub segmentation_size: Option<usize>,
    /// Largest value that may be segmented; `None` means unlimited
    pub segmented_value_max_size: Option<usize>,
    /// Report keys fetched more than once per window
    pub report_dupes: bool,
    pub lock_backoff: BackoffPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keyspace: "local".to_string(),
            sync_timeout: Duration::from_secs(3),
            segmentation_size: Some(DEFAULT_SEGMENTATION_SIZE),
            segmented_value_max_size: Some(DEFAULT_SEGMENTED_VALUE_MAX_SIZE),
            report_dupes: false,
            lock_backoff: BackoffPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Set the keyspace.
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = keyspace.into();
        self
    }

    /// Set the WRITE_SYNC confirmation bound.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the chunk size (`None` disables segmentation).
    pub fn with_segmentation_size(mut self, size: Option<usize>) -> Self {
        self.segmentation_size = size;
        self
    }

    /// Set the segmented value cap (`None` means unlimited).
    pub fn with_segmented_value_max_size(mut self, size: Option<usize>) -> Self {
        self.segmented_value_max_size = size;
        self
    }

    /// Enable or disable duplicate-get reporting.
    pub fn with_report_dupes(mut self, enabled: bool) -> Self {
        self.report_dupes = enabled;
        self
    }

    /// Set the lock/sync wait backoff.
    pub fn with_lock_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.lock_backoff = backoff;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - keyspace is not empty
    /// - segmentation_size and segmented_value_max_size are non-zero when set
    /// - lock_backoff.multiplier is positive and finite
    pub fn validate(&self) -> CacheResult<()> {
        if self.keyspace.is_empty() {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: "keyspace".to_string(),
                value: String::new(),
                reason: "keyspace must not be empty".to_string(),
            }));
        }

        if self.segmentation_size == Some(0) {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: "segmentation_size".to_string(),
                value: "0".to_string(),
                reason: "segmentation_size must be greater than 0".to_string(),
            }));
        }

        if self.segmented_value_max_size == Some(0) {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: "segmented_value_max_size".to_string(),
                value: "0".to_string(),
                reason: "segmented_value_max_size must be greater than 0".to_string(),
            }));
        }

        if !self.lock_backoff.multiplier.is_finite() || self.lock_backoff.multiplier <= 0.0 {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: "lock_backoff.multiplier".to_string(),
                value: self.lock_backoff.multiplier.to_string(),
                reason: "multiplier must be a positive finite number".to_string(),
            }));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keyspace, "local");
        assert_eq!(config.sync_timeout, Duration::from_secs(3));
        assert_eq!(config.segmentation_size, Some(8 * 1024 * 1024));
    }

    #[test]
    fn test_rejects_empty_keyspace() {
        let err = CacheConfig::default().with_keyspace("").validate().unwrap_err();
        match err {
            CacheError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "keyspace");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(CacheConfig::default()
            .with_segmentation_size(Some(0))
            .validate()
            .is_err());
        assert!(CacheConfig::default()
            .with_segmented_value_max_size(Some(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_unlimited_sizes_are_valid() {
        let config = CacheConfig::default()
            .with_segmentation_size(None)
            .with_segmented_value_max_size(None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(20));
        assert_eq!(backoff.delay(2), Duration::from_millis(40));
        assert_eq!(backoff.delay(20), Duration::from_millis(500));
    }

    #[test]
    fn test_steep_backoff_saturates_instead_of_overflowing() {
        let backoff = BackoffPolicy {
            multiplier: 10.0,
            ..BackoffPolicy::default()
        };
        let config = CacheConfig::default().with_lock_backoff(backoff.clone());
        assert!(config.validate().is_ok());
        for attempt in [3, 22, 25, 32, u32::MAX] {
            assert_eq!(backoff.delay(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn test_rejects_non_finite_multiplier() {
        for multiplier in [f32::NAN, f32::INFINITY, 0.0, -1.0] {
            let config = CacheConfig::default().with_lock_backoff(BackoffPolicy {
                multiplier,
                ..BackoffPolicy::default()
            });
            match config.validate().unwrap_err() {
                CacheError::Config(ConfigError::InvalidValue { field, .. }) => {
                    assert_eq!(field, "lock_backoff.multiplier");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = CacheConfig::default()
            .with_keyspace("enwiki")
            .with_report_dupes(true);
        let json = serde_json::to_string(&config).expect("serialize should succeed");
        let back: CacheConfig = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, config);
    }
}

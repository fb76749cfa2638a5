//! CAIRN Core - Cache Value Types
//!
//! Values, keys, flags, errors and the on-the-wire container shared by every
//! cairn crate. Nothing here talks to a backend.

pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod flags;
pub mod key;
pub mod ttl;
pub mod value;

pub use config::{BackoffPolicy, CacheConfig};
pub use container::{SegmentHash, ValueContainer, SEGMENT_HASH_LEN};
pub use error::{
    BackendError, BackendResult, CacheError, CacheResult, CodecError, ConfigError, ErrorCode,
};
pub use flags::CacheFlags;
pub use key::{KeyBuilder, GLOBAL_KEYSPACE, SEGMENT_CLASS};
pub use ttl::{
    convert_to_expiry, expiry_is_relative, is_expired, Clock, ManualClock, SystemClock, TTL_DAY,
    TTL_INDEFINITE, TTL_YEAR,
};
pub use value::CacheValue;

//! Values stored in and returned from the cache.

use serde::{de::DeserializeOwned, Serialize};

use crate::codec;
use crate::error::CodecError;

/// A cached value.
///
/// Integers are kept distinct so that they reach the backend as genuine
/// numeric text and remain usable with atomic increment/decrement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheValue {
    /// Integer stored as canonical decimal text
    Int(i64),
    /// Opaque byte payload
    Bytes(Vec<u8>),
}

impl CacheValue {
    /// Encode any serializable type as an opaque JSON payload.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        serde_json::to_vec(value)
            .map(CacheValue::Bytes)
            .map_err(|e| CodecError::Serialize {
                reason: e.to_string(),
            })
    }

    /// Decode this value as JSON into `T`.
    ///
    /// Integers decode through their decimal text, so `Int(7)` reads back as
    /// any numeric `T`.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_slice(&codec::serialize(self)).map_err(|e| CodecError::Deserialize {
            reason: e.to_string(),
        })
    }

    /// Returns true if this is an integer.
    pub fn is_int(&self) -> bool {
        matches!(self, CacheValue::Int(_))
    }

    /// Get the integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CacheValue::Int(i) => Some(*i),
            CacheValue::Bytes(_) => None,
        }
    }

    /// Get the byte payload, if this is not an integer.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Int(_) => None,
            CacheValue::Bytes(b) => Some(b),
        }
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Int(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        CacheValue::Bytes(value)
    }
}

impl From<&[u8]> for CacheValue {
    fn from(value: &[u8]) -> Self {
        CacheValue::Bytes(value.to_vec())
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Bytes(value.into_bytes())
    }
}

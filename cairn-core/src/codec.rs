//! Value serialization with an integer fast path.
//!
//! # Contract
//!
//! - `serialize(Int(i))` is the canonical decimal text of `i`; the backend sees
//!   a real number, so its atomic increment keeps working.
//! - `serialize(Bytes(b))` is `b`, verbatim.
//! - `unserialize(bytes)` returns `Int` whenever `bytes` is the canonical
//!   decimal text of an `i64` (parses and prints back identically), and `Bytes`
//!   otherwise.
//!
//! # Known ambiguity
//!
//! A byte value that happens to be canonical integer text is read back as an
//! integer: storing `Bytes(b"42")` yields `Int(42)` on the next read. Callers
//! that need to keep such strings intact must wrap them (for instance with
//! [`CacheValue::from_json`]).

use crate::value::CacheValue;

/// Serialize a value to the bytes handed to the backend.
pub fn serialize(value: &CacheValue) -> Vec<u8> {
    match value {
        CacheValue::Int(i) => i.to_string().into_bytes(),
        CacheValue::Bytes(b) => b.clone(),
    }
}

/// Deserialize bytes read from the backend.
pub fn unserialize(bytes: &[u8]) -> CacheValue {
    match canonical_integer(bytes) {
        Some(i) => CacheValue::Int(i),
        None => CacheValue::Bytes(bytes.to_vec()),
    }
}

/// Parse `bytes` as an integer only if it is that integer's canonical text.
///
/// `"007"`, `"+5"`, `"-0"` and out-of-range digit strings are not canonical.
pub fn canonical_integer(bytes: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(bytes).ok()?;
    let parsed: i64 = text.parse().ok()?;
    (parsed.to_string() == text).then_some(parsed)
}

//! Tagged wire representation of a main-key value.
//!
//! # Binary Format
//!
//! - Canonical integer text, untagged: a Plain value holding an integer. Left
//!   bare so the backend can increment it in place.
//! - `0x00` + payload: Plain
//! - `0x01` + payload: Unified (serialized value stored inline)
//! - `0x02` + N × 32 bytes: Segmented (chunk digests in chunk order)
//!
//! Tag bytes never collide with integer text, which starts with `-` or a digit.

use sha2::{Digest, Sha256};

use crate::codec;
use crate::error::CodecError;

const TAG_PLAIN: u8 = 0x00;
const TAG_UNIFIED: u8 = 0x01;
const TAG_SEGMENTED: u8 = 0x02;

/// Size of one chunk digest in the Segmented encoding.
pub const SEGMENT_HASH_LEN: usize = 32;

/// SHA-256 content hash of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentHash([u8; SEGMENT_HASH_LEN]);

impl SegmentHash {
    /// Hash a chunk's bytes.
    pub fn of(chunk: &[u8]) -> Self {
        let digest = Sha256::digest(chunk);
        let mut bytes = [0u8; SEGMENT_HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Wrap a raw digest.
    pub fn from_bytes(bytes: [u8; SEGMENT_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; SEGMENT_HASH_LEN] {
        &self.0
    }

    /// Lowercase hex form, as used in chunk keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// What a main key holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueContainer {
    /// Serialized value written directly
    Plain(Vec<u8>),
    /// Serialized value wrapped in the uniform container, stored inline
    Unified(Vec<u8>),
    /// Ordered chunk hashes; the value lives in the chunk keys
    Segmented(Vec<SegmentHash>),
}

impl ValueContainer {
    /// Encode for storage under the main key.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ValueContainer::Plain(payload) => {
                if codec::canonical_integer(payload).is_some() {
                    payload.clone()
                } else {
                    tagged(TAG_PLAIN, payload)
                }
            }
            ValueContainer::Unified(payload) => tagged(TAG_UNIFIED, payload),
            ValueContainer::Segmented(hashes) => {
                let mut bytes = Vec::with_capacity(1 + hashes.len() * SEGMENT_HASH_LEN);
                bytes.push(TAG_SEGMENTED);
                for hash in hashes {
                    bytes.extend_from_slice(hash.as_bytes());
                }
                bytes
            }
        }
    }

    /// Decode a stored main-key blob.
    ///
    /// Fails on an empty blob, an unknown tag, or a truncated hash list.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if codec::canonical_integer(bytes).is_some() {
            return Ok(ValueContainer::Plain(bytes.to_vec()));
        }

        let (tag, payload) = bytes.split_first().ok_or_else(|| CodecError::Deserialize {
            reason: "empty value container".to_string(),
        })?;

        match *tag {
            TAG_PLAIN => Ok(ValueContainer::Plain(payload.to_vec())),
            TAG_UNIFIED => Ok(ValueContainer::Unified(payload.to_vec())),
            TAG_SEGMENTED => {
                if payload.len() % SEGMENT_HASH_LEN != 0 {
                    return Err(CodecError::Deserialize {
                        reason: format!(
                            "segment list of {} bytes is not a multiple of {}",
                            payload.len(),
                            SEGMENT_HASH_LEN
                        ),
                    });
                }
                let hashes = payload
                    .chunks_exact(SEGMENT_HASH_LEN)
                    .map(|chunk| {
                        let mut digest = [0u8; SEGMENT_HASH_LEN];
                        digest.copy_from_slice(chunk);
                        SegmentHash::from_bytes(digest)
                    })
                    .collect();
                Ok(ValueContainer::Segmented(hashes))
            }
            other => Err(CodecError::Deserialize {
                reason: format!("unknown container tag {:#04x}", other),
            }),
        }
    }

    /// Returns true if this is a Segmented container.
    pub fn is_segmented(&self) -> bool {
        matches!(self, ValueContainer::Segmented(_))
    }
}

fn tagged(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(tag);
    bytes.extend_from_slice(payload);
    bytes
}

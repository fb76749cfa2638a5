//! Transparent splitting and joining of oversized values.
//!
//! A value written with `WRITE_ALLOW_SEGMENTS` that serializes to more than
//! `segmentation_size` bytes is cut into chunks, each stored under a
//! content-addressed global key. The main key then holds only the ordered
//! chunk hashes. Chunks are always written before the pointer, so a reader
//! never follows a pointer to chunks that were never stored. Chunks may still
//! expire or be evicted independently; a missing chunk reads as a miss.

use cairn_core::codec;
use cairn_core::{
    BackendError, CacheConfig, CacheError, CacheFlags, CacheResult, CacheValue, KeyBuilder,
    SegmentHash, ValueContainer,
};
use cairn_storage::BackendAdapter;

use crate::tracked::TrackedBackend;

/// Bytes to store for one logical write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    /// Encoded container for the main key
    pub main: Vec<u8>,
    /// Chunk keys and bytes, in chunk order; empty unless segmented
    pub chunks: Vec<(String, Vec<u8>)>,
}

/// How the main key is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Unconditional overwrite
    Set,
    /// Create only if absent
    Add,
}

/// Splits values into chunks and reassembles them.
#[derive(Debug, Clone)]
pub struct SegmentEngine {
    keys: KeyBuilder,
    segmentation_size: Option<usize>,
    max_size: Option<usize>,
}

impl SegmentEngine {
    pub fn new(keys: KeyBuilder, config: &CacheConfig) -> Self {
        Self {
            keys,
            segmentation_size: config.segmentation_size,
            max_size: config.segmented_value_max_size,
        }
    }

    /// Decide what to store for `value` under `key`.
    ///
    /// Fails with [`CacheError::SizeExceeded`] when a value that would be
    /// segmented is larger than `segmented_value_max_size`.
    pub fn plan(&self, key: &str, value: &CacheValue, flags: CacheFlags) -> CacheResult<WritePlan> {
        let serialized = codec::serialize(value);

        let segment_size = match self.segmentation_size {
            Some(size) if !value.is_int() && flags.contains(CacheFlags::WRITE_ALLOW_SEGMENTS) => {
                size
            }
            _ => {
                return Ok(WritePlan {
                    main: ValueContainer::Plain(serialized).encode(),
                    chunks: Vec::new(),
                })
            }
        };

        if serialized.len() <= segment_size {
            return Ok(WritePlan {
                main: ValueContainer::Unified(serialized).encode(),
                chunks: Vec::new(),
            });
        }

        if let Some(max) = self.max_size {
            if serialized.len() > max {
                return Err(CacheError::SizeExceeded {
                    key: key.to_string(),
                    size: serialized.len(),
                    max,
                });
            }
        }

        let mut hashes = Vec::with_capacity(serialized.len().div_ceil(segment_size));
        let mut chunks = Vec::with_capacity(hashes.capacity());
        for chunk in serialized.chunks(segment_size) {
            let hash = SegmentHash::of(chunk);
            chunks.push((self.keys.segment_key(key, &hash.to_hex()), chunk.to_vec()));
            hashes.push(hash);
        }

        Ok(WritePlan {
            main: ValueContainer::Segmented(hashes).encode(),
            chunks,
        })
    }

    /// Chunk keys for the given hashes, in order.
    pub fn chunk_keys(&self, key: &str, hashes: &[SegmentHash]) -> Vec<String> {
        hashes
            .iter()
            .map(|hash| self.keys.segment_key(key, &hash.to_hex()))
            .collect()
    }

    /// Write `value`: chunks first, then the main key.
    ///
    /// Returns false if nothing was stored under the main key; the cause is
    /// latched in the backend's register. With [`WriteMode::Add`] a lost race
    /// also returns false, leaving any written chunks as garbage.
    pub async fn store<B: BackendAdapter>(
        &self,
        backend: &TrackedBackend<B>,
        key: &str,
        value: &CacheValue,
        expiry: i64,
        flags: CacheFlags,
        mode: WriteMode,
    ) -> bool {
        let plan = match self.plan(key, value, flags) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Refusing oversized value");
                backend.register().latch(e);
                return false;
            }
        };

        if !plan.chunks.is_empty() {
            if backend
                .set_multi(&plan.chunks, expiry, flags.for_chunks())
                .await
                .is_err()
            {
                return false;
            }
            tracing::debug!(key = %key, chunks = plan.chunks.len(), "Stored value segments");
        }

        match mode {
            WriteMode::Set => backend.set(key, &plan.main, expiry, flags).await.is_ok(),
            WriteMode::Add => backend.add(key, &plan.main, expiry).await.unwrap_or(false),
        }
    }

    /// Turn a stored main-key blob back into a value.
    ///
    /// Returns `None` when the blob is malformed (latched as
    /// [`BackendError::UnexpectedValue`]), when a chunk read fails, or when any
    /// chunk is missing.
    pub async fn resolve<B: BackendAdapter>(
        &self,
        backend: &TrackedBackend<B>,
        key: &str,
        blob: &[u8],
        flags: CacheFlags,
    ) -> Option<CacheValue> {
        let container = match ValueContainer::decode(blob) {
            Ok(container) => container,
            Err(e) => {
                backend.register().latch(BackendError::UnexpectedValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
                return None;
            }
        };

        match container {
            ValueContainer::Plain(payload) | ValueContainer::Unified(payload) => {
                Some(codec::unserialize(&payload))
            }
            ValueContainer::Segmented(hashes) => {
                let chunk_keys = self.chunk_keys(key, &hashes);
                let fetched = backend.get_multi(&chunk_keys, flags).await;
                let mut serialized = Vec::new();
                for chunk in fetched {
                    serialized.extend_from_slice(&chunk?.value);
                }
                Some(codec::unserialize(&serialized))
            }
        }
    }

    /// Delete the main key, and with `WRITE_PRUNE_SEGMENTS` its chunks too.
    pub async fn delete<B: BackendAdapter>(
        &self,
        backend: &TrackedBackend<B>,
        key: &str,
        flags: CacheFlags,
    ) -> bool {
        if !flags.contains(CacheFlags::WRITE_PRUNE_SEGMENTS) {
            return backend.delete(key, flags).await.is_ok();
        }

        let main = backend
            .get(key, CacheFlags::READ_LATEST)
            .await
            .ok()
            .flatten();
        if backend.delete(key, flags).await.is_err() {
            return false;
        }

        let hashes = match main.map(|m| ValueContainer::decode(&m.value)) {
            Some(Ok(ValueContainer::Segmented(hashes))) => hashes,
            _ => return true,
        };

        let chunk_keys = self.chunk_keys(key, &hashes);
        tracing::debug!(key = %key, chunks = chunk_keys.len(), "Pruning value segments");
        backend
            .delete_multi(&chunk_keys, flags - CacheFlags::WRITE_PRUNE_SEGMENTS)
            .await
            .is_ok()
    }
}

//! Read/write hint flags accepted by cache operations.

use bitflags::bitflags;

bitflags! {
    /// Bitfield of read and write hints.
    ///
    /// Backends are free to ignore hints they cannot honor; the facade
    /// interprets the segmentation flags itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CacheFlags: u32 {
        /// Bypass stale replicas and read the most recent value
        const READ_LATEST = 0b0000_0001;
        /// Caller handles staleness; tiered backends may promote the value
        const READ_VERIFIED = 0b0000_0010;
        /// Wait until the write is confirmed before returning
        const WRITE_SYNC = 0b0000_0100;
        /// Allow oversized values to be split into content-addressed chunks
        const WRITE_ALLOW_SEGMENTS = 0b0000_1000;
        /// Also delete the chunks referenced by a segmented value
        const WRITE_PRUNE_SEGMENTS = 0b0001_0000;
    }
}

impl Default for CacheFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl CacheFlags {
    /// The flags to use for chunk writes derived from a parent write.
    pub fn for_chunks(self) -> Self {
        self - CacheFlags::WRITE_ALLOW_SEGMENTS
    }
}

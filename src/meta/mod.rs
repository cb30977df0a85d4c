//! On-spare metadata: the copy model, its bit-exact codec, copy placement,
//! the persistence engine, and attach-time reassembly.

use crate::device::DeviceFingerprint;
use crate::table::RemapEntry;

pub mod codec;
pub mod persist;
pub mod placement;
pub mod reassembly;

/// ASCII "DMR4", little-endian.
pub const FORMAT_MAGIC: u32 = 0x3452_4D44;
pub const FORMAT_MAJOR: u16 = 4;
pub const FORMAT_MINOR: u16 = 0;

/// Every copy is written as exactly this many 512-byte sectors.
pub const COPY_SECTORS: u64 = 8;
pub const COPY_BYTES: usize = COPY_SECTORS as usize * crate::device::SECTOR_SIZE;

/// A single on-disk metadata image. Written atomically as one full image;
/// never updated in place with partial contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCopy {
    pub version_major: u16,
    pub version_minor: u16,
    pub sequence: u64,
    /// Unix seconds at creation.
    pub timestamp: u64,
    pub main_fingerprint: DeviceFingerprint,
    pub spare_fingerprint: DeviceFingerprint,
    pub entries: Vec<RemapEntry>,
}

impl MetadataCopy {
    pub fn new(
        sequence: u64,
        timestamp: u64,
        main_fingerprint: DeviceFingerprint,
        spare_fingerprint: DeviceFingerprint,
        entries: Vec<RemapEntry>,
    ) -> Self {
        Self {
            version_major: FORMAT_MAJOR,
            version_minor: FORMAT_MINOR,
            sequence,
            timestamp,
            main_fingerprint,
            spare_fingerprint,
            entries,
        }
    }
}

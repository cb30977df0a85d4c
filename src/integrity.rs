//! Integrity primitives: the CRC32 variant used by the on-spare metadata
//! format, and the target-local monotonic counters.

use std::sync::atomic::{AtomicU64, Ordering};

// IEEE 802.3 polynomial, reflected. This exact variant (seed 0xFFFFFFFF,
// final XOR 0xFFFFFFFF) is required for on-disk compatibility.
const CRC32_POLY: u32 = 0xEDB8_8320;

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Streaming CRC32 over byte ranges.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.state;
        for &byte in bytes {
            let idx = ((crc ^ byte as u32) & 0xFF) as usize;
            crc = (crc >> 8) ^ CRC32_TABLE[idx];
        }
        self.state = crc;
    }

    pub fn finalize(self) -> u32 {
        !self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC32 of a byte slice.
pub fn crc32_of(bytes: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(bytes);
    crc.finalize()
}

/// Target-local monotonic counters. Each `next_*` call returns a strictly
/// increasing value across the lifetime of the target; `seed` re-bases both
/// to one past the values recovered from the winning metadata copy.
#[derive(Debug)]
pub struct MonotonicCounters {
    sequence: AtomicU64,
    version: AtomicU64,
}

impl MonotonicCounters {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(1),
            version: AtomicU64::new(1),
        }
    }

    pub fn seed(&self, sequence: u64, version: u64) {
        self.sequence.store(sequence + 1, Ordering::Relaxed);
        self.version.store(version + 1, Ordering::Relaxed);
    }

    pub fn next_sequence_number(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_version_id(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed)
    }

    /// The most recently issued sequence number (0 if none was issued yet).
    pub fn last_sequence_number(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed) - 1
    }
}

impl Default for MonotonicCounters {
    fn default() -> Self {
        Self::new()
    }
}

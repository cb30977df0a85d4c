//! Fuzzy device identification. A fingerprint is never authoritative on its
//! own; reassembly scores the stored fingerprint against the attached
//! device and gates on the combined confidence.

use crate::integrity::crc32_of;

use super::BlockDevice;

/// Confidence at or above which a fingerprint match is accepted silently.
pub const CONFIDENCE_ACCEPT: u32 = 60;
/// Confidence at or above which a match is accepted with a warning.
pub const CONFIDENCE_WARN: u32 = 40;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFingerprint {
    /// Best-effort path; may change across reboots.
    pub path: String,
    /// Authoritative for matching.
    pub size_sectors: u64,
    /// Hash of stable identity material.
    pub content_hash: u32,
    /// Empty when the platform provides none.
    pub uuid: String,
}

impl DeviceFingerprint {
    pub fn capture(dev: &dyn BlockDevice) -> Self {
        let uuid = dev.uuid().unwrap_or("").to_string();
        // identity material that survives a path change when a uuid exists
        let hash_input = if uuid.is_empty() {
            dev.path().as_bytes().to_vec()
        } else {
            uuid.as_bytes().to_vec()
        };
        Self {
            path: dev.path().to_string(),
            size_sectors: dev.size_sectors(),
            content_hash: crc32_of(&hash_input),
            uuid,
        }
    }

    /// Score this stored fingerprint against a freshly captured one.
    /// Weights: uuid 40, path 25, size 25 (15 within 1%), content hash 10.
    pub fn confidence(&self, current: &DeviceFingerprint) -> u32 {
        let mut score = 0;
        if !self.uuid.is_empty() && self.uuid == current.uuid {
            score += 40;
        }
        if !self.path.is_empty() && self.path == current.path {
            score += 25;
        }
        if self.size_sectors == current.size_sectors {
            score += 25;
        } else if within_one_percent(self.size_sectors, current.size_sectors) {
            score += 15;
        }
        if self.content_hash == current.content_hash {
            score += 10;
        }
        score
    }
}

// handles minor capacity reporting differences across kernels/firmware
fn within_one_percent(a: u64, b: u64) -> bool {
    let larger = a.max(b);
    a.abs_diff(b).saturating_mul(100) <= larger
}

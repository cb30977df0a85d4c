//! Persistence engine: owns when and how metadata reaches the spare.
//!
//! Policy is write-ahead with fire-and-forget on detach: a full image is
//! written at attach (so reassembly always finds something), a new full
//! image goes to every copy location before any bio is allowed to depend
//! on a new remap, and detach flushes once more if the in-memory state is
//! ahead of the disk. No hardware barrier is issued; a torn write fails
//! its CRC and is indistinguishable from a corrupt copy, which reassembly
//! already tolerates.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use crate::counters::TargetCounters;
use crate::device::{BlockDevice, DeviceFingerprint};
use crate::error::{RemapError, Result};
use crate::table::RemapEntry;

use super::codec;
use super::placement::MetadataPlacement;
use super::MetadataCopy;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The single writer of metadata images. Guarded by a mutex in the target;
/// callers never hold the table lock while in here.
pub struct PersistCore {
    spare: Arc<dyn BlockDevice>,
    placement: MetadataPlacement,
    main_fingerprint: DeviceFingerprint,
    spare_fingerprint: DeviceFingerprint,
    last_persisted_sequence: u64,
}

impl PersistCore {
    pub fn new(
        spare: Arc<dyn BlockDevice>,
        placement: MetadataPlacement,
        main_fingerprint: DeviceFingerprint,
        spare_fingerprint: DeviceFingerprint,
    ) -> Self {
        Self {
            spare,
            placement,
            main_fingerprint,
            spare_fingerprint,
            last_persisted_sequence: 0,
        }
    }

    pub fn last_persisted_sequence(&self) -> u64 {
        self.last_persisted_sequence
    }

    /// Serialize the snapshot under `sequence` and write it to every copy
    /// location in order. Partial success is success as long as at least
    /// one copy carries the new sequence; total failure is `Persist`.
    pub fn write_image(
        &mut self,
        entries: &[RemapEntry],
        sequence: u64,
        counters: &TargetCounters,
    ) -> Result<()> {
        let copy = MetadataCopy::new(
            sequence,
            unix_now(),
            self.main_fingerprint.clone(),
            self.spare_fingerprint.clone(),
            entries.to_vec(),
        );
        let image = codec::encode(&copy).map_err(|err| {
            warn!("metadata image not serializable: {err}");
            counters.record_persist_failure();
            RemapError::Persist
        })?;

        let mut written = 0usize;
        for &location in &self.placement.locations {
            match self.spare.write_sectors(location, &image) {
                Ok(()) => {
                    written += 1;
                    counters.record_copy_written();
                }
                Err(err) => {
                    warn!("metadata copy at sector {location} not written: {err}");
                    counters.record_copy_write_failure();
                }
            }
        }

        if written == 0 {
            counters.record_persist_failure();
            return Err(RemapError::Persist);
        }
        if written < self.placement.copies() {
            warn!(
                "metadata seq {} reached only {}/{} copies",
                sequence,
                written,
                self.placement.copies()
            );
        }
        self.last_persisted_sequence = sequence;
        Ok(())
    }
}

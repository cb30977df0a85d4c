//! Attach-time reassembly: read every planned copy location, elect the
//! winning copy, and gate on fuzzy device identification before the
//! recovered entries are allowed anywhere near the remap engine.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::counters::TargetCounters;
use crate::device::{BlockDevice, DeviceFingerprint, CONFIDENCE_ACCEPT, CONFIDENCE_WARN};
use crate::error::{RemapError, Result};

use super::codec;
use super::placement::MetadataPlacement;
use super::{MetadataCopy, COPY_BYTES};

/// Outcome of a successful reassembly. `copy == None` means a fresh start:
/// the spare carried no metadata and is zeroed.
pub struct RecoveredState {
    pub copy: Option<MetadataCopy>,
    pub confidence: u32,
}

/// Pick the winning copy: highest sequence number, then latest timestamp,
/// then lowest copy index. Deterministic for any input order because the
/// candidates arrive in copy-index order and ties keep the incumbent.
pub fn elect_winner(candidates: &[(usize, MetadataCopy)]) -> Option<&(usize, MetadataCopy)> {
    let mut best: Option<&(usize, MetadataCopy)> = None;
    for candidate in candidates {
        let better = match best {
            None => true,
            Some((_, incumbent)) => {
                candidate.1.sequence > incumbent.sequence
                    || (candidate.1.sequence == incumbent.sequence
                        && candidate.1.timestamp > incumbent.timestamp)
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

/// Read and validate every copy the placement dictates, then apply the
/// fingerprint gate against the devices actually being attached.
pub fn recover(
    main: &Arc<dyn BlockDevice>,
    spare: &Arc<dyn BlockDevice>,
    placement: &MetadataPlacement,
    force_attach: bool,
    counters: &TargetCounters,
) -> Result<RecoveredState> {
    let mut candidates: Vec<(usize, MetadataCopy)> = Vec::new();
    let mut readable = 0usize;
    let mut all_read_zero = true;
    let mut last_io_error: Option<std::io::Error> = None;

    for (index, &location) in placement.locations.iter().enumerate() {
        let mut buf = vec![0u8; COPY_BYTES];
        if let Err(err) = spare.read_sectors(location, &mut buf) {
            warn!("metadata copy {index} at sector {location} unreadable: {err}");
            last_io_error = Some(err);
            continue;
        }
        readable += 1;
        if buf.iter().any(|&b| b != 0) {
            all_read_zero = false;
        }
        match codec::decode(&buf) {
            Ok(copy) => {
                counters.record_meta_read_ok();
                debug!(
                    "metadata copy {index} at sector {location}: seq {} with {} entries",
                    copy.sequence,
                    copy.entries.len()
                );
                candidates.push((index, copy));
            }
            Err(err) => {
                debug!("metadata copy {index} at sector {location} rejected: {err}");
            }
        }
    }

    if candidates.is_empty() {
        if readable == 0 {
            return Err(RemapError::Device(last_io_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "no copy location readable")
            })));
        }
        if all_read_zero {
            info!("spare carries no metadata; starting fresh");
            return Ok(RecoveredState {
                copy: None,
                confidence: 0,
            });
        }
        // data present but nothing validates: likely the wrong device
        return Err(RemapError::Integrity);
    }

    let (winner_index, winner) = elect_winner(&candidates).expect("candidates not empty");
    let confidence = gate_fingerprints(main, spare, winner, force_attach, counters)?;
    info!(
        "reassembled from copy {} (seq {}, {} entries, confidence {})",
        winner_index,
        winner.sequence,
        winner.entries.len(),
        confidence
    );
    Ok(RecoveredState {
        copy: Some(winner.clone()),
        confidence,
    })
}

/// Both stored fingerprints must believe the devices being attached; the
/// combined confidence is the weaker of the two. A winning copy whose
/// spare fingerprint names some other device is refused rather than
/// silently rebound.
fn gate_fingerprints(
    main: &Arc<dyn BlockDevice>,
    spare: &Arc<dyn BlockDevice>,
    winner: &MetadataCopy,
    force_attach: bool,
    counters: &TargetCounters,
) -> Result<u32> {
    let current_main = DeviceFingerprint::capture(main.as_ref());
    let current_spare = DeviceFingerprint::capture(spare.as_ref());
    let main_score = winner.main_fingerprint.confidence(&current_main);
    let spare_score = winner.spare_fingerprint.confidence(&current_spare);
    let confidence = main_score.min(spare_score);
    counters.set_reassembly_confidence(confidence);

    if confidence < CONFIDENCE_WARN {
        if force_attach {
            warn!(
                "fingerprint confidence {confidence} below threshold; attach forced by override"
            );
            return Ok(confidence);
        }
        return Err(RemapError::FingerprintMismatch { confidence });
    }
    if confidence < CONFIDENCE_ACCEPT {
        warn!(
            "fingerprint confidence {confidence} (main {main_score}, spare {spare_score}) is marginal"
        );
        counters.record_fingerprint_warning();
    }
    Ok(confidence)
}

/// Fleet reassembly helper: among several candidate spares, pick the one
/// whose recovered metadata best matches the main device being attached.
pub fn best_candidate(
    main: &Arc<dyn BlockDevice>,
    spares: &[Arc<dyn BlockDevice>],
) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, spare) in spares.iter().enumerate() {
        let placement = match MetadataPlacement::plan(spare.size_sectors()) {
            Ok(placement) => placement,
            Err(_) => continue,
        };
        let scratch = TargetCounters::new();
        match recover(main, spare, &placement, false, &scratch) {
            Ok(RecoveredState {
                copy: Some(_),
                confidence,
            }) => {
                if best.map_or(true, |(_, top)| confidence > top) {
                    best = Some((index, confidence));
                }
            }
            Ok(RecoveredState { copy: None, .. }) | Err(_) => {}
        }
    }
    best.map(|(index, _)| index)
}

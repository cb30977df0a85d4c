//! Deferred half of the auto-remap path. The worker owns the queue end:
//! allocate spare units for the failed range, install entries, write-ahead
//! the metadata, then resubmit the bio. Shutdown drains the queue so that
//! queued remaps still reach the metadata, but drained bios complete with
//! their original error instead of being retried into a dying target.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::table::{flags, RemapEntry};
use crate::target::TargetInner;

use super::Bio;
use super::BioStatus;

/// Idle interval after which the worker re-broadcasts dirty state, so a
/// transient spare failure during a write-ahead heals without waiting for
/// the next remap event.
const SYNC_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) struct AutoRemapJob {
    pub bio: Bio,
    pub failed_sector: u64,
    pub failed_sectors: u64,
}

struct InstallOutcome {
    inserted: Vec<u64>,
    exhausted: bool,
}

pub(crate) fn worker_loop(inner: Arc<TargetInner>, jobs: Receiver<AutoRemapJob>) {
    loop {
        // buffered jobs are still delivered after every sender is gone,
        // so shutdown drains the queue before the disconnect shows up
        match jobs.recv_timeout(SYNC_INTERVAL) {
            Ok(job) => inner.handle_auto_remap(job),
            Err(RecvTimeoutError::Timeout) => {
                if inner.dirty.load(Ordering::Acquire) {
                    if let Err(err) = inner.persist_current() {
                        warn!("periodic metadata sync failed: {err}");
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("persistence worker drained, exiting");
}

impl TargetInner {
    fn install_entries(&self, failed_sector: u64, failed_sectors: u64) -> InstallOutcome {
        let mut inserted = Vec::new();
        // lock order: allocator, then table writer; no I/O under either
        let mut allocator = self.allocator.lock().expect("allocator lock poisoned");
        let mut table = self.table.write().expect("remap table lock poisoned");
        let end = failed_sector + failed_sectors;
        let mut cursor = failed_sector;
        while cursor < end {
            if table.lookup(cursor).is_some() {
                // a racing path already did the work for this sector
                cursor += 1;
                continue;
            }
            let unit_start = match allocator.allocate(&self.reservations) {
                Ok(start) => start,
                Err(_) => {
                    self.counters.record_alloc_failure();
                    warn!(
                        "auto-remap of sector {cursor} abandoned: spare exhausted ({} entries installed)",
                        inserted.len()
                    );
                    return InstallOutcome {
                        inserted,
                        exhausted: true,
                    };
                }
            };
            let unit = allocator.unit();
            let mut offset = 0u64;
            while offset < unit && cursor < end && table.lookup(cursor).is_none() {
                let entry = RemapEntry {
                    main_sector: cursor,
                    spare_sector: unit_start + offset,
                    flags: flags::VALID | flags::PENDING_WRITEAHEAD,
                };
                table.insert(entry).expect("absence checked under write lock");
                inserted.push(cursor);
                self.counters.record_auto_remap();
                cursor += 1;
                offset += 1;
            }
        }
        InstallOutcome {
            inserted,
            exhausted: false,
        }
    }

    pub(crate) fn handle_auto_remap(self: &Arc<Self>, job: AutoRemapJob) {
        let AutoRemapJob {
            mut bio,
            failed_sector,
            failed_sectors,
        } = job;

        let outcome = self.install_entries(failed_sector, failed_sectors);

        if !outcome.inserted.is_empty() {
            self.dirty.store(true, Ordering::Release);
            // write-ahead: the mapping must be durable before any I/O
            // depends on it
            match self.persist_current() {
                Ok(sequence) => {
                    let mut table = self.table.write().expect("remap table lock poisoned");
                    for &sector in &outcome.inserted {
                        table.set_flags(sector, flags::VALID);
                    }
                    debug!(
                        "auto-remap installed {} entries for main {} (+{}) at seq {sequence}",
                        outcome.inserted.len(),
                        failed_sector,
                        failed_sectors
                    );
                }
                Err(err) => {
                    warn!("auto-remap write-ahead failed: {err}; retrying bio regardless");
                }
            }
        }

        if outcome.exhausted || self.shutting_down.load(Ordering::Acquire) {
            // the bio keeps its original error status
            self.finish_bio(bio, BioStatus::IoError);
            return;
        }
        bio.retried = true;
        self.submit_bio(bio);
    }
}

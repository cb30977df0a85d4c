//! The bio remap engine. Splits each incoming bio into segments that
//! either entirely hit the remap table or entirely miss, routes segments
//! to the main or spare device, and runs the completion. A main-device
//! failure with auto-remap enabled is deferred to the persistence worker,
//! which write-aheads the new mapping before the bio is retried.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, warn};
use smallvec::SmallVec;

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::target::TargetInner;

mod auto_remap;
mod bio;

pub use bio::{Bio, BioOp, BioResult, BioStatus, CompletionFn};
pub(crate) use auto_remap::{worker_loop, AutoRemapJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Main,
    Spare(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub main_sector: u64,
    pub sectors: u64,
    pub route: Route,
}

impl TargetInner {
    /// Per-sector table lookups, grouped into maximal runs that stay on one
    /// device and remain contiguous on it. Holds the table read lock only
    /// while grouping; no I/O happens under it.
    pub(crate) fn split_bio(&self, start: u64, count: u64) -> SmallVec<[Segment; 4]> {
        let table = self.table.read().expect("remap table lock poisoned");
        let mut segments: SmallVec<[Segment; 4]> = SmallVec::new();
        let mut index = 0u64;
        while index < count {
            let main_sector = start + index;
            match table.lookup(main_sector) {
                None => {
                    let mut run = 1u64;
                    while index + run < count && table.lookup(start + index + run).is_none() {
                        run += 1;
                    }
                    segments.push(Segment {
                        main_sector,
                        sectors: run,
                        route: Route::Main,
                    });
                    index += run;
                }
                Some(spare_sector) => {
                    let mut run = 1u64;
                    while index + run < count {
                        match table.lookup(start + index + run) {
                            Some(next) if next == spare_sector + run => run += 1,
                            _ => break,
                        }
                    }
                    segments.push(Segment {
                        main_sector,
                        sectors: run,
                        route: Route::Spare(spare_sector),
                    });
                    index += run;
                }
            }
        }
        segments
    }

    pub(crate) fn submit_bio(self: &Arc<Self>, bio: Bio) {
        if self.shutting_down.load(Ordering::Acquire) {
            if bio.retried {
                // already admitted once; settle the in-flight gauge
                self.finish_bio(bio, BioStatus::Shutdown);
            } else {
                bio.complete(BioStatus::Shutdown);
            }
            return;
        }
        let sectors = bio.sectors();
        if sectors == 0
            || bio.data.len() % SECTOR_SIZE != 0
            || bio.sector.saturating_add(sectors) > self.main.size_sectors()
        {
            warn!(
                "malformed bio rejected: sector {} len {} bytes",
                bio.sector,
                bio.data.len()
            );
            bio.complete(BioStatus::IoError);
            return;
        }
        if !bio.retried {
            self.counters.record_bio(bio.op.is_write());
        }
        self.drive_segments(bio);
    }

    /// Run every segment of the bio against its routed device. The first
    /// failing segment decides the outcome: main-device failures feed the
    /// auto-remap path, everything else completes with the error.
    fn drive_segments(self: &Arc<Self>, mut bio: Bio) {
        let segments = self.split_bio(bio.sector, bio.sectors());
        let mut failed: Option<Segment> = None;
        for segment in &segments {
            let offset = (segment.main_sector - bio.sector) as usize * SECTOR_SIZE;
            let bytes = segment.sectors as usize * SECTOR_SIZE;
            let (device, device_sector): (&dyn BlockDevice, u64) = match segment.route {
                Route::Main => (self.main.as_ref(), segment.main_sector),
                Route::Spare(spare_sector) => (self.spare.as_ref(), spare_sector),
            };
            let outcome = match bio.op {
                BioOp::Read => device.read_sectors(device_sector, &mut bio.data[offset..offset + bytes]),
                BioOp::Write => device.write_sectors(device_sector, &bio.data[offset..offset + bytes]),
            };
            if let Err(err) = outcome {
                debug!(
                    "{:?} of {} sectors at main {} failed on {:?}: {err}",
                    bio.op, segment.sectors, segment.main_sector, segment.route
                );
                self.counters.record_error(bio.op.is_write());
                failed = Some(*segment);
                break;
            }
        }

        let segment = match failed {
            None => {
                self.finish_bio(bio, BioStatus::Ok);
                return;
            }
            Some(segment) => segment,
        };
        let eligible = matches!(segment.route, Route::Main)
            && !bio.retried
            && self.auto_remap.load(Ordering::Relaxed)
            && !self.shutting_down.load(Ordering::Acquire);
        if !eligible {
            self.finish_bio(bio, BioStatus::IoError);
            return;
        }
        self.defer_auto_remap(AutoRemapJob {
            bio,
            failed_sector: segment.main_sector,
            failed_sectors: segment.sectors,
        });
    }

    /// Final completion of a bio that was admitted to the engine: settle
    /// the in-flight gauge and run the original completion.
    pub(crate) fn finish_bio(&self, bio: Bio, status: BioStatus) {
        self.counters.record_bio_done();
        bio.complete(status);
    }

    /// Hand the failed bio to the worker. Persistence and resubmission
    /// must not run in the completion context.
    fn defer_auto_remap(&self, job: AutoRemapJob) {
        let sender = self
            .worker_tx
            .lock()
            .expect("worker queue lock poisoned")
            .clone();
        match sender {
            Some(sender) => {
                if let Err(returned) = sender.send(job) {
                    let job = returned.0;
                    self.finish_bio(job.bio, BioStatus::IoError);
                }
            }
            None => self.finish_bio(job.bio, BioStatus::IoError),
        }
    }
}

//! Per-target observability counters. Independent relaxed atomics; read
//! consistency across counters is neither guaranteed nor required. The
//! snapshot feeds the status line and the `stats` JSON dump.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TargetCounters {
    total_bios: AtomicU64,
    inflight_bios: AtomicU64,
    read_bios: AtomicU64,
    write_bios: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
    auto_remaps: AtomicU64,
    alloc_failures: AtomicU64,
    persist_failures: AtomicU64,
    copy_write_failures: AtomicU64,
    copies_written: AtomicU64,
    meta_reads_ok: AtomicU64,
    fingerprint_warnings: AtomicU64,
    // stored value, not accumulated
    reassembly_confidence: AtomicU64,
}

impl TargetCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bio(&self, write: bool) {
        self.total_bios.fetch_add(1, Ordering::Relaxed);
        self.inflight_bios.fetch_add(1, Ordering::Relaxed);
        if write {
            self.write_bios.fetch_add(1, Ordering::Relaxed);
        } else {
            self.read_bios.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_bio_done(&self) {
        self.inflight_bios.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, write: bool) {
        if write {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.read_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_auto_remap(&self) {
        self.auto_remaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alloc_failure(&self) {
        self.alloc_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy_write_failure(&self) {
        self.copy_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy_written(&self) {
        self.copies_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_meta_read_ok(&self) {
        self.meta_reads_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fingerprint_warning(&self) {
        self.fingerprint_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_reassembly_confidence(&self, confidence: u32) {
        self.reassembly_confidence
            .store(confidence as u64, Ordering::Relaxed);
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn auto_remaps(&self) -> u64 {
        self.auto_remaps.load(Ordering::Relaxed)
    }

    pub fn alloc_failures(&self) -> u64 {
        self.alloc_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_bios: self.total_bios.load(Ordering::Relaxed),
            inflight_bios: self.inflight_bios.load(Ordering::Relaxed),
            read_bios: self.read_bios.load(Ordering::Relaxed),
            write_bios: self.write_bios.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            auto_remaps: self.auto_remaps.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            copy_write_failures: self.copy_write_failures.load(Ordering::Relaxed),
            copies_written: self.copies_written.load(Ordering::Relaxed),
            meta_reads_ok: self.meta_reads_ok.load(Ordering::Relaxed),
            fingerprint_warnings: self.fingerprint_warnings.load(Ordering::Relaxed),
            reassembly_confidence: self.reassembly_confidence.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CountersSnapshot {
    pub total_bios: u64,
    pub inflight_bios: u64,
    pub read_bios: u64,
    pub write_bios: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub auto_remaps: u64,
    pub alloc_failures: u64,
    pub persist_failures: u64,
    pub copy_write_failures: u64,
    pub copies_written: u64,
    pub meta_reads_ok: u64,
    pub fingerprint_warnings: u64,
    pub reassembly_confidence: u64,
}

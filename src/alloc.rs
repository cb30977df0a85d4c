//! Spare capacity allocator. Hands out allocation-unit-sized sector ranges
//! on the spare device, skipping reserved extents and units already backing
//! a live remap entry. Next-fit: the scan starts past the last grant and
//! wraps around once before reporting `NoCapacity`. The cursor is not
//! persisted; it restarts at the first unit after reattach.

use std::collections::BTreeSet;

use crate::error::{RemapError, Result};
use crate::reserve::ReservationMap;

pub const DEFAULT_ALLOCATION_UNIT: u64 = 8;

#[derive(Debug)]
pub struct SpareAllocator {
    size_sectors: u64,
    unit: u64,
    // next unit index to try
    cursor: u64,
    // unit start sectors backing live remap entries
    in_use: BTreeSet<u64>,
}

impl SpareAllocator {
    pub fn new(size_sectors: u64, unit: u64) -> Self {
        debug_assert!(unit > 0);
        Self {
            size_sectors,
            unit,
            cursor: 0,
            in_use: BTreeSet::new(),
        }
    }

    pub fn unit(&self) -> u64 {
        self.unit
    }

    fn unit_start(&self, sector: u64) -> u64 {
        sector - sector % self.unit
    }

    fn total_units(&self) -> u64 {
        self.size_sectors / self.unit
    }

    /// Mark the unit containing `spare_sector` as in use. Called while
    /// rebuilding state from recovered remap entries.
    pub fn mark_in_use(&mut self, spare_sector: u64) {
        self.in_use.insert(self.unit_start(spare_sector));
    }

    /// Release the unit containing `spare_sector` (entry removed).
    pub fn release(&mut self, spare_sector: u64) {
        self.in_use.remove(&self.unit_start(spare_sector));
    }

    /// Grant a free, non-reserved allocation unit. Returns its first sector.
    pub fn allocate(&mut self, reservations: &ReservationMap) -> Result<u64> {
        let total = self.total_units();
        for step in 0..total {
            let unit_idx = (self.cursor + step) % total;
            let start = unit_idx * self.unit;
            if start + self.unit > self.size_sectors {
                continue;
            }
            if self.in_use.contains(&start) {
                continue;
            }
            if reservations.overlaps_range(start, self.unit) {
                continue;
            }
            self.in_use.insert(start);
            self.cursor = unit_idx + 1;
            return Ok(start);
        }
        Err(RemapError::NoCapacity)
    }

    /// Free spare sectors: neither reserved nor backing a live entry.
    /// Counted in whole units, which is what the allocator can actually
    /// still grant.
    pub fn free_sectors(&self, reservations: &ReservationMap) -> u64 {
        let mut free_units = 0u64;
        for unit_idx in 0..self.total_units() {
            let start = unit_idx * self.unit;
            if start + self.unit > self.size_sectors {
                continue;
            }
            if self.in_use.contains(&start) || reservations.overlaps_range(start, self.unit) {
                continue;
            }
            free_units += 1;
        }
        free_units * self.unit
    }
}

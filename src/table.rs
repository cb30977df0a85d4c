//! The remap table: main sector -> spare sector. Lookups come from the bio
//! hot path under a shared read lock held by the target; inserts and
//! removals come from the admin and auto-remap paths under the write lock.
//!
//! Buckets are owned directly (no std::collections::HashMap) so the resize
//! policy is explicit: start at 64 buckets, double when load exceeds 1.5,
//! halve when load drops below 0.5, never below 64. Bucket counts stay
//! powers of two so the hash can be masked instead of divided.

use fnv::FnvHasher;
use std::hash::Hasher;

use crate::error::{RemapError, Result};

pub const INITIAL_BUCKETS: usize = 64;

pub mod flags {
    pub const VALID: u8 = 1 << 0;
    pub const PENDING_WRITEAHEAD: u8 = 1 << 1;
    pub const FAILED_VERIFY: u8 = 1 << 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapEntry {
    pub main_sector: u64,
    pub spare_sector: u64,
    pub flags: u8,
}

impl RemapEntry {
    pub fn new(main_sector: u64, spare_sector: u64) -> Self {
        Self {
            main_sector,
            spare_sector,
            flags: flags::VALID,
        }
    }
}

#[derive(Debug)]
pub struct RemapTable {
    buckets: Vec<Vec<RemapEntry>>,
    entries: usize,
}

impl RemapTable {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); INITIAL_BUCKETS],
            entries: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of(&self, main_sector: u64) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write_u64(main_sector);
        (hasher.finish() as usize) & (self.buckets.len() - 1)
    }

    /// Expected O(1). Returns the spare sector by value; the caller holds no
    /// reference into the table.
    pub fn lookup(&self, main_sector: u64) -> Option<u64> {
        self.get(main_sector).map(|entry| entry.spare_sector)
    }

    pub fn get(&self, main_sector: u64) -> Option<RemapEntry> {
        let bucket = &self.buckets[self.bucket_of(main_sector)];
        bucket
            .iter()
            .find(|entry| entry.main_sector == main_sector)
            .copied()
    }

    /// Fails with `Duplicate` (and leaves the table untouched) if an entry
    /// for the main sector already exists.
    pub fn insert(&mut self, entry: RemapEntry) -> Result<()> {
        let idx = self.bucket_of(entry.main_sector);
        if self.buckets[idx]
            .iter()
            .any(|existing| existing.main_sector == entry.main_sector)
        {
            return Err(RemapError::Duplicate(entry.main_sector));
        }
        self.buckets[idx].push(entry);
        self.entries += 1;
        self.maybe_grow();
        Ok(())
    }

    pub fn remove(&mut self, main_sector: u64) -> Option<RemapEntry> {
        let idx = self.bucket_of(main_sector);
        let pos = self.buckets[idx]
            .iter()
            .position(|entry| entry.main_sector == main_sector)?;
        let removed = self.buckets[idx].swap_remove(pos);
        self.entries -= 1;
        self.maybe_shrink();
        Some(removed)
    }

    /// Update the flags of an existing entry in place. Returns false if no
    /// entry exists for the sector.
    pub fn set_flags(&mut self, main_sector: u64, new_flags: u8) -> bool {
        let idx = self.bucket_of(main_sector);
        match self.buckets[idx]
            .iter_mut()
            .find(|entry| entry.main_sector == main_sector)
        {
            Some(entry) => {
                entry.flags = new_flags;
                true
            }
            None => false,
        }
    }

    /// A consistent point-in-time copy of all entries, sorted by main
    /// sector. Taken under the read lock; writers proceed against the live
    /// table afterwards.
    pub fn iter_snapshot(&self) -> Vec<RemapEntry> {
        let mut snapshot: Vec<RemapEntry> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.iter().copied())
            .collect();
        snapshot.sort_unstable_by_key(|entry| entry.main_sector);
        snapshot
    }

    // load > 1.5 means entries > buckets * 3 / 2
    fn maybe_grow(&mut self) {
        if self.entries * 2 > self.buckets.len() * 3 {
            self.resize(self.buckets.len() * 2);
        }
    }

    // load < 0.5 means entries * 2 < buckets, floored at the initial count
    fn maybe_shrink(&mut self) {
        if self.buckets.len() > INITIAL_BUCKETS && self.entries * 2 < self.buckets.len() {
            self.resize((self.buckets.len() / 2).max(INITIAL_BUCKETS));
        }
    }

    fn resize(&mut self, new_buckets: usize) {
        debug_assert!(new_buckets.is_power_of_two());
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); new_buckets]);
        for bucket in old {
            for entry in bucket {
                let idx = self.bucket_of(entry.main_sector);
                self.buckets[idx].push(entry);
            }
        }
    }
}

impl Default for RemapTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_inserted_mapping() {
        let mut table = RemapTable::new();
        table.insert(RemapEntry::new(1000, 64)).unwrap();
        assert_eq!(Some(64), table.lookup(1000));
        assert_eq!(None, table.lookup(1001));
    }

    #[test]
    fn duplicate_insert_is_rejected_without_mutation() {
        let mut table = RemapTable::new();
        table.insert(RemapEntry::new(5000, 8)).unwrap();
        match table.insert(RemapEntry::new(5000, 16)) {
            Err(RemapError::Duplicate(sector)) => assert_eq!(5000, sector),
            other => panic!("expected duplicate error, got {other:?}"),
        }
        // the original mapping survives
        assert_eq!(Some(8), table.lookup(5000));
        assert_eq!(1, table.len());
    }

    #[test]
    fn remove_returns_the_entry() {
        let mut table = RemapTable::new();
        table.insert(RemapEntry::new(42, 128)).unwrap();
        let removed = table.remove(42).expect("entry present");
        assert_eq!(128, removed.spare_sector);
        assert_eq!(None, table.lookup(42));
        assert_eq!(None, table.remove(42));
    }

    #[test]
    fn snapshot_is_sorted_and_complete() {
        let mut table = RemapTable::new();
        for sector in [900u64, 100, 500] {
            table.insert(RemapEntry::new(sector, sector / 10)).unwrap();
        }
        let snapshot = table.iter_snapshot();
        let mains: Vec<u64> = snapshot.iter().map(|e| e.main_sector).collect();
        assert_eq!(vec![100, 500, 900], mains);
    }

    #[test]
    fn set_flags_updates_live_entry() {
        let mut table = RemapTable::new();
        table.insert(RemapEntry::new(7, 8)).unwrap();
        assert!(table.set_flags(7, flags::VALID | flags::PENDING_WRITEAHEAD));
        assert_eq!(
            flags::VALID | flags::PENDING_WRITEAHEAD,
            table.get(7).unwrap().flags
        );
        assert!(!table.set_flags(8, flags::VALID));
    }

    fn assert_load_bounds(table: &RemapTable) {
        let buckets = table.bucket_count();
        assert!(buckets >= INITIAL_BUCKETS, "bucket floor violated: {buckets}");
        assert!(buckets.is_power_of_two());
        if buckets > INITIAL_BUCKETS {
            // shrink threshold: load never below 0.5 once grown
            assert!(
                table.len() * 2 >= buckets,
                "load below 0.5: {} entries / {} buckets",
                table.len(),
                buckets
            );
        }
        // grow threshold: load never above 1.5
        assert!(
            table.len() * 2 <= buckets * 3,
            "load above 1.5: {} entries / {} buckets",
            table.len(),
            buckets
        );
    }

    #[test]
    fn load_factor_stays_bounded_through_growth_and_shrink() {
        let mut table = RemapTable::new();
        for sector in 0..10_000u64 {
            table.insert(RemapEntry::new(sector * 8, sector)).unwrap();
            assert_load_bounds(&table);
        }
        assert!(table.bucket_count() >= 4096);
        for sector in 0..9_900u64 {
            table.remove(sector * 8).expect("entry present");
            assert_load_bounds(&table);
        }
        assert_eq!(100, table.len());
        // all mappings still reachable after resizes
        for sector in 9_900..10_000u64 {
            assert_eq!(Some(sector), table.lookup(sector * 8));
        }
    }

    #[test]
    fn bucket_count_never_drops_below_initial() {
        let mut table = RemapTable::new();
        for sector in 0..200u64 {
            table.insert(RemapEntry::new(sector, sector)).unwrap();
        }
        for sector in 0..200u64 {
            table.remove(sector);
        }
        assert_eq!(INITIAL_BUCKETS, table.bucket_count());
        assert!(table.is_empty());
    }
}

//! Shared helpers for the end-to-end scenarios.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};

use sparemap::{BlockDevice, SECTOR_SIZE};

/// Wraps a device and injects I/O errors on chosen sectors. Reads and
/// writes touching a failing sector error out; everything else passes
/// through.
pub struct FlakyDevice {
    inner: Arc<dyn BlockDevice>,
    failing: Mutex<HashSet<u64>>,
}

impl FlakyDevice {
    pub fn new(inner: Arc<dyn BlockDevice>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_sector(&self, sector: u64) {
        self.failing.lock().unwrap().insert(sector);
    }

    pub fn heal_sector(&self, sector: u64) {
        self.failing.lock().unwrap().remove(&sector);
    }

    fn check(&self, sector: u64, bytes: usize) -> io::Result<()> {
        let failing = self.failing.lock().unwrap();
        let sectors = (bytes / SECTOR_SIZE) as u64;
        for candidate in sector..sector + sectors {
            if failing.contains(&candidate) {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("injected media error at sector {candidate}"),
                ));
            }
        }
        Ok(())
    }
}

impl BlockDevice for FlakyDevice {
    fn size_sectors(&self) -> u64 {
        self.inner.size_sectors()
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> io::Result<()> {
        self.check(sector, buf.len())?;
        self.inner.read_sectors(sector, buf)
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> io::Result<()> {
        self.check(sector, buf.len())?;
        self.inner.write_sectors(sector, buf)
    }

    fn path(&self) -> &str {
        self.inner.path()
    }
}

/// A sector-sized payload with a recognizable fill byte.
pub fn sector_of(byte: u8) -> Vec<u8> {
    vec![byte; SECTOR_SIZE]
}

/// Pull the `spare=<N>` value out of an admin `remap` reply.
pub fn spare_from_reply(reply: &str) -> u64 {
    reply
        .split_whitespace()
        .find_map(|token| token.strip_prefix("spare="))
        .expect("reply carries a spare sector")
        .parse()
        .expect("spare sector is numeric")
}

/// Pull a `key=value` token out of a status line.
pub fn status_value<'a>(line: &'a str, key: &str) -> &'a str {
    let prefix = format!("{key}=");
    line.split_whitespace()
        .find_map(|token| token.strip_prefix(prefix.as_str()))
        .unwrap_or_else(|| panic!("status line missing {key}: {line}"))
}

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::{check_range, BlockDevice, SECTOR_SIZE};

/// A block device backed by a regular file or a raw device node.
/// Positioned reads and writes keep the handle free of seek state, so one
/// handle serves every thread.
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    path: String,
    size_sectors: u64,
}

impl FileDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.as_ref().display().to_string(),
            size_sectors: len / SECTOR_SIZE as u64,
        })
    }
}

impl BlockDevice for FileDevice {
    fn size_sectors(&self) -> u64 {
        self.size_sectors
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self, sector, buf.len())?;
        self.file.read_exact_at(buf, sector * SECTOR_SIZE as u64)
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> io::Result<()> {
        check_range(self, sector, buf.len())?;
        self.file.write_all_at(buf, sector * SECTOR_SIZE as u64)
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn positioned_io_round_trips() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file_mut().set_len(64 * SECTOR_SIZE as u64).unwrap();
        tmp.flush().unwrap();

        let dev = FileDevice::open(tmp.path()).unwrap();
        assert_eq!(64, dev.size_sectors());

        let payload = vec![0x5Au8; SECTOR_SIZE * 2];
        dev.write_sectors(10, &payload).unwrap();

        let mut readback = vec![0u8; SECTOR_SIZE * 2];
        dev.read_sectors(10, &mut readback).unwrap();
        assert_eq!(payload, readback);
    }

    #[test]
    fn out_of_range_io_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file().set_len(8 * SECTOR_SIZE as u64).unwrap();
        let dev = FileDevice::open(tmp.path()).unwrap();

        let mut buf = vec![0u8; SECTOR_SIZE];
        assert!(dev.read_sectors(8, &mut buf).is_err());
        assert!(dev.write_sectors(7, &vec![0u8; SECTOR_SIZE * 2]).is_err());
        assert!(dev.read_sectors(0, &mut vec![0u8; 100]).is_err());
    }
}

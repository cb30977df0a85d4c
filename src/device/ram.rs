use std::io;
use std::sync::RwLock;

use super::{check_range, BlockDevice, SECTOR_SIZE};

/// In-memory block device. The simulation and test counterpart of
/// `FileDevice`; sectors read as zero until written.
pub struct RamDevice {
    data: RwLock<Vec<u8>>,
    path: String,
    size_sectors: u64,
}

impl RamDevice {
    pub fn new(name: &str, size_sectors: u64) -> Self {
        Self {
            data: RwLock::new(vec![0u8; size_sectors as usize * SECTOR_SIZE]),
            path: format!("ram:{name}"),
            size_sectors,
        }
    }
}

impl BlockDevice for RamDevice {
    fn size_sectors(&self) -> u64 {
        self.size_sectors
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> io::Result<()> {
        check_range(self, sector, buf.len())?;
        let data = self.data.read().expect("ram device lock poisoned");
        let offset = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> io::Result<()> {
        check_range(self, sector, buf.len())?;
        let mut data = self.data.write().expect("ram device lock poisoned");
        let offset = sector as usize * SECTOR_SIZE;
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn path(&self) -> &str {
        &self.path
    }
}

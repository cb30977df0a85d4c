//! sparemap: a transparent sector-remapping layer between a consumer and a
//! failing "main" block device, redirecting bad sector ranges to a spare
//! device. Multi-copy, CRC-protected metadata on the spare lets the
//! mapping survive reboots and reassembly on another host.

pub mod admin;
pub mod alloc;
pub mod counters;
pub mod device;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod meta;
pub mod reserve;
pub mod table;
pub mod target;
pub mod ui;

pub use counters::CountersSnapshot;
pub use device::{BlockDevice, DeviceFingerprint, FileDevice, RamDevice, SECTOR_SIZE};
pub use engine::{Bio, BioOp, BioResult, BioStatus};
pub use error::{RemapError, Result};
pub use table::{RemapEntry, RemapTable};
pub use target::{Target, TargetConfig};

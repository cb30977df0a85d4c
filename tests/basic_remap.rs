//! Scenario: administratively remap one sector of a file-backed target and
//! verify the redirection end to end, including that neighbors still pass
//! through to the main device.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{sector_of, spare_from_reply, status_value};
use sparemap::{BlockDevice, FileDevice, Target, TargetConfig, SECTOR_SIZE};
use tempfile::NamedTempFile;

const GIB: u64 = 1 << 30;
const MIB: u64 = 1 << 20;

fn backing_file(bytes: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.as_file_mut().set_len(bytes).expect("set_len");
    file.flush().unwrap();
    file
}

#[test]
fn admin_remap_redirects_one_sector() {
    let main_file = backing_file(GIB);
    let spare_file = backing_file(16 * MIB);

    let main = Arc::new(FileDevice::open(main_file.path()).unwrap());
    let spare = Arc::new(FileDevice::open(spare_file.path()).unwrap());
    let target = Target::create(main, spare, TargetConfig::default()).unwrap();

    let reply = target.message("remap 1000").unwrap();
    let spare_sector = spare_from_reply(&reply);

    // writes to the remapped sector land on the spare
    let remapped = sector_of(0xAA);
    target.write_at(1000, remapped.clone()).unwrap();
    assert_eq!(remapped, target.read_at(1000, 1).unwrap());

    let raw_spare = FileDevice::open(spare_file.path()).unwrap();
    let mut on_spare = vec![0u8; SECTOR_SIZE];
    raw_spare
        .read_sectors(spare_sector, &mut on_spare)
        .unwrap();
    assert_eq!(remapped, on_spare);

    // the neighbor still passes through to main
    let passthrough = sector_of(0x5B);
    target.write_at(1001, passthrough.clone()).unwrap();
    assert_eq!(passthrough, target.read_at(1001, 1).unwrap());

    let raw_main = FileDevice::open(main_file.path()).unwrap();
    let mut on_main = vec![0u8; SECTOR_SIZE];
    raw_main.read_sectors(1001, &mut on_main).unwrap();
    assert_eq!(passthrough, on_main);

    // and the remapped sector's payload never reached main
    raw_main.read_sectors(1000, &mut on_main).unwrap();
    assert_ne!(remapped, on_main);

    let status = target.message("status").unwrap();
    assert_eq!("1", status_value(&status, "remaps"));
    assert_eq!("ok", status_value(&status, "health"));

    target.detach().unwrap();
}

#[test]
fn remap_of_existing_entry_is_a_duplicate_error() {
    let main_file = backing_file(64 * MIB);
    let spare_file = backing_file(16 * MIB);
    let main = Arc::new(FileDevice::open(main_file.path()).unwrap());
    let spare = Arc::new(FileDevice::open(spare_file.path()).unwrap());
    let target = Target::create(main, spare, TargetConfig::default()).unwrap();

    target.message("remap 42").unwrap();
    assert!(matches!(
        target.message("remap 42"),
        Err(sparemap::RemapError::Duplicate(42))
    ));

    // unmap releases it for another round
    target.message("unmap 42").unwrap();
    assert!(matches!(
        target.message("unmap 42"),
        Err(sparemap::RemapError::InvalidArgument(_))
    ));
    target.message("remap 42").unwrap();
    target.detach().unwrap();
}

#[test]
fn admin_remap_preserves_existing_data() {
    let main_file = backing_file(64 * MIB);
    let spare_file = backing_file(16 * MIB);
    let main = Arc::new(FileDevice::open(main_file.path()).unwrap());
    let spare = Arc::new(FileDevice::open(spare_file.path()).unwrap());

    // data written before the remap exists
    let precious = sector_of(0xC7);
    main.write_sectors(7777, &precious).unwrap();

    let target = Target::create(main, spare, TargetConfig::default()).unwrap();
    target.message("remap 7777").unwrap();
    // the salvage copy moved the bytes to the spare location
    assert_eq!(precious, target.read_at(7777, 1).unwrap());
    target.detach().unwrap();
}

#[test]
fn multi_sector_bios_span_the_remap_boundary() {
    let main_file = backing_file(64 * MIB);
    let spare_file = backing_file(16 * MIB);
    let main = Arc::new(FileDevice::open(main_file.path()).unwrap());
    let spare = Arc::new(FileDevice::open(spare_file.path()).unwrap());
    let target = Target::create(main, spare, TargetConfig::default()).unwrap();

    target.message("remap 2002").unwrap();

    // one 4-sector write covering passthrough and remapped sectors
    let mut payload = Vec::new();
    for byte in [1u8, 2, 3, 4] {
        payload.extend_from_slice(&sector_of(byte));
    }
    target.write_at(2000, payload.clone()).unwrap();
    assert_eq!(payload, target.read_at(2000, 4).unwrap());

    // sector 2002's bytes are absent from main
    let raw_main = FileDevice::open(main_file.path()).unwrap();
    let mut on_main = vec![0u8; SECTOR_SIZE];
    raw_main.read_sectors(2002, &mut on_main).unwrap();
    assert_ne!(sector_of(3), on_main);
    target.detach().unwrap();
}

//! Spare exhaustion. The spare is sized so that, after the metadata
//! reservations, exactly three allocation units remain free: three
//! administrative remaps succeed and the fourth reports NoCapacity.

mod common;

use std::sync::Arc;

use common::status_value;
use sparemap::{RamDevice, RemapError, Target, TargetConfig};

#[test]
fn fourth_remap_hits_no_capacity() {
    // 14336 sectors with a 2048-sector unit: geometric copies at
    // 0/1024/2048/4096/8192 pin down units 0, 1, 2 and 4, leaving units
    // 3, 5 and 6 free.
    let main = Arc::new(RamDevice::new("cap-main", 65_536));
    let spare = Arc::new(RamDevice::new("cap-spare", 14_336));
    let config = TargetConfig {
        allocation_unit: 2048,
        ..TargetConfig::default()
    };
    let target = Target::create(main, spare, config).unwrap();

    let status = target.message("status").unwrap();
    assert_eq!("6144", status_value(&status, "spare_free"));

    for sector in [10u64, 20, 30] {
        let reply = target
            .message(&format!("remap {sector}"))
            .unwrap_or_else(|err| panic!("remap {sector} failed: {err}"));
        assert!(reply.starts_with(&format!("remapped main={sector}")));
    }

    assert!(matches!(
        target.message("remap 40"),
        Err(RemapError::NoCapacity)
    ));

    let status = target.message("status").unwrap();
    assert_eq!("3", status_value(&status, "remaps"));
    assert_eq!("0", status_value(&status, "spare_free"));
    assert_eq!("critical", status_value(&status, "health"));

    // freeing one unit makes the next remap possible again
    target.message("unmap 20").unwrap();
    target.message("remap 40").unwrap();
    target.detach().unwrap();
}

#[test]
fn allocations_never_land_in_reserved_extents() {
    let main = Arc::new(RamDevice::new("resv-main", 65_536));
    let spare = Arc::new(RamDevice::new("resv-spare", 32_768));
    let target = Target::create(main, spare, TargetConfig::default()).unwrap();

    // geometric copies live at these sectors; every grant must avoid them
    let reserved = [0u64, 1024, 2048, 4096, 8192];
    for i in 0..32u64 {
        let reply = target.message(&format!("remap {}", 100 + i)).unwrap();
        let spare_sector = common::spare_from_reply(&reply);
        for &copy in &reserved {
            assert!(
                spare_sector + 8 <= copy || spare_sector >= copy + 8,
                "grant {spare_sector} collides with copy at {copy}"
            );
        }
    }
    target.detach().unwrap();
}

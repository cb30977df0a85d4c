//! The text-message command surface end to end: status line shape, stats
//! JSON, list limits, and error reporting through `Target::message`.

mod common;

use std::sync::Arc;

use common::{status_value, FlakyDevice};
use sparemap::{RamDevice, RemapError, Target, TargetConfig};

fn make_target() -> Target {
    let main = Arc::new(RamDevice::new("adm-main", 65_536));
    let spare = Arc::new(RamDevice::new("adm-spare", 32_768));
    Target::create(main, spare, TargetConfig::default()).unwrap()
}

#[test]
fn status_keys_appear_in_stable_order() {
    let target = make_target();
    let status = target.message("status").unwrap();
    let keys: Vec<&str> = status
        .split_whitespace()
        .map(|token| token.split('=').next().unwrap())
        .collect();
    assert_eq!(
        vec!["remaps", "errors", "auto_remaps", "health", "spare_free"],
        keys
    );
    assert_eq!("0", status_value(&status, "remaps"));
    assert_eq!("W0:R0", status_value(&status, "errors"));
    target.detach().unwrap();
}

#[test]
fn health_degrades_after_io_errors() {
    let flaky = Arc::new(FlakyDevice::new(Arc::new(RamDevice::new(
        "deg-main", 65_536,
    ))));
    let spare = Arc::new(RamDevice::new("deg-spare", 32_768));
    flaky.fail_sector(777);
    let config = TargetConfig {
        auto_remap: false,
        ..TargetConfig::default()
    };
    let target = Target::create(flaky, spare, config).unwrap();

    assert_eq!(
        "ok",
        status_value(&target.message("status").unwrap(), "health")
    );
    let _ = target.read_at(777, 1);
    assert_eq!(
        "degraded",
        status_value(&target.message("status").unwrap(), "health")
    );
    target.detach().unwrap();
}

#[test]
fn stats_reply_is_parseable_json() {
    let target = make_target();
    target.message("remap 100").unwrap();
    target.write_at(100, vec![1u8; 512]).unwrap();

    let stats = target.message("stats").unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stats).unwrap();
    assert_eq!(1, parsed["total_bios"].as_u64().unwrap());
    assert_eq!(1, parsed["write_bios"].as_u64().unwrap());
    assert_eq!(0, parsed["inflight_bios"].as_u64().unwrap());
    assert!(parsed["copies_written"].as_u64().unwrap() >= 5);
    target.detach().unwrap();
}

#[test]
fn list_respects_the_limit() {
    let target = make_target();
    for sector in [30u64, 10, 20] {
        target.message(&format!("remap {sector}")).unwrap();
    }

    let full = target.message("list").unwrap();
    let mains: Vec<&str> = full
        .lines()
        .map(|line| line.split_whitespace().next().unwrap())
        .collect();
    // sorted by main sector regardless of insertion order
    assert_eq!(vec!["main=10", "main=20", "main=30"], mains);

    let limited = target.message("list 2").unwrap();
    assert_eq!(2, limited.lines().count());
    assert!(limited.starts_with("main=10"));
    target.detach().unwrap();
}

#[test]
fn sync_reports_a_fresh_sequence_each_time() {
    let target = make_target();
    let first = target.message("sync").unwrap();
    let second = target.message("sync").unwrap();
    let seq = |reply: &str| -> u64 {
        reply
            .strip_prefix("synced seq=")
            .expect("sync reply shape")
            .parse()
            .unwrap()
    };
    assert!(seq(&second) > seq(&first));
    target.detach().unwrap();
}

#[test]
fn errors_surface_verbatim_through_the_message_channel() {
    let target = make_target();
    assert!(matches!(
        target.message("bogus"),
        Err(RemapError::InvalidRequest(_))
    ));
    assert!(matches!(
        target.message("remap notanumber"),
        Err(RemapError::InvalidArgument(_))
    ));
    // out-of-range sector on a recognized command
    assert!(matches!(
        target.message("remap 99999999"),
        Err(RemapError::InvalidArgument(_))
    ));
    target.detach().unwrap();
}

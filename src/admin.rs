//! Administrative message surface: single-line, whitespace-tokenized
//! commands against a live target. Every error comes back verbatim to the
//! caller; the binary maps it to a non-zero exit.

use std::sync::atomic::Ordering;

use log::info;

use crate::error::{RemapError, Result};
use crate::table::{flags, RemapEntry};
use crate::target::TargetInner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Stats,
    Remap(u64),
    Unmap(u64),
    List(Option<usize>),
    Sync,
    AutoRemap(bool),
}

/// Parse one message line. Unknown commands are `InvalidRequest`;
/// recognized commands with bad arguments are `InvalidArgument`.
pub fn parse(line: &str) -> Result<Command> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (&command, args) = tokens
        .split_first()
        .ok_or_else(|| RemapError::InvalidRequest("empty message".to_string()))?;
    match command {
        "status" => expect_no_args(args).map(|_| Command::Status),
        "stats" => expect_no_args(args).map(|_| Command::Stats),
        "sync" => expect_no_args(args).map(|_| Command::Sync),
        "remap" => parse_sector(command, args).map(Command::Remap),
        "unmap" => parse_sector(command, args).map(Command::Unmap),
        "list" => match args {
            [] => Ok(Command::List(None)),
            [limit] => limit
                .parse::<usize>()
                .map(|limit| Command::List(Some(limit)))
                .map_err(|_| RemapError::InvalidArgument(format!("bad limit '{limit}'"))),
            _ => Err(RemapError::InvalidArgument(
                "list takes at most one argument".to_string(),
            )),
        },
        "auto_remap" => match args {
            ["on"] => Ok(Command::AutoRemap(true)),
            ["off"] => Ok(Command::AutoRemap(false)),
            _ => Err(RemapError::InvalidArgument(
                "auto_remap takes 'on' or 'off'".to_string(),
            )),
        },
        other => Err(RemapError::InvalidRequest(format!(
            "unknown command '{other}'"
        ))),
    }
}

fn expect_no_args(args: &[&str]) -> Result<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(RemapError::InvalidArgument(
            "unexpected trailing arguments".to_string(),
        ))
    }
}

fn parse_sector(command: &str, args: &[&str]) -> Result<u64> {
    match args {
        [sector] => sector
            .parse::<u64>()
            .map_err(|_| RemapError::InvalidArgument(format!("bad sector '{sector}'"))),
        _ => Err(RemapError::InvalidArgument(format!(
            "{command} takes exactly one sector argument"
        ))),
    }
}

pub(crate) fn dispatch(inner: &TargetInner, line: &str) -> Result<String> {
    match parse(line)? {
        Command::Status => Ok(status_line(inner)),
        Command::Stats => serde_json::to_string(&inner.counters.snapshot())
            .map_err(|err| RemapError::InvalidRequest(err.to_string())),
        Command::Remap(sector) => admin_remap(inner, sector),
        Command::Unmap(sector) => admin_unmap(inner, sector),
        Command::List(limit) => Ok(list_entries(inner, limit)),
        Command::Sync => {
            let sequence = inner.persist_current()?;
            Ok(format!("synced seq={sequence}"))
        }
        Command::AutoRemap(enabled) => {
            inner.auto_remap.store(enabled, Ordering::Relaxed);
            Ok(format!(
                "auto_remap={}",
                if enabled { "on" } else { "off" }
            ))
        }
    }
}

/// Stable space-separated `key=value` tokens; consumers parse by key and
/// tolerate additional keys at the end.
fn status_line(inner: &TargetInner) -> String {
    let snapshot = inner.counters.snapshot();
    let remaps = inner
        .table
        .read()
        .expect("remap table lock poisoned")
        .len();
    let spare_free = inner
        .allocator
        .lock()
        .expect("allocator lock poisoned")
        .free_sectors(&inner.reservations);
    let health = if snapshot.alloc_failures > 0 {
        "critical"
    } else if snapshot.read_errors + snapshot.write_errors > 0 {
        "degraded"
    } else {
        "ok"
    };
    format!(
        "remaps={} errors=W{}:R{} auto_remaps={} health={} spare_free={}",
        remaps, snapshot.write_errors, snapshot.read_errors, snapshot.auto_remaps, health, spare_free
    )
}

fn list_entries(inner: &TargetInner, limit: Option<usize>) -> String {
    let snapshot = inner
        .table
        .read()
        .expect("remap table lock poisoned")
        .iter_snapshot();
    let shown = limit.unwrap_or(snapshot.len());
    snapshot
        .iter()
        .take(shown)
        .map(|entry| format!("main={} spare={}", entry.main_sector, entry.spare_sector))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Administrative relocation of one sector. Unlike auto-remap this copies
/// the current main-device contents onto the allocated spare unit, so a
/// healthy sector can be moved off a suspect region without data loss.
fn admin_remap(inner: &TargetInner, sector: u64) -> Result<String> {
    if sector >= inner.main.size_sectors() {
        return Err(RemapError::InvalidArgument(format!(
            "sector {sector} outside main device of {} sectors",
            inner.main.size_sectors()
        )));
    }

    // best-effort salvage; an unreadable sector is exactly why the
    // administrator may be remapping it
    let mut payload = vec![0u8; crate::device::SECTOR_SIZE];
    let salvaged = inner.main.read_sectors(sector, &mut payload).is_ok();

    let spare_sector = {
        let mut allocator = inner.allocator.lock().expect("allocator lock poisoned");
        {
            let table = inner.table.read().expect("remap table lock poisoned");
            if table.lookup(sector).is_some() {
                return Err(RemapError::Duplicate(sector));
            }
        }
        allocator.allocate(&inner.reservations).map_err(|err| {
            inner.counters.record_alloc_failure();
            err
        })?
    };

    if salvaged {
        if let Err(err) = inner.spare.write_sectors(spare_sector, &payload) {
            inner
                .allocator
                .lock()
                .expect("allocator lock poisoned")
                .release(spare_sector);
            return Err(RemapError::Device(err));
        }
    } else {
        info!("sector {sector} unreadable on main; remapping without salvage");
    }

    {
        let mut table = inner.table.write().expect("remap table lock poisoned");
        let entry = RemapEntry {
            main_sector: sector,
            spare_sector,
            flags: flags::VALID | flags::PENDING_WRITEAHEAD,
        };
        if let Err(err) = table.insert(entry) {
            // lost the race to an auto-remap of the same sector
            drop(table);
            inner
                .allocator
                .lock()
                .expect("allocator lock poisoned")
                .release(spare_sector);
            return Err(err);
        }
    }
    inner.dirty.store(true, Ordering::Release);
    inner.persist_current()?;
    inner
        .table
        .write()
        .expect("remap table lock poisoned")
        .set_flags(sector, flags::VALID);
    info!("administrative remap: main {sector} -> spare {spare_sector}");
    Ok(format!("remapped main={sector} spare={spare_sector}"))
}

fn admin_unmap(inner: &TargetInner, sector: u64) -> Result<String> {
    let removed = {
        let mut allocator = inner.allocator.lock().expect("allocator lock poisoned");
        let mut table = inner.table.write().expect("remap table lock poisoned");
        match table.remove(sector) {
            Some(entry) => {
                allocator.release(entry.spare_sector);
                entry
            }
            None => {
                return Err(RemapError::InvalidArgument(format!(
                    "no remap entry for sector {sector}"
                )))
            }
        }
    };
    inner.dirty.store(true, Ordering::Release);
    inner.persist_current()?;
    info!(
        "administrative unmap: main {sector} (was spare {})",
        removed.spare_sector
    );
    Ok(format!("unmapped main={sector}"))
}

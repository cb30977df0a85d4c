use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use crate::device::FileDevice;
use crate::target::{Target, TargetConfig};

#[derive(Parser)]
#[command(version, about)]
pub struct SparemapArgs {
    #[arg(help = "Path to the main block device")]
    pub main_path: PathBuf,
    #[arg(help = "Path to the spare block device")]
    pub spare_path: PathBuf,
    #[arg(long, help = "Allocation unit in sectors")]
    pub allocation_unit: Option<u64>,
    #[arg(long, help = "Disable automatic remap of failed main sectors")]
    pub no_auto_remap: bool,
    #[arg(long, help = "Attach even when device fingerprints score below the threshold")]
    pub force_attach: bool,
}

/// Attach a target from the CLI arguments. The two device paths are the
/// whole core configuration; the optional flags override the defaults.
pub fn make_target(args: &SparemapArgs) -> anyhow::Result<Target> {
    let mut config = TargetConfig::default();
    if let Some(unit) = args.allocation_unit {
        config.allocation_unit = unit;
    }
    config.auto_remap = !args.no_auto_remap;
    config.force_attach = args.force_attach;

    let main = Arc::new(FileDevice::open(&args.main_path)?);
    let spare = Arc::new(FileDevice::open(&args.spare_path)?);
    let target = Target::create(main, spare, config)?;
    Ok(target)
}

//! Copy placement planning. Given the spare size, pick how many metadata
//! copies to keep and where, then reserve those extents before the
//! allocator is armed. With N copies the newest state survives any N-1
//! CRC losses; the geometric spread keeps a locally correlated media
//! defect from taking out every copy at once.

use log::debug;

use crate::error::{RemapError, Result};
use crate::reserve::ReservationMap;

use super::COPY_SECTORS;

/// Below this spare size there is no room for both metadata and any
/// remapped data; attach is refused.
pub const MIN_SPARE_SECTORS: u64 = 72;
/// Sectors the minimal strategy keeps clear for actual remap use.
const WORKING_FLOOR_SECTORS: u64 = 64;

const LINEAR_MIN_SECTORS: u64 = 1024;
const GEOMETRIC_MIN_SECTORS: u64 = 8192;
const GEOMETRIC_LOCATIONS: [u64; 5] = [0, 1024, 2048, 4096, 8192];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategy {
    Minimal,
    Linear,
    Geometric,
}

impl PlacementStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            PlacementStrategy::Minimal => "minimal",
            PlacementStrategy::Linear => "linear",
            PlacementStrategy::Geometric => "geometric",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataPlacement {
    pub strategy: PlacementStrategy,
    /// First sector of each copy, ascending.
    pub locations: Vec<u64>,
}

impl MetadataPlacement {
    pub fn plan(spare_sectors: u64) -> Result<Self> {
        if spare_sectors < MIN_SPARE_SECTORS {
            return Err(RemapError::Configuration(format!(
                "spare of {} sectors is below the {}-sector minimum",
                spare_sectors, MIN_SPARE_SECTORS
            )));
        }

        let placement = if spare_sectors < LINEAR_MIN_SECTORS {
            let copies = ((spare_sectors - WORKING_FLOOR_SECTORS) / COPY_SECTORS).min(2);
            MetadataPlacement {
                strategy: PlacementStrategy::Minimal,
                locations: (0..copies).map(|i| i * COPY_SECTORS).collect(),
            }
        } else if spare_sectors < GEOMETRIC_MIN_SECTORS {
            let copies = match spare_sectors {
                s if s < 2048 => 2,
                s if s < 4096 => 3,
                _ => 4,
            };
            let spacing = spare_sectors / copies;
            MetadataPlacement {
                strategy: PlacementStrategy::Linear,
                locations: (0..copies)
                    .map(|i| i * spacing - (i * spacing) % COPY_SECTORS)
                    .collect(),
            }
        } else {
            MetadataPlacement {
                strategy: PlacementStrategy::Geometric,
                locations: GEOMETRIC_LOCATIONS
                    .iter()
                    .copied()
                    .filter(|loc| loc + COPY_SECTORS <= spare_sectors)
                    .collect(),
            }
        };

        debug!(
            "planned {} metadata copies ({}) for {}-sector spare",
            placement.locations.len(),
            placement.strategy.name(),
            spare_sectors
        );
        Ok(placement)
    }

    pub fn copies(&self) -> usize {
        self.locations.len()
    }

    /// Reserve every copy extent, padded out to allocation-unit boundaries
    /// so a grant can never straddle a copy. Extents whose padding makes
    /// them touch are merged before reserving.
    pub fn register(&self, reservations: &mut ReservationMap, allocation_unit: u64) -> Result<()> {
        let mut padded: Vec<(u64, u64)> = self
            .locations
            .iter()
            .map(|&loc| {
                let start = align_down(loc, allocation_unit);
                let end = align_up(loc + COPY_SECTORS, allocation_unit);
                (start, end)
            })
            .collect();
        padded.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(padded.len());
        for (start, end) in padded {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        for (start, end) in merged {
            reservations.reserve(start, end - start)?;
        }
        Ok(())
    }
}

fn align_down(sector: u64, unit: u64) -> u64 {
    sector - sector % unit
}

fn align_up(sector: u64, unit: u64) -> u64 {
    sector.div_ceil(unit) * unit
}

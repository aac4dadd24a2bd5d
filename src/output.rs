use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use itertools::{Itertools, MinMaxResult};
use serde::Serialize;

use crate::partition::BinGeometry;
use crate::store::CellStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupancy_ignores_empty_cells() {
        let stats = Occupancy::from_counts([0, 4, 0, 2, 9].into_iter());
        assert_eq!(stats.occupied_cells, 3);
        assert_eq!(stats.min, 2);
        assert_eq!(stats.max, 9);
        assert!((stats.mean - 5.0).abs() < 1e-12);
    }

    #[test]
    fn occupancy_of_empty_store() {
        let stats = Occupancy::from_counts(std::iter::empty());
        assert_eq!(stats, Occupancy::default());
    }

    #[test]
    fn summary_serializes_to_json() {
        let summary = RebuildSummary {
            step: Some(20),
            entities: 5,
            local: 3,
            atoms: 4,
            elements: 1,
            quadrature_points: 27,
            cells: 64,
            members: 31,
            occupancy: Occupancy::from_counts([1, 30].into_iter()),
            high_water_mark: 0,
            repartitioned: true,
            nbin: [2, 2, 2],
            mbin: [4, 4, 4],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["quadrature_points"], 27);
        assert_eq!(json["occupancy"]["max"], 30);
        assert_eq!(json["mbin"][1], 4);
    }
}

/// Member counts over the non-empty cells of a store.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Occupancy {
    pub occupied_cells: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

impl Occupancy {
    pub fn from_counts(counts: impl Iterator<Item = usize>) -> Self {
        let occupied: Vec<usize> = counts.filter(|&c| c > 0).collect();
        let (min, max) = match occupied.iter().copied().minmax() {
            MinMaxResult::NoElements => return Self::default(),
            MinMaxResult::OneElement(c) => (c, c),
            MinMaxResult::MinMax(min, max) => (min, max),
        };
        let total: usize = occupied.iter().sum();
        Self {
            occupied_cells: occupied.len(),
            min,
            max,
            mean: total as f64 / occupied.len() as f64,
        }
    }

    pub fn of_store(store: &CellStore) -> Self {
        Self::from_counts(store.occupancy())
    }
}

/// What one rebuild produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildSummary {
    /// Step the rebuild ran at, when driven by a step counter.
    pub step: Option<u64>,
    pub entities: usize,
    pub local: usize,
    pub atoms: usize,
    pub elements: usize,
    pub quadrature_points: usize,
    pub cells: usize,
    /// Sum of all member list lengths, counting every element once per cell.
    pub members: usize,
    pub occupancy: Occupancy,
    pub high_water_mark: usize,
    pub repartitioned: bool,
    pub nbin: [i32; 3],
    pub mbin: [i32; 3],
}

impl RebuildSummary {
    pub(crate) fn new(
        step: Option<u64>,
        counts: EntityCounts,
        quadrature_points: usize,
        geometry: &BinGeometry,
        store: &CellStore,
        repartitioned: bool,
    ) -> Self {
        Self {
            step,
            entities: counts.entities,
            local: counts.local,
            atoms: counts.atoms,
            elements: counts.elements,
            quadrature_points,
            cells: store.len(),
            members: store.total_members(),
            occupancy: Occupancy::of_store(store),
            high_water_mark: store.high_water_mark(),
            repartitioned,
            nbin: geometry.nbin,
            mbin: geometry.mbin,
        }
    }
}

/// Entity tallies gathered while inserting.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EntityCounts {
    pub entities: usize,
    pub local: usize,
    pub atoms: usize,
    pub elements: usize,
}

impl fmt::Display for RebuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(step) = self.step {
            writeln!(f, "Rebuild at step {}:", step)?;
        } else {
            writeln!(f, "Rebuild:")?;
        }
        writeln!(
            f,
            "  - Entities: {} ({} local, {} atoms, {} elements)",
            self.entities, self.local, self.atoms, self.elements
        )?;
        writeln!(f, "  - Quadrature Points: {}", self.quadrature_points)?;
        writeln!(
            f,
            "  - Cells: {} ({:?} allocated, {:?} in box)",
            self.cells, self.mbin, self.nbin
        )?;
        writeln!(
            f,
            "  - Occupancy: {} cells, min {}, mean {:.2}, max {}",
            self.occupancy.occupied_cells,
            self.occupancy.min,
            self.occupancy.mean,
            self.occupancy.max
        )?;
        write!(f, "  - Expansion High-Water Mark: {}", self.high_water_mark)
    }
}

/// Writes `summary` to `path` as pretty-printed JSON.
pub fn write_summary(path: impl AsRef<Path>, summary: &RebuildSummary) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("could not create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary).context("could not serialize summary")?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

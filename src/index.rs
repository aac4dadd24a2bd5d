//! Rebuild orchestration and the queries neighbor-list construction runs
//! against the result.
//!
//! A rebuild repartitions the grid when needed, generates quadrature points
//! for every local entity, then fills the cell store: atoms go into the one
//! cell holding them, elements into every cell their inflated bounding box
//! overlaps.
//!
//! # Key Components
//!
//! - [`CellIndex`]: owner of the grid, the cell store and the quadrature map
//! - [`QuadraturePoints`]: positions and cells of one entity's sample points

use std::time::Instant;

use log::{debug, info};
use nalgebra::Point3;
use rayon::prelude::*;

use crate::domain::Domain;
use crate::entity::{EntityArena, EntityView};
use crate::error::BinError;
use crate::output::{EntityCounts, RebuildSummary};
use crate::overlap::{element_range, point_cell, CellRange};
use crate::partition::{partition, BinGeometry};
use crate::sampler::ElementSampler;
use crate::settings::Settings;
use crate::store::{CellStore, GrowthPolicy};


/// Quadrature points of one entity and the cells holding them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraturePoints<'a> {
    pub positions: &'a [Point3<f64>],
    pub cells: &'a [usize],
}

impl QuadraturePoints<'_> {
    pub fn count(&self) -> usize {
        self.positions.len()
    }
}

/// Quadrature points of every local entity, flattened in entity order.
#[derive(Debug, Clone, Default)]
struct QuadratureMap {
    offsets: Vec<usize>,
    positions: Vec<Point3<f64>>,
    cells: Vec<usize>,
}

impl QuadratureMap {
    fn points_of(&self, id: usize) -> QuadraturePoints<'_> {
        match (self.offsets.get(id), self.offsets.get(id + 1)) {
            (Some(&start), Some(&end)) => QuadraturePoints {
                positions: &self.positions[start..end],
                cells: &self.cells[start..end],
            },
            _ => QuadraturePoints {
                positions: &[],
                cells: &[],
            },
        }
    }
}

/// Sampled points of one local entity, produced on a worker thread.
struct Sampled {
    id: usize,
    positions: Vec<Point3<f64>>,
    cells: Vec<usize>,
}

/// Spatial index of atoms and elements over a uniform cell grid.
///
/// **Context**: Neighbor-list construction needs, for any position, the
/// entities that may lie within the cutoff. Elements span many cells and
/// are also represented by quadrature points, which must be looked up by
/// position like atoms.
///
/// **How it Works**: Owns a [`BinGeometry`], a [`CellStore`] and the
/// quadrature points of the last rebuild. Every rebuild clears the store
/// and refills it from the entity arena. The grid is recomputed only when
/// the box, the search radius or the reach of the local elements changed.
#[derive(Debug, Clone)]
pub struct CellIndex {
    cutneigh: f64,
    rebuild_every: u64,
    settings: Settings,
    sampler: ElementSampler,
    geometry: Option<BinGeometry>,
    domain: Option<Domain>,
    store: CellStore,
    ranges: Vec<Option<CellRange>>,
    quadrature: QuadratureMap,
    last_build: Option<u64>,
    invalidated: bool,
}

impl CellIndex {
    pub fn new(settings: &Settings) -> Result<Self, BinError> {
        settings.validate()?;
        Ok(Self {
            cutneigh: settings.neighbor_cutoff(),
            rebuild_every: settings.rebuild_every,
            settings: settings.clone(),
            sampler: ElementSampler::from_settings(settings),
            geometry: None,
            domain: None,
            store: CellStore::new(GrowthPolicy::from_settings(settings)),
            ranges: Vec::new(),
            quadrature: QuadratureMap::default(),
            last_build: None,
            invalidated: false,
        })
    }

    pub fn geometry(&self) -> Option<&BinGeometry> {
        self.geometry.as_ref()
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    /// True when the index was never built, was invalidated, or is at least
    /// `rebuild_every` steps old at `step`.
    pub fn is_due(&self, step: u64) -> bool {
        match self.last_build {
            None => true,
            Some(_) if self.invalidated => true,
            Some(last) => step.saturating_sub(last) >= self.rebuild_every,
        }
    }

    /// Forces the next [`Self::is_due`] check to succeed.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Rebuilds and records `step` as the time of the build.
    pub fn rebuild_at(
        &mut self,
        step: u64,
        domain: &Domain,
        entities: &EntityArena,
    ) -> Result<RebuildSummary, BinError> {
        let mut summary = self.rebuild(domain, entities)?;
        self.last_build = Some(step);
        summary.step = Some(step);
        Ok(summary)
    }

    /// Refills the index from `entities`. Any error leaves the index empty
    /// and due for another rebuild.
    pub fn rebuild(
        &mut self,
        domain: &Domain,
        entities: &EntityArena,
    ) -> Result<RebuildSummary, BinError> {
        let start = Instant::now();
        let result = self.try_rebuild(domain, entities);
        if result.is_err() {
            self.store.clear();
            self.ranges.clear();
            self.quadrature = QuadratureMap::default();
            self.invalidated = true;
        } else {
            self.invalidated = false;
        }
        let summary = result?;

        info!(
            "rebuilt index of {} entities into {} cells in {:.2?}",
            summary.entities,
            summary.cells,
            start.elapsed()
        );
        debug!("{}", summary);
        Ok(summary)
    }

    fn try_rebuild(
        &mut self,
        domain: &Domain,
        entities: &EntityArena,
    ) -> Result<RebuildSummary, BinError> {
        let repartitioned = self.needs_partition(domain, entities);
        let geometry = if repartitioned {
            let geometry = partition(domain, entities, &self.settings)?;
            self.store.resize(geometry.cell_count())?;
            self.domain = Some(domain.clone());
            self.geometry = Some(geometry);
            self.geometry.as_ref()
        } else {
            self.store.clear();
            self.geometry.as_ref()
        };
        let geometry = geometry.ok_or_else(|| BinError::configuration("cell grid missing"))?;

        // quadrature points of local entities
        let sampler = self.sampler;
        let locals: Vec<usize> = entities.locals().map(|view| view.id).collect();
        let sampled = locals
            .par_iter()
            .map_init(Vec::new, |buffer, &id| {
                sample_entity(&sampler, geometry, &entities.view(id), buffer)
            })
            .collect::<Result<Vec<Sampled>, BinError>>()?;

        let mut quadrature = QuadratureMap {
            offsets: Vec::with_capacity(entities.len() + 1),
            positions: Vec::new(),
            cells: Vec::new(),
        };
        let mut sampled = sampled.into_iter().peekable();
        for id in 0..entities.len() {
            quadrature.offsets.push(quadrature.positions.len());
            if let Some(entry) = sampled.next_if(|entry| entry.id == id) {
                quadrature.positions.extend(entry.positions);
                quadrature.cells.extend(entry.cells);
            }
        }
        quadrature.offsets.push(quadrature.positions.len());

        // cell membership
        let mut counts = EntityCounts::default();
        self.ranges.clear();
        self.ranges.reserve(entities.len());
        for view in entities.iter() {
            counts.entities += 1;
            if view.is_local() {
                counts.local += 1;
            }
            if view.kind.is_extended() {
                counts.elements += 1;
                let range = element_range(geometry, &view, self.cutneigh)?;
                for coords in range.iter() {
                    if let Some(cell) = geometry.flatten(coords) {
                        self.store.insert(cell, view.id)?;
                    }
                }
                self.ranges.push(Some(range));
            } else {
                counts.atoms += 1;
                let cell = point_cell(geometry, view.id, &view.position)?;
                self.store.insert(cell, view.id)?;
                let coords = geometry.unflatten(cell);
                self.ranges.push(Some(CellRange {
                    lo: coords,
                    hi: coords,
                }));
            }
        }

        let total_points = quadrature.positions.len();
        self.quadrature = quadrature;

        Ok(RebuildSummary::new(
            None,
            counts,
            total_points,
            geometry,
            &self.store,
            repartitioned,
        ))
    }

    /// True when the grid must be recomputed before binning `entities`.
    fn needs_partition(&self, domain: &Domain, entities: &EntityArena) -> bool {
        let (Some(geometry), Some(last)) = (self.geometry.as_ref(), self.domain.as_ref()) else {
            return true;
        };
        if last != domain {
            debug!("box changed, repartitioning");
            return true;
        }
        let radius = self.cutneigh.max(entities.max_search_range());
        if radius != geometry.search_radius {
            debug!(
                "search radius changed from {:.4} to {:.4}, repartitioning",
                geometry.search_radius, radius
            );
            return true;
        }
        let escaped = entities.locals().any(|view| {
            if view.kind.is_extended() {
                view.nodes().iter().any(|node| !geometry.accommodates(domain, node))
            } else {
                !geometry.accommodates(domain, &view.position)
            }
        });
        if escaped {
            debug!("local entity outside the binned reach, repartitioning");
        }
        escaped
    }

    /// Cell holding `x`, `None` before the first rebuild or outside the grid.
    pub fn cell_of(&self, x: &Point3<f64>) -> Option<usize> {
        self.geometry.as_ref()?.cell_of(x)
    }

    /// Entity ids in `cell`, in insertion order.
    pub fn members_of(&self, cell: usize) -> &[usize] {
        if cell < self.store.len() {
            self.store.members(cell)
        } else {
            &[]
        }
    }

    /// Quadrature points generated for entity `id` in the last rebuild.
    /// Empty for ghosts.
    pub fn quadrature_points_of(&self, id: usize) -> QuadraturePoints<'_> {
        self.quadrature.points_of(id)
    }

    /// Cells entity `id` was inserted into during the last rebuild.
    pub fn overlap_range(&self, id: usize) -> Option<CellRange> {
        self.ranges.get(id).copied().flatten()
    }
}

fn sample_entity(
    sampler: &ElementSampler,
    geometry: &BinGeometry,
    view: &EntityView<'_>,
    buffer: &mut Vec<Point3<f64>>,
) -> Result<Sampled, BinError> {
    if !view.is_finite() {
        return Err(BinError::NonFiniteGeometry { id: Some(view.id) });
    }
    let count = sampler.generate(view, buffer)?;
    let cells = buffer
        .iter()
        .map(|p| point_cell(geometry, view.id, p))
        .collect::<Result<Vec<usize>, BinError>>()?;
    Ok(Sampled {
        id: view.id,
        positions: buffer[..count].to_vec(),
        cells,
    })
}

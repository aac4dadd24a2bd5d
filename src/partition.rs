//! Uniform cell grid over the simulation box.
//!
//! The grid covers the bounding box of the global box with `nbin` cells per
//! axis, and extends past it into ghost cells far enough to reach every
//! position a local or ghost entity can occupy. Cell coordinates below the
//! box are negative, those above it start at `nbin`.
//!
//! # Key Components
//!
//! - [`BinGeometry`]: cell sizes, counts and the allocated coordinate range
//! - [`partition`]: derives a [`BinGeometry`] from a [`Domain`] and the entities it holds

use log::debug;
use nalgebra::Point3;

use crate::domain::Domain;
use crate::entity::EntityArena;
use crate::error::BinError;
use crate::settings::{Settings, CUT2BIN_RATIO, MAX_AXIS_BINS, MAX_PRESIZED_SLOTS, SMALL};


/// Cell grid over the simulation box.
///
/// **Context**: Neighbor candidates of a position are the members of its
/// cell and the cells around it. Binning must agree on cell boundaries from
/// every side of a periodic or processor boundary, so cell coordinates are
/// always measured from the global bounding box, never from the sub-box.
///
/// **How it Works**: Stores the cell size per axis and the range of cell
/// coordinates `mbinlo..mbinlo + mbin` that is allocated. Flattened cell ids
/// run x fastest, then y, then z.
#[derive(Debug, Clone, PartialEq)]
pub struct BinGeometry {
    pub bboxlo: Point3<f64>,
    pub bboxhi: Point3<f64>,
    /// Cells per axis inside the bounding box.
    pub nbin: [i32; 3],
    pub binsize: [f64; 3],
    pub bininv: [f64; 3],
    /// Lowest allocated cell coordinate per axis.
    pub mbinlo: [i32; 3],
    /// Allocated cells per axis.
    pub mbin: [i32; 3],
    /// Governing search radius the grid was built for.
    pub search_radius: f64,
    reach_lo: Point3<f64>,
    reach_hi: Point3<f64>,
    triclinic: bool,
}

impl BinGeometry {
    /// Total number of allocated cells.
    pub fn cell_count(&self) -> usize {
        self.mbin.iter().map(|&m| m as usize).product()
    }

    /// Cell coordinate of `x` along `axis`.
    ///
    /// Positions at or past the upper face of the bounding box are measured
    /// from that face and land in the ghost cells `nbin..`. Positions inside
    /// are clamped to `nbin - 1`, positions below start at `-1`. A position
    /// exactly on the upper face therefore always lands in cell `nbin`, the
    /// image of cell `0`.
    pub fn axis_bin(&self, axis: usize, x: f64) -> i32 {
        let lo = self.bboxlo[axis];
        let hi = self.bboxhi[axis];
        let inv = self.bininv[axis];
        if x >= hi {
            (((x - hi) * inv) as i32).saturating_add(self.nbin[axis])
        } else if x >= lo {
            (((x - lo) * inv) as i32).min(self.nbin[axis] - 1)
        } else {
            (((x - lo) * inv) as i32).saturating_sub(1)
        }
    }

    /// Cell coordinates of a cartesian position.
    pub fn cell_coords(&self, x: &Point3<f64>) -> [i32; 3] {
        [
            self.axis_bin(0, x.x),
            self.axis_bin(1, x.y),
            self.axis_bin(2, x.z),
        ]
    }

    pub fn contains_cell(&self, coords: [i32; 3]) -> bool {
        (0..3).all(|d| {
            let rel = coords[d] as i64 - self.mbinlo[d] as i64;
            rel >= 0 && rel < self.mbin[d] as i64
        })
    }

    /// Flattened id of a cell, `None` outside the allocated range.
    pub fn flatten(&self, coords: [i32; 3]) -> Option<usize> {
        if !self.contains_cell(coords) {
            return None;
        }
        let ix = (coords[0] - self.mbinlo[0]) as usize;
        let iy = (coords[1] - self.mbinlo[1]) as usize;
        let iz = (coords[2] - self.mbinlo[2]) as usize;
        let mx = self.mbin[0] as usize;
        let my = self.mbin[1] as usize;
        Some(iz * my * mx + iy * mx + ix)
    }

    pub fn unflatten(&self, id: usize) -> [i32; 3] {
        let mx = self.mbin[0] as usize;
        let my = self.mbin[1] as usize;
        [
            (id % mx) as i32 + self.mbinlo[0],
            ((id / mx) % my) as i32 + self.mbinlo[1],
            (id / (mx * my)) as i32 + self.mbinlo[2],
        ]
    }

    /// Flattened id of the cell holding `x`, if it is allocated.
    pub fn cell_of(&self, x: &Point3<f64>) -> Option<usize> {
        self.flatten(self.cell_coords(x))
    }

    /// Maps a cell coordinate on a periodic axis to its image inside
    /// `0..nbin`.
    pub fn wrap_axis(&self, axis: usize, coord: i32) -> i32 {
        coord.rem_euclid(self.nbin[axis])
    }

    /// True when `x` lies inside the region the grid was sized for: the
    /// sub-box grown around the local elements.
    pub fn accommodates(&self, domain: &Domain, x: &Point3<f64>) -> bool {
        let p = if self.triclinic { domain.x2lamda(x) } else { *x };
        (0..3).all(|d| p[d] >= self.reach_lo[d] && p[d] <= self.reach_hi[d])
    }
}

/// Derives the cell grid for `domain` and the entities in `entities`.
///
/// The governing search radius is the neighbor cutoff (cutoff plus skin),
/// raised to the largest element search range. Cells are half that radius
/// wide unless `settings.bin_size` overrides it, then stretched so a whole
/// number of them spans the bounding box.
pub fn partition(
    domain: &Domain,
    entities: &EntityArena,
    settings: &Settings,
) -> Result<BinGeometry, BinError> {
    let cutneigh = settings.neighbor_cutoff();
    let max_range = entities.max_search_range();
    let search_radius = cutneigh.max(max_range);

    let (reach_lo, reach_hi) = local_reach(domain, entities)?;

    // sub-box widened by the ghost cutoff, in cartesian coordinates
    let (bsublo, bsubhi) = if domain.is_triclinic() {
        let ghost = domain.ghost_cutoff(cutneigh);
        let factor = max_range / cutneigh + 1.0;
        let lo = reach_lo - ghost * factor;
        let hi = reach_hi + ghost * factor;
        domain.lamda_bbox(&lo, &hi)
    } else {
        let margin = max_range + cutneigh;
        (
            reach_lo.map(|v| v - margin),
            reach_hi.map(|v| v + margin),
        )
    };

    let (bboxlo, bboxhi) = domain.bounding_box();
    let binsize_optimal = settings.bin_size.unwrap_or(0.5 * search_radius);
    let binsizeinv = 1.0 / binsize_optimal;

    let mut nbin = [0i32; 3];
    let mut binsize = [0.0; 3];
    let mut bininv = [0.0; 3];
    let mut mbinlo = [0i32; 3];
    let mut mbin = [0i32; 3];

    for d in 0..3 {
        let extent = bboxhi[d] - bboxlo[d];
        let raw = extent * binsizeinv;
        if raw > MAX_AXIS_BINS {
            return Err(BinError::DomainTooLarge {
                cells: raw as u64,
                limit: MAX_AXIS_BINS as u64,
            });
        }
        nbin[d] = (raw as i32).max(1);
        binsize[d] = extent / nbin[d] as f64;
        bininv[d] = 1.0 / binsize[d];

        if binsize_optimal * bininv[d] > CUT2BIN_RATIO {
            return Err(BinError::DegenerateBinning {
                axis: d,
                bin_size: binsize[d],
                search_radius,
            });
        }

        let coord = bsublo[d] - SMALL * extent;
        let mut lo = ((coord - bboxlo[d]) * bininv[d]) as i64;
        if coord < bboxlo[d] {
            lo -= 1;
        }
        let coord = bsubhi[d] + SMALL * extent;
        let hi = ((coord - bboxlo[d]) * bininv[d]) as i64;

        // one extra cell on each end
        let lo = lo - 1;
        let hi = hi + 1;
        let span = hi - lo + 1;
        if lo < i32::MIN as i64 || hi > i32::MAX as i64 || span > i32::MAX as i64 {
            return Err(BinError::DomainTooLarge {
                cells: span.max(0) as u64,
                limit: MAX_AXIS_BINS as u64,
            });
        }
        mbinlo[d] = lo as i32;
        mbin[d] = span as i32;
    }

    let cells = mbin.iter().map(|&m| m as u64).product::<u64>();
    if cells > settings.max_cells as u64 {
        return Err(BinError::DomainTooLarge {
            cells,
            limit: settings.max_cells as u64,
        });
    }
    let capacity = settings.cell_capacity.max(1) as u64;
    if cells.saturating_mul(capacity) > MAX_PRESIZED_SLOTS {
        return Err(BinError::DomainTooLarge {
            cells,
            limit: MAX_PRESIZED_SLOTS / capacity,
        });
    }

    debug!(
        "partitioned {:?} cells of {:.4} x {:.4} x {:.4} for search radius {:.4}",
        mbin, binsize[0], binsize[1], binsize[2], search_radius
    );

    Ok(BinGeometry {
        bboxlo,
        bboxhi,
        nbin,
        binsize,
        bininv,
        mbinlo,
        mbin,
        search_radius,
        reach_lo,
        reach_hi,
        triclinic: domain.is_triclinic(),
    })
}

/// Sub-box grown to contain every local atom and every node of every local
/// element, in the coordinates the sub-box is given in.
fn local_reach(
    domain: &Domain,
    entities: &EntityArena,
) -> Result<(Point3<f64>, Point3<f64>), BinError> {
    let mut lo = domain.sublo();
    let mut hi = domain.subhi();

    for view in entities.locals() {
        if !view.is_finite() {
            return Err(BinError::NonFiniteGeometry { id: Some(view.id) });
        }
        for node in view.nodes() {
            let p = if domain.is_triclinic() {
                domain.x2lamda(node)
            } else {
                *node
            };
            for d in 0..3 {
                lo[d] = lo[d].min(p[d]);
                hi[d] = hi[d].max(p[d]);
            }
        }
    }

    Ok((lo, hi))
}

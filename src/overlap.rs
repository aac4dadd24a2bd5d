//! Point-to-cell and element-to-cell-range resolution.
//!
//! # Key Components
//!
//! - [`Aabb`]: axis-aligned bounding box of an entity's nodes
//! - [`CellRange`]: inclusive block of cell coordinates
//! - [`point_cell`]: cell of a single position
//! - [`element_range`]: cells overlapped by an element's inflated bounding box

use itertools::iproduct;
use nalgebra::{Point3, Vector3};
use serde::Serialize;

use crate::entity::EntityView;
use crate::error::BinError;
use crate::partition::BinGeometry;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::entity::{ElementKind, EntityArena, NewElement, Ownership, HEX_SIGNS};
    use crate::partition::partition;
    use crate::settings::Settings;

    fn setup() -> (Settings, Domain) {
        let settings = Settings::from_toml_str(
            r#"
            cutoff = 4.0
            skin = 1.0
            quadrature_order = 1
            max_poly = 2
            bin_size = 5.0
            rebuild_every = 1

            [system]
            elements = [1, 1, 1]
            element_scale = [1, 1, 1]
            lattice_constant = 1.0
            atoms = 0
            steps = 1
            "#,
        )
        .unwrap();
        let domain = Domain::orthogonal(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(20.0, 20.0, 20.0),
            [true; 3],
        )
        .unwrap();
        (settings, domain)
    }

    fn cube_at(arena: &mut EntityArena, lo: f64, edge: f64) -> usize {
        let nodes: Vec<Point3<f64>> = HEX_SIGNS
            .iter()
            .map(|s| {
                Point3::new(
                    lo + (s[0] + 1.0) * 0.5 * edge,
                    lo + (s[1] + 1.0) * 0.5 * edge,
                    lo + (s[2] + 1.0) * 0.5 * edge,
                )
            })
            .collect();
        arena
            .add_element(NewElement {
                kind: ElementKind::EightNode,
                scale: [1, 1, 1],
                poly_count: 1,
                nodes: &nodes,
                reference: None,
                ownership: Ownership::Local,
            })
            .unwrap()
    }

    #[test]
    fn aabb_spans_all_phases() {
        let points = [
            Point3::new(1.0, 5.0, -2.0),
            Point3::new(-1.0, 2.0, 3.0),
            Point3::new(0.0, 7.0, 0.0),
        ];
        let aabb = Aabb::of_points(&points).unwrap();
        assert_eq!(aabb.min, Point3::new(-1.0, 2.0, -2.0));
        assert_eq!(aabb.max, Point3::new(1.0, 7.0, 3.0));
        assert_eq!(aabb.extent(), Vector3::new(2.0, 5.0, 5.0));
        assert!(Aabb::of_points(&[]).is_none());
    }

    #[test]
    fn cube_spans_three_cells_per_axis() {
        let (settings, domain) = setup();
        let mut arena = EntityArena::from_settings(&settings);
        let id = cube_at(&mut arena, 6.0, 3.0);
        let geometry = partition(&domain, &arena, &settings).unwrap();

        let range = element_range(&geometry, &arena.view(id), settings.neighbor_cutoff()).unwrap();
        assert_eq!(range.lo, [0, 0, 0]);
        assert_eq!(range.hi, [2, 2, 2]);
        assert_eq!(range.len(), 27);
        assert_eq!(range.iter().count(), 27);
        assert!(range.contains([1, 2, 0]));
        assert!(!range.contains([3, 0, 0]));
    }

    #[test]
    fn atoms_still_get_inflated() {
        let (settings, domain) = setup();
        let mut arena = EntityArena::from_settings(&settings);
        let id = arena
            .add_atom(Point3::new(7.5, 7.5, 7.5), Ownership::Local)
            .unwrap();
        let geometry = partition(&domain, &arena, &settings).unwrap();
        let range = element_range(&geometry, &arena.view(id), settings.neighbor_cutoff()).unwrap();
        assert_eq!(range.lo, [0, 0, 0]);
        assert_eq!(range.hi, [2, 2, 2]);
    }

    #[test]
    fn non_finite_nodes_are_rejected() {
        let (settings, domain) = setup();
        let mut arena = EntityArena::from_settings(&settings);
        let id = cube_at(&mut arena, 6.0, 3.0);
        let geometry = partition(&domain, &arena, &settings).unwrap();
        arena.nodes_mut(id)[3].y = f64::NAN;

        let result = element_range(&geometry, &arena.view(id), settings.neighbor_cutoff());
        assert_eq!(result, Err(BinError::NonFiniteGeometry { id: Some(id) }));

        let result = point_cell(&geometry, 4, &Point3::new(f64::INFINITY, 0.0, 0.0));
        assert_eq!(result, Err(BinError::NonFiniteGeometry { id: Some(4) }));
    }

    #[test]
    fn points_outside_the_grid_are_reported() {
        let (settings, domain) = setup();
        let arena = EntityArena::from_settings(&settings);
        let geometry = partition(&domain, &arena, &settings).unwrap();
        let result = point_cell(&geometry, 9, &Point3::new(500.0, 0.0, 0.0));
        assert!(matches!(result, Err(BinError::OutsideGrid { id: 9, .. })));
    }

    #[test]
    fn ranges_are_clamped_to_the_grid() {
        let (settings, domain) = setup();
        let arena = EntityArena::from_settings(&settings);
        let geometry = partition(&domain, &arena, &settings).unwrap();
        let range = CellRange {
            lo: [-100, 0, 0],
            hi: [1, 1, 100],
        }
        .clamp_to(&geometry);
        assert_eq!(range.lo[0], geometry.mbinlo[0]);
        assert_eq!(range.hi[2], geometry.mbinlo[2] + geometry.mbin[2] - 1);

        let outside = CellRange {
            lo: [100, 0, 0],
            hi: [101, 0, 0],
        }
        .clamp_to(&geometry);
        assert!(outside.is_empty());
        assert_eq!(outside.iter().count(), 0);
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Smallest box holding every point, `None` for an empty slice.
    pub fn of_points(points: &[Point3<f64>]) -> Option<Self> {
        let first = points.first()?;
        let mut aabb = Self {
            min: *first,
            max: *first,
        };
        for p in &points[1..] {
            for d in 0..3 {
                aabb.min[d] = aabb.min[d].min(p[d]);
                aabb.max[d] = aabb.max[d].max(p[d]);
            }
        }
        Some(aabb)
    }

    /// Box around every node of every phase of an entity.
    pub fn of_entity(view: &EntityView<'_>) -> Self {
        Self::of_points(view.nodes()).unwrap_or(Self {
            min: view.position,
            max: view.position,
        })
    }

    /// Grows every side by `by`.
    pub fn inflate(&self, by: f64) -> Self {
        let by = Vector3::repeat(by);
        Self {
            min: self.min - by,
            max: self.max + by,
        }
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    pub fn is_finite(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|v| v.is_finite())
    }
}

/// Inclusive block of cell coordinates `lo..=hi` on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellRange {
    pub lo: [i32; 3],
    pub hi: [i32; 3],
}

impl CellRange {
    /// Number of cells in the block.
    pub fn len(&self) -> usize {
        (0..3)
            .map(|d| (self.hi[d] as i64 - self.lo[d] as i64 + 1).max(0) as usize)
            .product()
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|d| self.hi[d] < self.lo[d])
    }

    pub fn contains(&self, coords: [i32; 3]) -> bool {
        (0..3).all(|d| coords[d] >= self.lo[d] && coords[d] <= self.hi[d])
    }

    /// Cell coordinates in the block, x fastest.
    pub fn iter(&self) -> impl Iterator<Item = [i32; 3]> {
        let [xl, yl, zl] = self.lo;
        let [xh, yh, zh] = self.hi;
        iproduct!(zl..=zh, yl..=yh, xl..=xh).map(|(z, y, x)| [x, y, z])
    }

    /// Intersection with the allocated range of `geometry`.
    pub fn clamp_to(&self, geometry: &BinGeometry) -> Self {
        let mut clamped = *self;
        for d in 0..3 {
            clamped.lo[d] = self.lo[d].max(geometry.mbinlo[d]);
            clamped.hi[d] = self.hi[d].min(geometry.mbinlo[d] + geometry.mbin[d] - 1);
        }
        clamped
    }

    /// `(lo_x, lo_y, lo_z, hi_x, hi_y, hi_z)`.
    pub fn limits(&self) -> [i32; 6] {
        [
            self.lo[0], self.lo[1], self.lo[2], self.hi[0], self.hi[1], self.hi[2],
        ]
    }
}

/// Flattened cell id of position `x`, which belongs to entity `id`.
pub fn point_cell(geometry: &BinGeometry, id: usize, x: &Point3<f64>) -> Result<usize, BinError> {
    if !x.iter().all(|v| v.is_finite()) {
        return Err(BinError::NonFiniteGeometry { id: Some(id) });
    }
    let coords = geometry.cell_coords(x);
    geometry
        .flatten(coords)
        .ok_or(BinError::OutsideGrid { id, cell: coords })
}

/// Cells overlapped by the bounding box of an entity grown by `cutneigh` on
/// every side, restricted to the allocated grid.
///
/// The corners of the grown box go through the same per-axis rule as single
/// positions, so an element and a point at the same place agree on cells.
pub fn element_range(
    geometry: &BinGeometry,
    view: &EntityView<'_>,
    cutneigh: f64,
) -> Result<CellRange, BinError> {
    if !view.is_finite() {
        return Err(BinError::NonFiniteGeometry { id: Some(view.id) });
    }
    let aabb = Aabb::of_entity(view).inflate(cutneigh);
    let range = CellRange {
        lo: geometry.cell_coords(&aabb.min),
        hi: geometry.cell_coords(&aabb.max),
    };
    Ok(range.clamp_to(geometry))
}

//! Quadrature point generation for elements.
//!
//! Sampling runs in four stages per phase. The interior is covered by the
//! Gauss rule shrunk by the interior fraction. Each face, edge and corner
//! region then gets every skin layer on its skin axes, crossed with the
//! interior rule on its remaining axes.
//!
//! ```text
//! Interior   q^3
//! Faces      2 cx q^2 + 2 cy q^2 + 2 cz q^2
//! Edges      4 cx cy q + 4 cy cz q + 4 cx cz q
//! Corners    8 cx cy cz
//! ```

use itertools::iproduct;
use nalgebra::Point3;

use crate::entity::{ElementKind, EntityView, ShapeBasis, TrilinearHex};
use crate::error::BinError;
use crate::quadrature::{compute_surface_depth, QuadratureOrder, SurfaceDepth};
use crate::settings::Settings;


/// Sampling stages, in generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Interior,
    Faces,
    Edges,
    Corners,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Interior, Stage::Faces, Stage::Edges, Stage::Corners];

    /// Skin axes of every region sampled in this stage.
    fn regions(self) -> &'static [[bool; 3]] {
        match self {
            Stage::Interior => &[[false, false, false]],
            Stage::Faces => &[
                [true, false, false],
                [false, true, false],
                [false, false, true],
            ],
            Stage::Edges => &[
                [true, true, false],
                [true, false, true],
                [false, true, true],
            ],
            Stage::Corners => &[[true, true, true]],
        }
    }

    /// Points this stage yields for one phase.
    pub fn point_count(self, depth: &SurfaceDepth, order: QuadratureOrder) -> usize {
        let q = order.node_count();
        self.regions()
            .iter()
            .map(|skin| {
                (0..3)
                    .map(|d| if skin[d] { 2 * depth.counts[d] } else { q })
                    .product::<usize>()
            })
            .sum()
    }
}

/// Generates the quadrature points of one entity at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementSampler {
    pub order: QuadratureOrder,
    pub cutoff: f64,
    pub one_layer: bool,
    pub max_poly: usize,
}

/// Everything the stage loops need about the entity being sampled.
struct SampleContext<'a> {
    nodes: &'a [Point3<f64>],
    depth: &'a SurfaceDepth,
    abscissae: &'static [f64],
}

impl SampleContext<'_> {
    /// Parametric coordinates along `axis` for a region. Interior axes of a
    /// region that touches the skin are moved half a unit cell outward.
    fn axis_coords(&self, axis: usize, skin: bool, mixed: bool) -> Vec<f64> {
        let unit = self.depth.unit[axis];
        if skin {
            let count = self.depth.counts[axis];
            [-1.0, 1.0]
                .iter()
                .flat_map(|side| (0..count).map(move |i| side * (1.0 - (i as f64 + 0.5) * unit)))
                .collect()
        } else {
            self.abscissae
                .iter()
                .map(|&a| {
                    let v = self.depth.interior[axis] * a;
                    let snapped = unit * (v / unit).trunc();
                    if !mixed {
                        snapped
                    } else if a < 0.0 {
                        snapped - 0.5 * unit
                    } else {
                        snapped + 0.5 * unit
                    }
                })
                .collect()
        }
    }

    fn sample_stage<B: ShapeBasis>(&self, stage: Stage, buffer: &mut Vec<Point3<f64>>) {
        for skin in stage.regions() {
            let mixed = skin.iter().any(|&s| s);
            let s = self.axis_coords(0, skin[0], mixed);
            let t = self.axis_coords(1, skin[1], mixed);
            let w = self.axis_coords(2, skin[2], mixed);
            for (&s, &t, &w) in iproduct!(s.iter(), t.iter(), w.iter()) {
                buffer.push(B::interpolate(self.nodes, [s, t, w]));
            }
        }
    }
}

impl ElementSampler {
    pub fn new(order: QuadratureOrder, cutoff: f64, one_layer: bool, max_poly: usize) -> Self {
        Self {
            order,
            cutoff,
            one_layer,
            max_poly,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.quadrature_order,
            settings.cutoff,
            settings.one_layer,
            settings.max_poly,
        )
    }

    pub fn surface_depth(&self, view: &EntityView<'_>) -> SurfaceDepth {
        compute_surface_depth(view, self.cutoff, self.one_layer)
    }

    /// Number of points [`Self::generate`] yields for `view`.
    pub fn point_count(&self, view: &EntityView<'_>) -> usize {
        match view.kind {
            ElementKind::Atom => 1,
            _ => view.poly_count * self.surface_depth(view).point_count(self.order),
        }
    }

    /// Replaces the contents of `buffer` with the quadrature points of
    /// `view` and returns how many there are. Atoms yield their position.
    pub fn generate(
        &self,
        view: &EntityView<'_>,
        buffer: &mut Vec<Point3<f64>>,
    ) -> Result<usize, BinError> {
        buffer.clear();
        self.validate(view)?;

        match view.kind {
            ElementKind::Atom => buffer.push(view.position),
            ElementKind::EightNode => self.sample::<TrilinearHex>(view, buffer),
        }
        Ok(buffer.len())
    }

    fn validate(&self, view: &EntityView<'_>) -> Result<(), BinError> {
        if view.scale.iter().any(|&s| s == 0) {
            return Err(BinError::entity_configuration(
                view.id,
                "scale must be at least 1 on every axis",
            ));
        }
        if view.poly_count == 0 || view.poly_count > self.max_poly {
            return Err(BinError::entity_configuration(
                view.id,
                format!(
                    "phase count {} exceeds the limit of {}",
                    view.poly_count, self.max_poly
                ),
            ));
        }
        Ok(())
    }

    fn sample<B: ShapeBasis>(&self, view: &EntityView<'_>, buffer: &mut Vec<Point3<f64>>) {
        let depth = self.surface_depth(view);
        buffer.reserve(view.poly_count * depth.point_count(self.order));

        for phase in 0..view.poly_count {
            let context = SampleContext {
                nodes: view.phase(phase),
                depth: &depth,
                abscissae: self.order.abscissae(),
            };
            for stage in Stage::ALL {
                context.sample_stage::<B>(stage, buffer);
            }
        }
    }
}

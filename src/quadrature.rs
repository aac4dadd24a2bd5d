//! Gauss rules and the surface-depth estimate that decides how densely each
//! part of an element is sampled.
//!
//! An element's parametric cube `[-1, 1]^3` is divided into `scale[axis]`
//! unit cells per axis, each `2 / scale[axis]` wide. Near the faces, where a
//! neighbor within the cutoff may sit outside the element, every unit cell
//! layer is sampled. The rest of the cube is covered by a coarse Gauss rule.

use serde::{Deserialize, Serialize};

use crate::entity::{ElementKind, EntityView};
use crate::error::BinError;


const GAUSS_ONE: [f64; 1] = [0.0];
const GAUSS_TWO: [f64; 2] = [-0.577_350_269_189_625_8, 0.577_350_269_189_625_8];

/// Order of the tensor-product Gauss rule used for element interiors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QuadratureOrder {
    One,
    Two,
}

impl QuadratureOrder {
    /// Gauss abscissae on `[-1, 1]`, in ascending order.
    pub fn abscissae(self) -> &'static [f64] {
        match self {
            QuadratureOrder::One => &GAUSS_ONE,
            QuadratureOrder::Two => &GAUSS_TWO,
        }
    }

    /// Number of abscissae per axis.
    pub fn node_count(self) -> usize {
        self.abscissae().len()
    }
}

impl TryFrom<u8> for QuadratureOrder {
    type Error = BinError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(QuadratureOrder::One),
            2 => Ok(QuadratureOrder::Two),
            other => Err(BinError::configuration(format!(
                "quadrature order must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<QuadratureOrder> for u8 {
    fn from(order: QuadratureOrder) -> Self {
        order.node_count() as u8
    }
}

/// Per-axis sampling depth of one element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceDepth {
    /// Unit-cell layers sampled below each face, per axis.
    pub counts: [usize; 3],
    /// Fraction of the parametric half-width covered by the interior rule.
    pub interior: [f64; 3],
    /// Parametric width of one unit cell, `2 / scale`.
    pub unit: [f64; 3],
}

impl SurfaceDepth {
    /// Number of sample points generated for one phase.
    pub fn point_count(&self, order: QuadratureOrder) -> usize {
        let q = order.node_count();
        self.counts.iter().map(|c| q + 2 * c).product()
    }
}

/// Estimates how many unit-cell layers below each face must be sampled so
/// that every site within `cutoff` of the element surface is represented.
///
/// Axis spacings are taken from the edges between node 0 and nodes 1, 3 and
/// 4. For multi-phase elements the deepest phase wins on each axis.
pub fn compute_surface_depth(view: &EntityView<'_>, cutoff: f64, one_layer: bool) -> SurfaceDepth {
    if view.kind == ElementKind::Atom {
        return SurfaceDepth {
            counts: [0; 3],
            interior: [1.0; 3],
            unit: [2.0; 3],
        };
    }

    let unit = view.scale.map(|s| 2.0 / s as f64);
    let mut depth = SurfaceDepth {
        counts: [0; 3],
        interior: [1.0; 3],
        unit,
    };
    let mut seen = [false; 3];

    for phase in 0..view.poly_count {
        let nodes = view.phase(phase);
        let spacing = [
            (nodes[0] - nodes[1]).norm(),
            (nodes[0] - nodes[3]).norm(),
            (nodes[0] - nodes[4]).norm(),
        ];

        for axis in 0..3 {
            let (count, interior) = axis_depth(spacing[axis], cutoff, view.scale[axis], one_layer);
            if !seen[axis] || count > depth.counts[axis] {
                depth.counts[axis] = count;
                depth.interior[axis] = interior;
                seen[axis] = true;
            }
        }
    }

    depth
}

/// Layer count and interior fraction along one axis.
fn axis_depth(spacing: f64, cutoff: f64, scale: u32, one_layer: bool) -> (usize, f64) {
    let unit = 2.0 / scale as f64;
    let max_layers = (scale / 2) as usize;

    // whole units needed to reach the cutoff, plus one; an axis of a single
    // unit cell has no layers to spare even in one-layer mode
    let layers = if one_layer {
        1
    } else if spacing > 0.0 {
        let required = 2.0 * cutoff / spacing;
        ((required / unit).floor() as usize).saturating_add(1)
    } else {
        usize::MAX
    };

    let skin = if layers > max_layers {
        1.0
    } else {
        layers as f64 * unit
    };

    (layers.min(max_layers), 1.0 - skin)
}

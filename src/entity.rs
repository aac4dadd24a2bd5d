//! Point particles and finite elements stored in flat arrays.
//!
//! Every entity is either an atom (one node, one phase) or an element whose
//! shape is interpolated from a fixed set of control nodes. An element may
//! carry several phases, independent copies of its node positions occupying
//! the same cell. The arena keeps current and reference node positions in
//! two flat arrays laid out `[entity][phase][node]`, with offsets and
//! per-entity bounds carried alongside.
//!
//! # Key Components
//!
//! - [`ElementKind`]: closed set of element types, each with a node count and a shape basis
//! - [`ShapeBasis`]: interpolation of node positions at a parametric coordinate
//! - [`EntityArena`]: owner of all local and ghost entities
//! - [`EntityView`]: borrowed view of one entity

use std::fmt;
use std::str::FromStr;

use nalgebra::{Point3, Vector3};
use serde::Serialize;

use crate::error::BinError;
use crate::settings::Settings;

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_nodes(origin: Point3<f64>, edge: f64) -> Vec<Point3<f64>> {
        HEX_SIGNS
            .iter()
            .map(|s| {
                origin
                    + Vector3::new(
                        (s[0] + 1.0) * 0.5 * edge,
                        (s[1] + 1.0) * 0.5 * edge,
                        (s[2] + 1.0) * 0.5 * edge,
                    )
            })
            .collect()
    }

    #[test]
    fn parse_element_names() {
        assert_eq!("Atom".parse::<ElementKind>().unwrap(), ElementKind::Atom);
        assert_eq!(
            "Eight_Node".parse::<ElementKind>().unwrap(),
            ElementKind::EightNode
        );
        assert!("Twenty_Node".parse::<ElementKind>().is_err());
        assert_eq!(ElementKind::from_type_id(1).unwrap(), ElementKind::EightNode);
        assert!(ElementKind::from_type_id(7).is_err());
    }

    #[test]
    fn trilinear_weights_partition_unity() {
        let mut weights = [0.0; 8];
        TrilinearHex::weights([0.3, -0.7, 0.1], &mut weights);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn trilinear_hits_nodes_at_corners() {
        let nodes = cube_nodes(Point3::new(1.0, 2.0, 3.0), 4.0);
        for (k, sign) in HEX_SIGNS.iter().enumerate() {
            let x = TrilinearHex::interpolate(&nodes, *sign);
            assert!((x - nodes[k]).norm() < 1e-12);
        }
        let centre = TrilinearHex::interpolate(&nodes, [0.0, 0.0, 0.0]);
        assert!((centre - Point3::new(3.0, 4.0, 5.0)).norm() < 1e-12);
    }

    #[test]
    fn add_element_validates_input() {
        let mut arena = EntityArena::new(2, 1.0);
        let nodes = cube_nodes(Point3::origin(), 2.0);

        let zero_scale = NewElement {
            kind: ElementKind::EightNode,
            scale: [4, 0, 4],
            poly_count: 1,
            nodes: &nodes,
            reference: None,
            ownership: Ownership::Local,
        };
        assert!(matches!(
            arena.add_element(zero_scale),
            Err(BinError::Configuration { id: Some(0), .. })
        ));

        let too_many_phases = NewElement {
            kind: ElementKind::EightNode,
            scale: [4, 4, 4],
            poly_count: 3,
            nodes: &nodes,
            reference: None,
            ownership: Ownership::Local,
        };
        assert!(arena.add_element(too_many_phases).is_err());

        let wrong_node_count = NewElement {
            kind: ElementKind::EightNode,
            scale: [4, 4, 4],
            poly_count: 1,
            nodes: &nodes[..6],
            reference: None,
            ownership: Ownership::Local,
        };
        assert!(arena.add_element(wrong_node_count).is_err());
        assert!(arena.is_empty());
    }

    #[test]
    fn search_range_is_longest_node_separation() {
        let mut arena = EntityArena::new(1, 1.1);
        let nodes = cube_nodes(Point3::origin(), 2.0);
        let id = arena
            .add_element(NewElement {
                kind: ElementKind::EightNode,
                scale: [2, 2, 2],
                poly_count: 1,
                nodes: &nodes,
                reference: None,
                ownership: Ownership::Local,
            })
            .unwrap();
        let atom = arena
            .add_atom(Point3::new(9.0, 9.0, 9.0), Ownership::Ghost)
            .unwrap();

        let expected = 1.1 * (12.0f64).sqrt();
        assert!((arena.view(id).search_range - expected).abs() < 1e-12);
        assert_eq!(arena.view(atom).search_range, 0.0);
        assert!((arena.max_search_range() - expected).abs() < 1e-12);
        assert_eq!(arena.nlocal(), 1);
        assert_eq!(arena.locals().count(), 1);
    }

    #[test]
    fn phases_are_laid_out_contiguously() {
        let mut arena = EntityArena::new(2, 1.0);
        let mut nodes = cube_nodes(Point3::origin(), 1.0);
        nodes.extend(cube_nodes(Point3::new(0.0, 0.0, 5.0), 1.0));
        let id = arena
            .add_element(NewElement {
                kind: ElementKind::EightNode,
                scale: [1, 1, 1],
                poly_count: 2,
                nodes: &nodes,
                reference: None,
                ownership: Ownership::Local,
            })
            .unwrap();
        let view = arena.view(id);
        assert_eq!(view.phase(1)[0], Point3::new(0.0, 0.0, 5.0));
        assert_eq!(view.reference_phase(1)[0], Point3::new(0.0, 0.0, 5.0));
        assert!((view.position - Point3::new(0.5, 0.5, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn translate_moves_nodes_not_reference() {
        let mut arena = EntityArena::new(1, 1.0);
        let nodes = cube_nodes(Point3::origin(), 1.0);
        let id = arena
            .add_element(NewElement {
                kind: ElementKind::EightNode,
                scale: [1, 1, 1],
                poly_count: 1,
                nodes: &nodes,
                reference: None,
                ownership: Ownership::Local,
            })
            .unwrap();
        arena.translate(id, &Vector3::new(1.0, 0.0, 0.0));
        let view = arena.view(id);
        assert_eq!(view.phase(0)[0], Point3::new(1.0, 0.0, 0.0));
        assert_eq!(view.reference_phase(0)[0], Point3::new(0.0, 0.0, 0.0));
        assert!((view.position.x - 1.5).abs() < 1e-12);
    }
}

/// Parametric corner signs of the eight-node hexahedron, in node order.
pub const HEX_SIGNS: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

/// Element types known to the binning code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementKind {
    /// A point particle, binned by its position alone.
    Atom,
    /// Trilinear hexahedron with eight corner nodes.
    EightNode,
}

impl ElementKind {
    /// Numeric type id used by data files, atoms are 0 by convention.
    pub fn type_id(self) -> u32 {
        match self {
            ElementKind::Atom => 0,
            ElementKind::EightNode => 1,
        }
    }

    pub fn from_type_id(id: u32) -> Result<Self, BinError> {
        match id {
            0 => Ok(ElementKind::Atom),
            1 => Ok(ElementKind::EightNode),
            other => Err(BinError::configuration(format!(
                "element type id {} is not defined",
                other
            ))),
        }
    }

    /// Number of control nodes per phase.
    pub fn node_count(self) -> usize {
        match self {
            ElementKind::Atom => PointBasis::NODES,
            ElementKind::EightNode => TrilinearHex::NODES,
        }
    }

    /// True for entities that span more than a single point.
    pub fn is_extended(self) -> bool {
        !matches!(self, ElementKind::Atom)
    }
}

impl FromStr for ElementKind {
    type Err = BinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Atom" => Ok(ElementKind::Atom),
            "Eight_Node" | "EightNode" => Ok(ElementKind::EightNode),
            other => Err(BinError::configuration(format!(
                "element type '{}' is not defined",
                other
            ))),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Atom => write!(f, "Atom"),
            ElementKind::EightNode => write!(f, "Eight_Node"),
        }
    }
}

/// Nodal shape functions of one element type over the parametric cube
/// `[-1, 1]^3`.
pub trait ShapeBasis {
    const NODES: usize;

    /// Writes the weight of every node at `(s, t, w)` into `out`.
    fn weights(stw: [f64; 3], out: &mut [f64]);

    /// Interpolates node positions at `(s, t, w)`.
    fn interpolate(nodes: &[Point3<f64>], stw: [f64; 3]) -> Point3<f64>;
}

/// Single-node basis: every coordinate maps to the node itself.
pub struct PointBasis;

impl ShapeBasis for PointBasis {
    const NODES: usize = 1;

    fn weights(_stw: [f64; 3], out: &mut [f64]) {
        out[0] = 1.0;
    }

    fn interpolate(nodes: &[Point3<f64>], _stw: [f64; 3]) -> Point3<f64> {
        nodes[0]
    }
}

/// Standard trilinear basis of the eight-node hexahedron.
pub struct TrilinearHex;

impl ShapeBasis for TrilinearHex {
    const NODES: usize = 8;

    fn weights(stw: [f64; 3], out: &mut [f64]) {
        let [s, t, w] = stw;
        for (weight, sign) in out.iter_mut().zip(HEX_SIGNS.iter()) {
            *weight = (1.0 + sign[0] * s) * (1.0 + sign[1] * t) * (1.0 + sign[2] * w) / 8.0;
        }
    }

    fn interpolate(nodes: &[Point3<f64>], stw: [f64; 3]) -> Point3<f64> {
        let mut weights = [0.0; 8];
        Self::weights(stw, &mut weights);
        let sum = nodes
            .iter()
            .zip(weights.iter())
            .fold(Vector3::zeros(), |acc, (node, weight)| acc + node.coords * *weight);
        Point3::from(sum)
    }
}

/// Whether this process owns an entity or holds a ghost copy of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ownership {
    Local,
    Ghost,
}

/// Input for [`EntityArena::add_element`]. `nodes` holds `poly_count`
/// phases of `kind.node_count()` positions each, phase after phase.
#[derive(Debug, Clone, Copy)]
pub struct NewElement<'a> {
    pub kind: ElementKind,
    pub scale: [u32; 3],
    pub poly_count: usize,
    pub nodes: &'a [Point3<f64>],
    /// Initial node positions, defaults to `nodes`.
    pub reference: Option<&'a [Point3<f64>]>,
    pub ownership: Ownership,
}

/// Flat storage of all local and ghost entities.
#[derive(Debug, Clone, Default)]
pub struct EntityArena {
    max_poly: usize,
    search_range_factor: f64,
    kinds: Vec<ElementKind>,
    ownership: Vec<Ownership>,
    positions: Vec<Point3<f64>>,
    poly_counts: Vec<usize>,
    scales: Vec<[u32; 3]>,
    node_offsets: Vec<usize>,
    nodes: Vec<Point3<f64>>,
    reference_nodes: Vec<Point3<f64>>,
    search_ranges: Vec<f64>,
    nlocal: usize,
}

impl EntityArena {
    pub fn new(max_poly: usize, search_range_factor: f64) -> Self {
        Self {
            max_poly,
            search_range_factor,
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_poly, settings.search_range_factor)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Number of locally owned entities.
    pub fn nlocal(&self) -> usize {
        self.nlocal
    }

    pub fn max_poly(&self) -> usize {
        self.max_poly
    }

    pub fn search_range_factor(&self) -> f64 {
        self.search_range_factor
    }

    /// Adds a point particle and returns its id.
    pub fn add_atom(&mut self, position: Point3<f64>, ownership: Ownership) -> Result<usize, BinError> {
        self.push(
            ElementKind::Atom,
            ownership,
            position,
            1,
            [1, 1, 1],
            &[position],
            &[position],
        )
    }

    /// Adds an element and returns its id. Its reference point is the
    /// centroid of all its nodes.
    pub fn add_element(&mut self, element: NewElement<'_>) -> Result<usize, BinError> {
        let id = self.len();
        let expected = element.kind.node_count() * element.poly_count;

        if element.poly_count == 0 || element.poly_count > self.max_poly {
            return Err(BinError::entity_configuration(
                id,
                format!(
                    "phase count {} must lie in 1..={}",
                    element.poly_count, self.max_poly
                ),
            ));
        }
        if element.scale.iter().any(|&s| s == 0) {
            return Err(BinError::entity_configuration(
                id,
                "scale must be at least 1 on every axis",
            ));
        }
        if element.nodes.len() != expected {
            return Err(BinError::entity_configuration(
                id,
                format!(
                    "{} requires {} node positions for {} phases, got {}",
                    element.kind,
                    expected,
                    element.poly_count,
                    element.nodes.len()
                ),
            ));
        }
        let reference = element.reference.unwrap_or(element.nodes);
        if reference.len() != expected {
            return Err(BinError::entity_configuration(
                id,
                "reference positions do not match the current positions",
            ));
        }

        let sum = element
            .nodes
            .iter()
            .fold(Vector3::zeros(), |acc, node| acc + node.coords);
        let centroid = Point3::from(sum / expected as f64);

        self.push(
            element.kind,
            element.ownership,
            centroid,
            element.poly_count,
            element.scale,
            element.nodes,
            reference,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        kind: ElementKind,
        ownership: Ownership,
        position: Point3<f64>,
        poly_count: usize,
        scale: [u32; 3],
        nodes: &[Point3<f64>],
        reference: &[Point3<f64>],
    ) -> Result<usize, BinError> {
        let id = self.len();
        let search_range =
            self.search_range_factor * longest_separation(reference, kind.node_count(), poly_count);

        self.kinds.push(kind);
        self.ownership.push(ownership);
        self.positions.push(position);
        self.poly_counts.push(poly_count);
        self.scales.push(scale);
        self.node_offsets.push(self.nodes.len());
        self.nodes.extend_from_slice(nodes);
        self.reference_nodes.extend_from_slice(reference);
        self.search_ranges.push(search_range);
        if ownership == Ownership::Local {
            self.nlocal += 1;
        }
        Ok(id)
    }

    /// Borrowed view of entity `id`.
    pub fn view(&self, id: usize) -> EntityView<'_> {
        let kind = self.kinds[id];
        let poly_count = self.poly_counts[id];
        let start = self.node_offsets[id];
        let end = start + kind.node_count() * poly_count;
        EntityView {
            id,
            kind,
            ownership: self.ownership[id],
            position: self.positions[id],
            poly_count,
            scale: self.scales[id],
            search_range: self.search_ranges[id],
            nodes: &self.nodes[start..end],
            reference: &self.reference_nodes[start..end],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityView<'_>> + '_ {
        (0..self.len()).map(move |id| self.view(id))
    }

    /// Locally owned entities, in id order.
    pub fn locals(&self) -> impl Iterator<Item = EntityView<'_>> + '_ {
        self.iter().filter(|view| view.is_local())
    }

    /// Largest search range over all entities. Ranges are measured on the
    /// reference nodes, so they do not change as elements deform.
    pub fn max_search_range(&self) -> f64 {
        self.search_ranges.iter().copied().fold(0.0, f64::max)
    }

    /// Mutable current node positions of entity `id`, phase after phase.
    /// The reference point is not updated, call [`Self::set_position`].
    pub fn nodes_mut(&mut self, id: usize) -> &mut [Point3<f64>] {
        let start = self.node_offsets[id];
        let end = start + self.kinds[id].node_count() * self.poly_counts[id];
        &mut self.nodes[start..end]
    }

    pub fn set_position(&mut self, id: usize, position: Point3<f64>) {
        self.positions[id] = position;
        if self.kinds[id] == ElementKind::Atom {
            self.nodes_mut(id)[0] = position;
        }
    }

    /// Rigidly moves the current position and nodes of entity `id`.
    pub fn translate(&mut self, id: usize, delta: &Vector3<f64>) {
        self.positions[id] += delta;
        for node in self.nodes_mut(id) {
            *node += delta;
        }
    }
}

/// Largest distance between two nodes of the same phase.
fn longest_separation(nodes: &[Point3<f64>], node_count: usize, poly_count: usize) -> f64 {
    let mut longest: f64 = 0.0;
    for phase in nodes.chunks(node_count).take(poly_count) {
        for (i, a) in phase.iter().enumerate() {
            for b in &phase[i + 1..] {
                longest = longest.max((a - b).norm());
            }
        }
    }
    longest
}

/// Borrowed view of one entity in an [`EntityArena`].
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    pub id: usize,
    pub kind: ElementKind,
    pub ownership: Ownership,
    /// Reference point, the centroid for elements.
    pub position: Point3<f64>,
    pub poly_count: usize,
    pub scale: [u32; 3],
    pub search_range: f64,
    nodes: &'a [Point3<f64>],
    reference: &'a [Point3<f64>],
}

impl<'a> EntityView<'a> {
    pub fn is_local(&self) -> bool {
        self.ownership == Ownership::Local
    }

    /// All current node positions, phase after phase.
    pub fn nodes(&self) -> &'a [Point3<f64>] {
        self.nodes
    }

    /// Current node positions of one phase.
    pub fn phase(&self, phase: usize) -> &'a [Point3<f64>] {
        let n = self.kind.node_count();
        &self.nodes[phase * n..(phase + 1) * n]
    }

    /// Initial node positions of one phase.
    pub fn reference_phase(&self, phase: usize) -> &'a [Point3<f64>] {
        let n = self.kind.node_count();
        &self.reference[phase * n..(phase + 1) * n]
    }

    /// True when the position and every node are finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.nodes.iter().all(|n| n.iter().all(|v| v.is_finite()))
    }
}

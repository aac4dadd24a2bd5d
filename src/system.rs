//! Synthetic coupled atomistic-continuum system.
//!
//! Stands in for a running simulation: a block of eight-node elements in the
//! middle of the box, atoms scattered through it, and periodic ghost images
//! of both near the box faces. Every step jitters the local nodes and atoms
//! and rebuilds the ghost images.

use itertools::iproduct;
use log::debug;
use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::Domain;
use crate::entity::{ElementKind, EntityArena, NewElement, Ownership, HEX_SIGNS};
use crate::error::BinError;
use crate::settings::Settings;

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(extra_system: &str) -> Settings {
        let doc = format!(
            r#"
            cutoff = 2.0
            skin = 0.5
            quadrature_order = 2
            max_poly = 2
            rebuild_every = 2

            [system]
            elements = [2, 2, 2]
            element_scale = [4, 4, 4]
            lattice_constant = 1.0
            atoms = 40
            jitter = 0.1
            vacuum = 4.0
            steps = 3
            seed = 7
            {}
            "#,
            extra_system
        );
        Settings::from_toml_str(&doc).unwrap()
    }

    #[test]
    fn builds_block_and_atoms() {
        let system = SyntheticSystem::build(&settings("")).unwrap();
        let entities = system.entities();
        assert_eq!(entities.nlocal(), 40 + 8);
        assert!(entities.len() > entities.nlocal());
        assert_eq!(system.domain().boxhi, Point3::new(16.0, 16.0, 16.0));

        let elements = entities
            .locals()
            .filter(|view| view.kind == ElementKind::EightNode)
            .count();
        assert_eq!(elements, 8);
    }

    #[test]
    fn non_periodic_box_has_no_ghosts() {
        let system =
            SyntheticSystem::build(&settings("periodic = [false, false, false]")).unwrap();
        let entities = system.entities();
        assert_eq!(entities.len(), entities.nlocal());
    }

    #[test]
    fn same_seed_same_system() {
        let a = SyntheticSystem::build(&settings("")).unwrap();
        let b = SyntheticSystem::build(&settings("")).unwrap();
        let pa: Vec<_> = a.entities().iter().map(|v| v.position).collect();
        let pb: Vec<_> = b.entities().iter().map(|v| v.position).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn advance_keeps_atoms_in_the_box() {
        let mut system = SyntheticSystem::build(&settings("")).unwrap();
        for _ in 0..5 {
            system.advance().unwrap();
        }
        let domain = system.domain().clone();
        for view in system.entities().locals() {
            if view.kind == ElementKind::Atom {
                let lamda = domain.x2lamda(&view.position);
                assert!(lamda.iter().all(|&l| (-1e-9..=1.0 + 1e-9).contains(&l)));
            }
        }
    }

    #[test]
    fn multiphase_tilted_system() {
        let system =
            SyntheticSystem::build(&settings("phases = 2\ntilt = [1.5, 0.0, -1.0]")).unwrap();
        assert!(system.domain().is_triclinic());
        let view = system
            .entities()
            .locals()
            .find(|view| view.kind.is_extended())
            .unwrap();
        assert_eq!(view.poly_count, 2);
        assert_eq!(view.nodes().len(), 16);
    }
}

#[derive(Debug, Clone)]
struct LocalElement {
    nodes: Vec<Point3<f64>>,
    reference: Vec<Point3<f64>>,
}

/// A box of local atoms and elements plus their periodic ghost images.
#[derive(Debug, Clone)]
pub struct SyntheticSystem {
    domain: Domain,
    scale: [u32; 3],
    phases: usize,
    cutneigh: f64,
    jitter: f64,
    atoms: Vec<Point3<f64>>,
    elements: Vec<LocalElement>,
    arena: EntityArena,
    rng: StdRng,
}

impl SyntheticSystem {
    /// Builds the system described by `settings.system`.
    pub fn build(settings: &Settings) -> Result<Self, BinError> {
        settings.validate()?;
        let spec = &settings.system;
        let a = spec.lattice_constant;

        let block = Vector3::from_fn(|d, _| spec.elements[d] as f64 * spec.element_scale[d] as f64 * a);
        let boxhi = Point3::from(block + Vector3::repeat(2.0 * spec.vacuum));
        let domain = if spec.tilt.iter().any(|&t| t != 0.0) {
            Domain::triclinic(Point3::origin(), boxhi, spec.tilt, spec.periodic)?
        } else {
            Domain::orthogonal(Point3::origin(), boxhi, spec.periodic)?
        };

        let mut rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        // elements laid out in lamda space so that tilted boxes shear them
        let extent = domain.extent();
        let edge = Vector3::from_fn(|d, _| spec.element_scale[d] as f64 * a / extent[d]);
        let vacuum = Vector3::from_fn(|d, _| spec.vacuum / extent[d]);
        let [ex, ey, ez] = spec.elements;
        let elements = iproduct!(0..ez, 0..ey, 0..ex)
            .map(|(k, j, i)| {
                let origin = vacuum
                    + Vector3::new(i as f64 * edge.x, j as f64 * edge.y, k as f64 * edge.z);
                let nodes: Vec<Point3<f64>> = (0..spec.phases)
                    .flat_map(|phase| {
                        let shift = Vector3::repeat(0.5 * a * phase as f64 / spec.phases as f64);
                        let domain = &domain;
                        HEX_SIGNS.iter().map(move |s| {
                            let corner = Vector3::new(
                                (s[0] + 1.0) * 0.5 * edge.x,
                                (s[1] + 1.0) * 0.5 * edge.y,
                                (s[2] + 1.0) * 0.5 * edge.z,
                            );
                            domain.lamda2x(&Point3::from(origin + corner)) + shift
                        })
                    })
                    .collect();
                LocalElement {
                    reference: nodes.clone(),
                    nodes,
                }
            })
            .collect();

        let atoms = (0..spec.atoms)
            .map(|_| {
                let lamda = Point3::new(
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..1.0),
                    rng.random_range(0.0..1.0),
                );
                domain.lamda2x(&lamda)
            })
            .collect();

        let mut system = Self {
            arena: EntityArena::from_settings(settings),
            domain,
            scale: spec.element_scale,
            phases: spec.phases,
            cutneigh: settings.neighbor_cutoff(),
            jitter: spec.jitter,
            atoms,
            elements,
            rng,
        };
        system.assemble()?;
        Ok(system)
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Local entities followed by their ghost images.
    pub fn entities(&self) -> &EntityArena {
        &self.arena
    }

    /// Moves every local node and atom by up to `jitter` per axis, wraps
    /// atoms back into the box and refreshes the ghosts.
    pub fn advance(&mut self) -> Result<(), BinError> {
        let jitter = self.jitter;
        if jitter > 0.0 {
            for atom in self.atoms.iter_mut() {
                *atom += random_offset(&mut self.rng, jitter);
                *atom = self.domain.wrap(atom);
            }
            for element in self.elements.iter_mut() {
                for node in element.nodes.iter_mut() {
                    *node += random_offset(&mut self.rng, jitter);
                }
            }
        }
        self.assemble()
    }

    /// Rebuilds the arena from the local atoms and elements.
    fn assemble(&mut self) -> Result<(), BinError> {
        let mut arena = EntityArena::new(self.arena.max_poly(), self.search_range_factor());

        for atom in &self.atoms {
            arena.add_atom(*atom, Ownership::Local)?;
        }
        for element in &self.elements {
            arena.add_element(NewElement {
                kind: ElementKind::EightNode,
                scale: self.scale,
                poly_count: self.phases,
                nodes: &element.nodes,
                reference: Some(&element.reference),
                ownership: Ownership::Local,
            })?;
        }

        let ghost_cut = self.domain.lamda_cutoff(self.cutneigh + arena.max_search_range());
        let shifts = self.image_shifts();
        let nlocal = arena.len();

        for id in 0..nlocal {
            let lamda = self.domain.x2lamda(&arena.view(id).position);
            for &shift in &shifts {
                let inside = (0..3).all(|d| {
                    let l = lamda[d] + shift[d] as f64;
                    l >= -ghost_cut[d] && l <= 1.0 + ghost_cut[d]
                });
                if !inside {
                    continue;
                }
                if id < self.atoms.len() {
                    let image = self.domain.image(&self.atoms[id], shift);
                    arena.add_atom(image, Ownership::Ghost)?;
                } else {
                    let element = &self.elements[id - self.atoms.len()];
                    let nodes: Vec<Point3<f64>> =
                        element.nodes.iter().map(|n| self.domain.image(n, shift)).collect();
                    let reference: Vec<Point3<f64>> =
                        element.reference.iter().map(|n| self.domain.image(n, shift)).collect();
                    arena.add_element(NewElement {
                        kind: ElementKind::EightNode,
                        scale: self.scale,
                        poly_count: self.phases,
                        nodes: &nodes,
                        reference: Some(&reference),
                        ownership: Ownership::Ghost,
                    })?;
                }
            }
        }

        debug!(
            "assembled {} local and {} ghost entities",
            nlocal,
            arena.len() - nlocal
        );
        self.arena = arena;
        Ok(())
    }

    fn search_range_factor(&self) -> f64 {
        self.arena.search_range_factor()
    }

    /// Whole-box shifts to periodic neighbors, excluding the identity.
    fn image_shifts(&self) -> Vec<[i32; 3]> {
        let axis = |d: usize| -> Vec<i32> {
            if self.domain.periodic[d] {
                vec![-1, 0, 1]
            } else {
                vec![0]
            }
        };
        iproduct!(axis(0), axis(1), axis(2))
            .map(|(x, y, z)| [x, y, z])
            .filter(|shift| *shift != [0, 0, 0])
            .collect()
    }
}

fn random_offset(rng: &mut StdRng, jitter: f64) -> Vector3<f64> {
    Vector3::new(
        rng.random_range(-jitter..jitter),
        rng.random_range(-jitter..jitter),
        rng.random_range(-jitter..jitter),
    )
}

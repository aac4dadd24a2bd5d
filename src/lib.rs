//! Spatial neighbor binning for coupled atomistic-continuum simulations.
//!
//! Atoms and finite elements are mapped onto a uniform cell grid so that
//! neighbor candidates of any position can be read from a handful of cells.
//! Elements are inserted into every cell their inflated bounding box
//! overlaps, and are sampled with quadrature points that are binned like
//! atoms.
//!
//! The entry point is [`index::CellIndex`]: build one from [`settings::Settings`],
//! then call [`index::CellIndex::rebuild`] with a [`domain::Domain`] and an
//! [`entity::EntityArena`] whenever fresh neighbor candidates are needed.

pub mod domain;
pub mod entity;
pub mod error;
pub mod index;
pub mod output;
pub mod overlap;
pub mod partition;
pub mod quadrature;
pub mod sampler;
pub mod settings;
pub mod store;
pub mod system;

//! Failure modes of the binning subsystem.
//!
//! None of these are recoverable during a rebuild. The caller is expected to
//! stop the run and report the message, which names the offending entity
//! whenever one is known.

use thiserror::Error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity() {
        let err = BinError::NonFiniteGeometry { id: Some(17) };
        assert_eq!(
            err.to_string(),
            "non-numeric positions for entity 17, simulation unstable"
        );

        let err = BinError::Configuration {
            id: Some(3),
            reason: "scale must be at least 1 on every axis".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for entity 3: scale must be at least 1 on every axis"
        );
    }

    #[test]
    fn messages_without_entity() {
        let err = BinError::configuration("quadrature order must be 1 or 2");
        assert_eq!(
            err.to_string(),
            "invalid configuration: quadrature order must be 1 or 2"
        );
        let err = BinError::NonFiniteGeometry { id: None };
        assert_eq!(
            err.to_string(),
            "non-numeric positions, simulation unstable"
        );
    }
}

/// Errors raised while partitioning the domain, storing cell contents or
/// sampling elements.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BinError {
    /// The grid needs more cells than the configured safety bound.
    #[error("domain too large for neighbor bins: {cells} cells requested, limit is {limit}")]
    DomainTooLarge { cells: u64, limit: u64 },

    /// The real cell size came out far below the search radius, typically
    /// because of a thin non-periodic dimension. Use an O(N^2) search instead.
    #[error(
        "cannot use neighbor bins along axis {axis}: bin size {bin_size:.6} << search radius {search_radius:.6}"
    )]
    DegenerateBinning {
        axis: usize,
        bin_size: f64,
        search_radius: f64,
    },

    /// Positions or nodes contain NaN or infinity.
    #[error("non-numeric positions{}, simulation unstable", fmt_entity(.id))]
    NonFiniteGeometry { id: Option<usize> },

    /// Zero scale, too many phases, unknown element type or malformed input.
    #[error("invalid configuration{}: {reason}", fmt_entity(.id))]
    Configuration { id: Option<usize>, reason: String },

    /// An entity maps to a cell the current grid does not allocate.
    #[error("entity {id} maps to cell {cell:?}, outside the binned region")]
    OutsideGrid { id: usize, cell: [i32; 3] },

    /// Growing the member list of a cell failed.
    #[error("out of memory growing cell {cell} to {capacity} members")]
    OutOfMemory { cell: usize, capacity: usize },
}

impl BinError {
    /// Configuration error that is not tied to one entity.
    pub fn configuration(reason: impl Into<String>) -> Self {
        BinError::Configuration {
            id: None,
            reason: reason.into(),
        }
    }

    /// Configuration error for entity `id`.
    pub fn entity_configuration(id: usize, reason: impl Into<String>) -> Self {
        BinError::Configuration {
            id: Some(id),
            reason: reason.into(),
        }
    }
}

fn fmt_entity(id: &Option<usize>) -> String {
    match id {
        Some(id) => format!(" for entity {}", id),
        None => String::new(),
    }
}

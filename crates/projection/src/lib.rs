//! Coordinate reference system transformations.
//!
//! Implements the map projections used by the NAM grids from scratch,
//! without external projection libraries.

pub mod lambert;

pub use lambert::{normalize_degrees, LambertConformal, LambertGrid, NCEP_EARTH_RADIUS};

/// Errors raised when a projection cannot be constructed.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Invalid projection parameter: {0}")]
    InvalidParameter(String),
}

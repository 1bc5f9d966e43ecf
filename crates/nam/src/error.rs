//! Error types for the NAM loader.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while acquiring or assembling NAM data.
#[derive(Error, Debug)]
pub enum NamError {
    /// The reference time text matched none of the accepted formats.
    #[error("invalid reference time {input:?}: expected e.g. \"20200301 1200\" or \"2020-03-01T12:00\"")]
    InvalidTimeFormat { input: String },

    /// A download failed after exhausting its attempts.
    #[error("download of {url} failed after {attempts} attempts: {reason}")]
    Download {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// The run is only published in a format that cannot be decoded.
    #[error("run {reftime} is only archived as GRIB1 at {url}, which cannot be decoded")]
    UndecodableSource { reftime: String, url: String },

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage/IO error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// A raw grid file could not be decoded.
    #[error("failed to decode {path}: {source}")]
    Grib2 {
        path: PathBuf,
        #[source]
        source: grib2_parser::Grib2Error,
    },

    /// Projection setup error.
    #[error("projection error: {0}")]
    Projection(#[from] projection::ProjectionError),

    /// The subset window does not fit inside the grid.
    #[error("subset window rows {rows:?} cols {cols:?} exceeds grid of {ny}x{nx}")]
    SubsetOutOfBounds {
        rows: (i64, i64),
        cols: (i64, i64),
        ny: usize,
        nx: usize,
    },

    /// Records of one variable disagree on their grid.
    #[error("grid mismatch in {name}: {reason}")]
    GridMismatch { name: String, reason: String },

    /// No records were produced.
    #[error("no grid records to assemble")]
    Empty,

    /// Zarr cache error.
    #[error("cache error: {0}")]
    Cache(String),

    /// A blocking task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl NamError {
    /// Create a Cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a GridMismatch error.
    pub fn grid_mismatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GridMismatch {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for NAM operations.
pub type Result<T> = std::result::Result<T, NamError>;

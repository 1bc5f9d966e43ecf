//! Acquisition and reassembly of NAM-NMM 218 forecast runs.
//!
//! A run is identified by its [`ReferenceTime`]. Loading a run downloads one
//! GRIB2 file per forecast hour, decodes the wanted fields, cuts a square
//! window around a point of interest, and reassembles everything into a
//! [`Dataset`] of `[forecast, level, y, x]` variables on Lambert Conformal
//! coordinates. Assembled datasets are cached as Zarr next to the raw files.
//!
//! ```no_run
//! # async fn run() -> nam::Result<()> {
//! use nam::{LoadOptions, ReferenceTime};
//!
//! let reftime = ReferenceTime::parse("20200301 1200")?;
//! let dataset = nam::load(reftime, "./NAM-NMM", &LoadOptions::default()).await?;
//! for name in dataset.names() {
//!     println!("{}", name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dataset;
pub mod decode;
pub mod download;
pub mod error;
pub mod loader;
pub mod projector;
pub mod reassemble;
pub mod reftime;
pub mod subset;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::{DownloadPolicy, GeoSubset, NamConfig, ProjectionConfig};
pub use dataset::{Dataset, LevelAxis, Variable};
pub use decode::{GridRecord, LatLonGrid, LayerType, RecordDecoder};
pub use download::{DownloadOutcome, Downloader};
pub use error::{NamError, Result};
pub use loader::{LoadOptions, NamLoader};
pub use projector::{PlanarAxes, Projector};
pub use reftime::{ReferenceTime, RemoteSource};
pub use subset::{nearest_index, SubsetWindow, Subsetter};

/// Load one run with the default configuration.
pub async fn load(
    reftime: ReferenceTime,
    data_dir: impl Into<PathBuf>,
    options: &LoadOptions,
) -> Result<Dataset> {
    NamLoader::new(Arc::new(NamConfig::default()), reftime, data_dir)
        .load(options)
        .await
}

//! Planar y/x axes of the NAM Lambert Conformal grid.

use std::sync::Arc;

use projection::LambertConformal;

use crate::config::ProjectionConfig;
use crate::decode::LatLonGrid;
use crate::error::Result;

/// Projected coordinates in meters: `y` per row, `x` per column.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarAxes {
    pub y: Vec<f64>,
    pub x: Vec<f64>,
}

/// Projects grids into the dataset's native plane.
///
/// Rows and columns are treated as axis-aligned: `y` comes from the first
/// column and `x` from the first row.
pub struct Projector {
    config: ProjectionConfig,
    lcc: LambertConformal,
    memo: Option<(Arc<LatLonGrid>, Arc<PlanarAxes>)>,
}

impl Projector {
    pub fn new(config: &ProjectionConfig) -> Result<Self> {
        let lcc = LambertConformal::new(
            config.latitude_of_projection_origin,
            config.longitude_of_central_meridian,
            config.standard_parallel,
            config.standard_parallel,
            config.earth_radius,
        )?;
        Ok(Self {
            config: config.clone(),
            lcc,
            memo: None,
        })
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn projection(&self) -> &LambertConformal {
        &self.lcc
    }

    /// Axes of `grid`, reusing the last result when the grid is shared.
    pub fn axes(&mut self, grid: &Arc<LatLonGrid>) -> Arc<PlanarAxes> {
        if let Some((source, axes)) = &self.memo {
            if Arc::ptr_eq(source, grid) {
                return Arc::clone(axes);
            }
        }
        let axes = Arc::new(self.project(grid));
        self.memo = Some((Arc::clone(grid), Arc::clone(&axes)));
        axes
    }

    /// Axes of `grid`, computed afresh.
    pub fn project(&self, grid: &LatLonGrid) -> PlanarAxes {
        let (ny, nx) = grid.shape();
        let y = (0..ny)
            .map(|j| self.lcc.project(grid.lat[[j, 0]], grid.lon[[j, 0]]).1)
            .collect();
        let x = (0..nx)
            .map(|i| self.lcc.project(grid.lat[[0, i]], grid.lon[[0, i]]).0)
            .collect();
        PlanarAxes { y, x }
    }
}

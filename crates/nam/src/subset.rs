//! Square geographic windows around a target coordinate.

use std::sync::Arc;

use ndarray::{s, Array2};
use tracing::debug;

use crate::config::GeoSubset;
use crate::decode::{GridRecord, LatLonGrid};
use crate::error::{NamError, Result};

/// Index of the cell nearest `(lat, lon)`, measured as Euclidean distance
/// in degrees. Ties go to the first cell in row-major order; cells with
/// NaN coordinates never match.
pub fn nearest_index(grid: &LatLonGrid, lat: f64, lon: f64) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), f64)> = None;
    for ((idx, &cell_lat), &cell_lon) in grid.lat.indexed_iter().zip(grid.lon.iter()) {
        let d = (cell_lat - lat).powi(2) + (cell_lon - lon).powi(2);
        if d.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, min)| d < min) {
            best = Some((idx, d));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Rows `row_start..row_end` and columns `col_start..col_end` of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsetWindow {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl SubsetWindow {
    /// The `(2 * apothem + 1)`-cell square centered on the cell nearest
    /// `center`. Fails when the square does not fit inside the grid.
    pub fn around(grid: &LatLonGrid, center: (f64, f64), apothem: usize) -> Result<Self> {
        let (ny, nx) = grid.shape();
        let a = apothem as i64;
        let (row, col) = nearest_index(grid, center.0, center.1).ok_or_else(|| {
            NamError::SubsetOutOfBounds {
                rows: (-a, a),
                cols: (-a, a),
                ny,
                nx,
            }
        })?;

        let rows = (row as i64 - a, row as i64 + a);
        let cols = (col as i64 - a, col as i64 + a);
        if rows.0 < 0 || cols.0 < 0 || rows.1 >= ny as i64 || cols.1 >= nx as i64 {
            return Err(NamError::SubsetOutOfBounds { rows, cols, ny, nx });
        }

        debug!(
            center_row = row,
            center_col = col,
            apothem = apothem,
            "Computed subset window"
        );
        Ok(Self {
            row_start: rows.0 as usize,
            row_end: rows.1 as usize + 1,
            col_start: cols.0 as usize,
            col_end: cols.1 as usize + 1,
        })
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.row_end - self.row_start, self.col_end - self.col_start)
    }

    pub fn apply<T: Clone>(&self, values: &Array2<T>) -> Array2<T> {
        values
            .slice(s![self.row_start..self.row_end, self.col_start..self.col_end])
            .to_owned()
    }

    pub fn apply_grid(&self, grid: &LatLonGrid) -> LatLonGrid {
        LatLonGrid {
            lat: self.apply(&grid.lat),
            lon: self.apply(&grid.lon),
        }
    }
}

/// Applies one [`GeoSubset`] to a stream of records.
///
/// The window is recomputed only when a record arrives on a grid not seen
/// before; records sharing a grid keep sharing the subsetted grid.
pub struct Subsetter {
    subset: GeoSubset,
    last: Option<(Arc<LatLonGrid>, SubsetWindow, Arc<LatLonGrid>)>,
}

impl Subsetter {
    pub fn new(subset: GeoSubset) -> Self {
        Self { subset, last: None }
    }

    pub fn apply(&mut self, mut record: GridRecord) -> Result<GridRecord> {
        let cached = match &self.last {
            Some((source, window, subset)) if Arc::ptr_eq(source, &record.grid) => {
                Some((*window, Arc::clone(subset)))
            }
            _ => None,
        };

        let (window, grid) = match cached {
            Some(hit) => hit,
            None => {
                let window =
                    SubsetWindow::around(&record.grid, self.subset.center, self.subset.apothem)?;
                let grid = Arc::new(window.apply_grid(&record.grid));
                self.last = Some((Arc::clone(&record.grid), window, Arc::clone(&grid)));
                (window, grid)
            }
        };

        if record.values.dim() != record.grid.shape() {
            return Err(NamError::grid_mismatch(
                record.name(),
                format!(
                    "values {:?} vs grid {:?}",
                    record.values.dim(),
                    record.grid.shape()
                ),
            ));
        }
        record.values = window.apply(&record.values);
        record.grid = grid;
        Ok(record)
    }
}

//! Test data generators for creating synthetic weather-like data.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that grid[row][col] == col * 1000 + row.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[0], 0.0);
/// assert_eq!(grid[1], 1000.0);
/// assert_eq!(grid[10], 1.0);
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates a test grid with temperature-like values in Kelvin.
///
/// Values run from 250K in the first cell towards 310K in the last,
/// shifted by `offset` so that different levels or hours are told apart.
pub fn create_temperature_grid(width: usize, height: usize, offset: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f32 / width.max(1) as f32;
            let y_factor = row as f32 / height.max(1) as f32;
            data.push(250.0 + offset + x_factor * 30.0 + y_factor * 30.0);
        }
    }
    data
}

/// Creates a grid of downward short-wave flux values in W/m².
///
/// Zero on the first row, rising linearly to `peak` on the last.
pub fn create_radiation_grid(width: usize, height: usize, peak: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let factor = row as f32 / (height.max(2) - 1) as f32;
        for _ in 0..width {
            data.push(peak * factor);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(3, 2);
        assert_eq!(grid, vec![0.0, 1000.0, 2000.0, 1.0, 1001.0, 2001.0]);
    }

    #[test]
    fn test_temperature_grid_range() {
        let grid = create_temperature_grid(10, 10, 0.0);
        assert_eq!(grid[0], 250.0);
        assert!(grid.iter().all(|t| (250.0..310.0).contains(t)));
    }

    #[test]
    fn test_radiation_grid_rows() {
        let grid = create_radiation_grid(4, 5, 800.0);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[19], 800.0);
    }
}

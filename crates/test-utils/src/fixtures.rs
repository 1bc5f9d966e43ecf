//! Common test fixtures for NAM loader tests.
//!
//! This module provides pre-defined test data that represents common
//! scenarios in NAM data processing.

use crate::{concat_messages, create_radiation_grid, create_temperature_grid, Grib2Builder};

/// Named locations inside the NAM 218 domain.
pub mod places {
    /// Macon, GA, the default subset center
    pub const MACON: (f64, f64) = (32.8, -83.6);

    /// Boulder, CO
    pub const BOULDER: (f64, f64) = (40.015, -105.27);
}

/// Common time values for testing.
pub mod time {
    /// The 2020-03-01 12Z run in the loader's text format
    pub const NAM_REFTIME: &str = "20200301 1200";

    /// Same run, ISO-like form
    pub const NAM_REFTIME_ISO: &str = "2020-03-01T12:00";

    /// NAM cycles
    pub const NAM_CYCLES: [u32; 4] = [0, 6, 12, 18];
}

/// Grid edge length of the synthetic NAM files.
pub const SYNTHETIC_GRID: u32 = 20;

/// Messages of one synthetic NAM forecast file.
///
/// Contents, on a 20x20 patch centered on Macon for the 2020-03-01 12Z run:
/// - `t` on 500 and 850 hPa
/// - `r` on 850 hPa
/// - `2r` (relative humidity at 2 m)
/// - `dswrf` at the surface, template 4.8, absent from the analysis hour
/// - `tcc` on the entire atmosphere and on NCEP local surface 214
pub fn nam_messages(forecast: u32) -> Vec<Vec<u8>> {
    let n = SYNTHETIC_GRID as usize;
    let base = Grib2Builder::nam()
        .with_grid(SYNTHETIC_GRID, SYNTHETIC_GRID)
        .with_forecast_hour(forecast);

    let mut messages = Vec::new();
    for hpa in [500, 850] {
        messages.push(
            base.clone()
                .with_parameter(0, 0, 0)
                .with_isobaric(hpa)
                .with_data(create_temperature_grid(n, n, forecast as f32 + hpa as f32 / 100.0))
                .build(),
        );
    }
    messages.push(
        base.clone()
            .with_parameter(0, 1, 1)
            .with_isobaric(850)
            .with_gradient(10.0, 90.0)
            .build(),
    );
    messages.push(
        base.clone()
            .with_parameter(0, 1, 1)
            .with_level(103, 0, 2)
            .with_gradient(20.0, 80.0)
            .build(),
    );
    if forecast > 0 {
        messages.push(
            base.clone()
                .with_parameter(0, 4, 192)
                .with_level(1, 0, 0)
                .with_time_interval()
                .with_data(create_radiation_grid(n, n, 10.0 * forecast as f32))
                .build(),
        );
    }
    messages.push(
        base.clone()
            .with_parameter(0, 6, 1)
            .with_level(200, 0, 0)
            .with_constant_value(50.0)
            .build(),
    );
    messages.push(
        base.with_parameter(0, 6, 1)
            .with_level(214, 0, 0)
            .with_constant_value(25.0)
            .build(),
    );
    messages
}

/// One synthetic NAM forecast file; see [`nam_messages`].
pub fn nam_file(forecast: u32) -> Vec<u8> {
    concat_messages(&nam_messages(forecast))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_hour_has_no_radiation() {
        assert_eq!(nam_messages(0).len(), 6);
        assert_eq!(nam_messages(1).len(), 7);
    }

    #[test]
    fn test_nam_file_is_concatenation() {
        let messages = nam_messages(3);
        let total: usize = messages.iter().map(Vec::len).sum();
        assert_eq!(nam_file(3).len(), total);
    }
}

//! Loader configuration.
//!
//! [`NamConfig::default`] carries the constants of the operational NAM-NMM
//! 218 product; a YAML file can override any part of it.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{NamError, Result};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamConfig {
    pub source: SourceConfig,
    pub local: LocalConfig,
    /// Forecast offsets in hours, one raw file each
    pub forecast_hours: Vec<u32>,
    /// Features extracted when the caller gives no allow-list
    pub default_features: Vec<String>,
    /// Geographic subset applied when the caller gives none
    pub default_subset: Option<GeoSubset>,
    pub download: DownloadPolicy,
    pub projection: ProjectionConfig,
}

/// Remote URL templates.
///
/// Placeholders: `{date}` (YYYYMMDD), `{yearmonth}` (YYYYMM), `{cycle:02}`,
/// `{forecast:02}` and `{forecast:03}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Production source, holding the most recent runs
    pub production_url: String,
    /// Archive source for runs before `archive_cutoff`
    pub archive_url: String,
    /// Archive source for runs from `archive_cutoff` on
    pub archive_grib2_url: String,
    pub archive_cutoff: DateTime<Utc>,
    /// Runs at most this many whole days old are fetched from production
    pub production_retention_days: i64,
}

/// Local file name templates, relative to the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub grib_template: String,
    pub cache_template: String,
}

/// Square window of `2 * apothem + 1` cells around the cell nearest `center`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoSubset {
    /// (latitude, longitude) in degrees
    pub center: (f64, f64),
    pub apothem: usize,
}

/// Retry policy for downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    pub max_tries: u32,
    pub timeout_secs: u64,
    /// Delay before the first retry; doubles on every further retry
    pub initial_retry_delay_secs: f64,
}

/// CF grid mapping of the NAM grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub grid_mapping_name: String,
    pub latitude_of_projection_origin: f64,
    pub longitude_of_central_meridian: f64,
    pub standard_parallel: f64,
    pub earth_radius: f64,
}

impl Default for NamConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            local: LocalConfig::default(),
            forecast_hours: nam_forecast_hours(),
            default_features: DEFAULT_FEATURES.iter().map(|f| f.to_string()).collect(),
            default_subset: Some(GeoSubset::default()),
            download: DownloadPolicy::default(),
            projection: ProjectionConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            production_url: "https://nomads.ncep.noaa.gov/pub/data/nccf/com/nam/prod/nam.{date}/nam.t{cycle:02}z.awphys{forecast:02}.tm00.grib2".to_string(),
            archive_url: "https://nomads.ncdc.noaa.gov/data/meso-eta-hi/{yearmonth}/{date}/nam_218_{date}_{cycle:02}00_{forecast:03}.grb".to_string(),
            archive_grib2_url: "https://nomads.ncdc.noaa.gov/data/meso-eta-hi/{yearmonth}/{date}/nam_218_{date}_{cycle:02}00_{forecast:03}.grb2".to_string(),
            archive_cutoff: Utc.with_ymd_and_hms(2017, 4, 1, 0, 0, 0).single().unwrap_or_default(),
            production_retention_days: 7,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            grib_template: "nam.{date}/nam.t{cycle:02}z.awphys{forecast:02}.tm00.grib2".to_string(),
            cache_template: "nam.{date}/nam.t{cycle:02}z.awphys.tm00.zarr".to_string(),
        }
    }
}

impl Default for GeoSubset {
    fn default() -> Self {
        Self {
            center: (32.8, -83.6),
            apothem: 50,
        }
    }
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_tries: 8,
            timeout_secs: 10,
            initial_retry_delay_secs: 1.0,
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            grid_mapping_name: "lambert_conformal_conic".to_string(),
            latitude_of_projection_origin: 25.0,
            longitude_of_central_meridian: 265.0,
            standard_parallel: 25.0,
            earth_radius: projection::NCEP_EARTH_RADIUS,
        }
    }
}

impl NamConfig {
    /// Load a configuration from a YAML file. Missing keys keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path)
            .map_err(|e| NamError::config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&content)
            .map_err(|e| NamError::config(format!("{}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            forecast_hours = config.forecast_hours.len(),
            features = config.default_features.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| NamError::config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.download.max_tries == 0 {
            return Err(NamError::config("download.max_tries must be at least 1"));
        }
        if self.download.initial_retry_delay_secs < 0.0 {
            return Err(NamError::config(
                "download.initial_retry_delay_secs must not be negative",
            ));
        }
        if self.forecast_hours.is_empty() {
            return Err(NamError::config("forecast_hours must not be empty"));
        }
        if self.projection.earth_radius <= 0.0 {
            return Err(NamError::config("projection.earth_radius must be positive"));
        }
        Ok(())
    }
}

/// The NAM-NMM forecast schedule: hourly to 35, then every 3 hours to 84.
pub fn nam_forecast_hours() -> Vec<u32> {
    (0..36).chain((36..=84).step_by(3)).collect()
}

/// Features extracted by default.
pub const DEFAULT_FEATURES: &[&str] = &[
    "dlwrf", "dswrf", "pres", "vis", "tcc", "t", "r", "u", "v", "w",
];

/// Description of a NAM feature code, if known.
pub fn feature_description(code: &str) -> Option<&'static str> {
    FEATURES
        .binary_search_by(|(c, _)| (*c).cmp(code))
        .ok()
        .map(|i| FEATURES[i].1)
}

/// NAM-NMM feature codes and their descriptions, sorted by code.
pub const FEATURES: &[(&str, &str)] = &[
    ("10u", "10 metre U wind component"),
    ("10v", "10 metre V wind component"),
    ("2d", "2 metre dewpoint temperature"),
    ("2r", "Surface air relative humidity"),
    ("2t", "2 metre temperature"),
    ("4lftx", "Best (4-layer) lifted index"),
    ("VRATE", "Ventilation Rate"),
    ("absv", "Absolute vorticity"),
    ("acpcp", "Convective precipitation (water)"),
    ("al", "Albedo"),
    ("bmixl", "Blackadar mixing length scale"),
    ("cape", "Convective available potential energy"),
    ("cd", "Drag coefficient"),
    ("cfrzr", "Categorical freezing rain"),
    ("ci", "Sea-ice cover"),
    ("cicep", "Categorical ice pellets"),
    ("cin", "Convective inhibition"),
    ("cnwat", "Plant canopy surface water"),
    ("crain", "Categorical rain"),
    ("csnow", "Categorical snow"),
    ("dlwrf", "Downward long-wave radiation flux"),
    ("dswrf", "Downward short-wave radiation flux"),
    ("fricv", "Frictional velocity"),
    ("gh", "Geopotential Height"),
    ("gust", "Wind speed (gust)"),
    ("hindex", "Haines Index"),
    ("hlcy", "Storm relative helicity"),
    ("hpbl", "Planetary boundary layer height"),
    ("lftx", "Surface lifted index"),
    ("lhtfl", "Latent heat net flux"),
    ("lsm", "Land-sea mask"),
    ("ltng", "Lightning"),
    ("maxrh", "Maximum relative humidity"),
    ("minrh", "Minimum Relative Humidity"),
    ("mslet", "MSLP (Eta model reduction)"),
    ("mstav", "Moisture availability"),
    ("orog", "Orography"),
    ("pli", "Parcel lifted index (to 500 hPa)"),
    ("poros", "Soil porosity"),
    ("pres", "Pressure"),
    ("prmsl", "Pressure reduced to MSL"),
    ("pwat", "Precipitable water"),
    ("q", "Specific humidity"),
    ("r", "Relative humidity"),
    ("refc", "Maximum/Composite radar reflectivity"),
    ("refd", "Derived radar reflectivity"),
    ("rlyrs", "Number of soil layers in root zone"),
    ("sde", "Snow depth"),
    ("sdwe", "Water equivalent of accumulated snow depth"),
    ("shtfl", "Sensible heat net flux"),
    ("slt", "Soil type"),
    ("smdry", "Direct evaporation cease (soil moisture)"),
    ("smref", "Transpiration stress-onset (soil moisture)"),
    ("snowc", "Snow cover"),
    ("soill", "Liquid volumetric soil moisture (non-frozen)"),
    ("soilw", "Volumetric soil moisture content"),
    ("sp", "Surface pressure"),
    ("sr", "Surface roughness"),
    ("ssw", "Soil moisture content"),
    ("st", "Soil Temperature"),
    ("t", "Temperature"),
    ("tcc", "Total Cloud Cover"),
    ("tke", "Turbulent kinetic energy"),
    ("tmax", "Maximum temperature"),
    ("tmin", "Minimum temperature"),
    ("tp", "Total Precipitation"),
    ("u", "U component of wind"),
    ("ulwrf", "Upward long-wave radiation flux"),
    ("uswrf", "Upward short-wave radiation flux"),
    ("v", "V component of wind"),
    ("veg", "Vegetation"),
    ("vgtyp", "Vegetation Type"),
    ("vis", "Visibility"),
    ("vucsh", "Vertical u-component shear"),
    ("vvcsh", "Vertical v-component shear"),
    ("w", "Vertical velocity"),
    ("wilt", "Wilting Point"),
    ("wz", "Geometric vertical velocity"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_schedule() {
        let hours = nam_forecast_hours();
        assert_eq!(hours.len(), 53);
        assert_eq!(hours[..3], [0, 1, 2]);
        assert_eq!(hours[35], 35);
        assert_eq!(hours[36], 36);
        assert_eq!(hours[37], 39);
        assert_eq!(*hours.last().unwrap(), 84);
    }

    #[test]
    fn test_feature_table_is_sorted() {
        assert!(FEATURES.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(feature_description("t"), Some("Temperature"));
        assert_eq!(feature_description("2r"), Some("Surface air relative humidity"));
        assert_eq!(feature_description("nope"), None);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
download:
  max_tries: 3
default_features: [t, dswrf]
"#;
        let config = NamConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.download.max_tries, 3);
        assert_eq!(config.download.timeout_secs, 10);
        assert_eq!(config.default_features, vec!["t", "dswrf"]);
        assert_eq!(config.forecast_hours.len(), 53);
        assert_eq!(config.projection, ProjectionConfig::default());
    }

    #[test]
    fn test_yaml_subset() {
        let yaml = "default_subset:\n  center: [40.0, -105.0]\n  apothem: 3\n";
        let config = NamConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.default_subset,
            Some(GeoSubset {
                center: (40.0, -105.0),
                apothem: 3
            })
        );

        let config = NamConfig::from_yaml("default_subset: null\n").unwrap();
        assert!(config.default_subset.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(NamConfig::from_yaml("download:\n  max_tries: 0\n").is_err());
        assert!(NamConfig::from_yaml("forecast_hours: []\n").is_err());
        assert!(NamConfig::from_yaml("forecast_hours: nope\n").is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = include_str!("../../../config/nam.yaml");
        assert_eq!(NamConfig::from_yaml(shipped).unwrap(), NamConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nam.yaml");
        std::fs::write(&path, "download:\n  timeout_secs: 30\n").unwrap();
        let config = NamConfig::load(&path).unwrap();
        assert_eq!(config.download.timeout_secs, 30);

        assert!(matches!(
            NamConfig::load(&dir.path().join("missing.yaml")),
            Err(NamError::Config(_))
        ));
    }
}

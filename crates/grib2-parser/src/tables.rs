//! GRIB2 parameter and level lookup tables.
//!
//! Translates the numeric codes of sections 4 into the ecCodes-style names
//! used throughout the NAM tooling: feature short names (`t`, `dswrf`,
//! `2t`, ...) and `typeOfLevel` names (`isobaricInhPa`,
//! `heightAboveGround`, ...).
//!
//! Surface types with no registered name are reported as `None`; callers
//! decide how to label them.

use std::collections::HashMap;

/// Lookup key for parameter: (discipline, category, number)
pub type ParamKey = (u8, u8, u8);

/// Description of a GRIB2 parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// ecCodes short name (e.g., "t", "dswrf")
    pub short_name: String,
    /// Human readable name (e.g., "Temperature")
    pub name: String,
    /// Physical units (e.g., "K")
    pub units: String,
}

/// Description of a fixed surface type (GRIB2 code table 4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct LevelInfo {
    /// ecCodes `typeOfLevel` name
    pub type_of_level: String,
    /// Units of the reported level value
    pub units: String,
    /// The decoded surface value is divided by this before reporting
    /// (100 turns Pa into hPa for isobaric levels)
    pub divisor: f64,
}

/// GRIB2 parameter and level lookup tables.
#[derive(Debug, Clone, Default)]
pub struct Grib2Tables {
    /// (discipline, category, number) -> parameter description
    parameters: HashMap<ParamKey, ParameterInfo>,
    /// (discipline, category, number, level_type, scaled level) -> short name
    overrides: HashMap<(ParamKey, u8, i64), String>,
    /// level_type -> level description
    levels: HashMap<u8, LevelInfo>,
}

impl Grib2Tables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables covering the NCEP NAM-NMM products.
    pub fn ncep() -> Self {
        let mut tables = Self::new();

        for &(discipline, category, number, short, name, units) in NCEP_PARAMETERS {
            tables.add_parameter(discipline, category, number, short, name, units);
        }

        for &(discipline, category, number, level_type, level, short) in NCEP_OVERRIDES {
            tables.add_override((discipline, category, number), level_type, level, short);
        }

        for &(level_type, type_of_level, units, divisor) in NCEP_LEVELS {
            tables.add_level(
                level_type,
                LevelInfo {
                    type_of_level: type_of_level.to_string(),
                    units: units.to_string(),
                    divisor,
                },
            );
        }

        tables
    }

    /// Add a parameter mapping
    ///
    /// # Arguments
    /// * `discipline` - GRIB2 discipline code
    /// * `category` - Parameter category within discipline
    /// * `number` - Parameter number within category
    /// * `short_name` - ecCodes short name (e.g., "t")
    /// * `name` - Long name
    /// * `units` - Physical units
    pub fn add_parameter(
        &mut self,
        discipline: u8,
        category: u8,
        number: u8,
        short_name: &str,
        name: &str,
        units: &str,
    ) {
        self.parameters.insert(
            (discipline, category, number),
            ParameterInfo {
                short_name: short_name.to_string(),
                name: name.to_string(),
                units: units.to_string(),
            },
        );
    }

    /// Register a level-specific short name, e.g. temperature at 2 m is `2t`.
    pub fn add_override(&mut self, key: ParamKey, level_type: u8, level: i64, short_name: &str) {
        self.overrides
            .insert((key, level_type, level), short_name.to_string());
    }

    /// Add a level description mapping
    pub fn add_level(&mut self, level_type: u8, info: LevelInfo) {
        self.levels.insert(level_type, info);
    }

    /// Look up a parameter by GRIB2 codes.
    ///
    /// Unknown parameters get a synthesized entry named `p<d>_<c>_<n>`.
    pub fn parameter(&self, discipline: u8, category: u8, number: u8) -> ParameterInfo {
        self.parameters
            .get(&(discipline, category, number))
            .cloned()
            .unwrap_or_else(|| ParameterInfo {
                short_name: format!("p{}_{}_{}", discipline, category, number),
                name: format!(
                    "Parameter {} of category {} in discipline {}",
                    number, category, discipline
                ),
                units: "unknown".to_string(),
            })
    }

    /// Short name for a parameter at a given level, honoring overrides.
    pub fn short_name(&self, key: ParamKey, level_type: u8, level: f64) -> String {
        if level.fract() == 0.0 {
            if let Some(name) = self.overrides.get(&(key, level_type, level as i64)) {
                return name.clone();
            }
        }
        self.parameter(key.0, key.1, key.2).short_name
    }

    /// Look up the level description for a surface type.
    pub fn level(&self, level_type: u8) -> Option<&LevelInfo> {
        self.levels.get(&level_type)
    }

    /// Number of registered parameters.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

/// (discipline, category, number, short name, name, units)
const NCEP_PARAMETERS: &[(u8, u8, u8, &str, &str, &str)] = &[
    // Temperature
    (0, 0, 0, "t", "Temperature", "K"),
    (0, 0, 4, "tmax", "Maximum temperature", "K"),
    (0, 0, 5, "tmin", "Minimum temperature", "K"),
    (0, 0, 6, "dpt", "Dew point temperature", "K"),
    (0, 0, 10, "lhtfl", "Latent heat net flux", "W m**-2"),
    (0, 0, 11, "shtfl", "Sensible heat net flux", "W m**-2"),
    // Moisture
    (0, 1, 0, "q", "Specific humidity", "kg kg**-1"),
    (0, 1, 1, "r", "Relative humidity", "%"),
    (0, 1, 3, "pwat", "Precipitable water", "kg m**-2"),
    (0, 1, 8, "tp", "Total Precipitation", "kg m**-2"),
    (0, 1, 10, "acpcp", "Convective precipitation (water)", "kg m**-2"),
    (0, 1, 11, "sde", "Snow depth", "m"),
    (0, 1, 13, "sdwe", "Water equivalent of accumulated snow depth", "kg m**-2"),
    (0, 1, 27, "maxrh", "Maximum relative humidity", "%"),
    (0, 1, 28, "minrh", "Minimum Relative Humidity", "%"),
    (0, 1, 42, "snowc", "Snow cover", "%"),
    (0, 1, 192, "crain", "Categorical rain", "Code table 4.222"),
    (0, 1, 193, "cfrzr", "Categorical freezing rain", "Code table 4.222"),
    (0, 1, 194, "cicep", "Categorical ice pellets", "Code table 4.222"),
    (0, 1, 195, "csnow", "Categorical snow", "Code table 4.222"),
    // Momentum
    (0, 2, 2, "u", "U component of wind", "m s**-1"),
    (0, 2, 3, "v", "V component of wind", "m s**-1"),
    (0, 2, 8, "w", "Vertical velocity", "Pa s**-1"),
    (0, 2, 9, "wz", "Geometric vertical velocity", "m s**-1"),
    (0, 2, 10, "absv", "Absolute vorticity", "s**-1"),
    (0, 2, 22, "gust", "Wind speed (gust)", "m s**-1"),
    (0, 2, 29, "cd", "Drag coefficient", "Numeric"),
    (0, 2, 30, "fricv", "Frictional velocity", "m s**-1"),
    (0, 2, 192, "vvcsh", "Vertical v-component shear", "s**-1"),
    (0, 2, 193, "vucsh", "Vertical u-component shear", "s**-1"),
    // Mass
    (0, 3, 0, "pres", "Pressure", "Pa"),
    (0, 3, 1, "prmsl", "Pressure reduced to MSL", "Pa"),
    (0, 3, 5, "gh", "Geopotential Height", "gpm"),
    (0, 3, 18, "hpbl", "Planetary boundary layer height", "m"),
    (0, 3, 192, "mslet", "MSLP (Eta model reduction)", "Pa"),
    // Short-wave radiation
    (0, 4, 192, "dswrf", "Downward short-wave radiation flux", "W m**-2"),
    (0, 4, 193, "uswrf", "Upward short-wave radiation flux", "W m**-2"),
    // Long-wave radiation
    (0, 5, 192, "dlwrf", "Downward long-wave radiation flux", "W m**-2"),
    (0, 5, 193, "ulwrf", "Upward long-wave radiation flux", "W m**-2"),
    // Cloud
    (0, 6, 1, "tcc", "Total Cloud Cover", "%"),
    // Stability
    (0, 7, 6, "cape", "Convective available potential energy", "J kg**-1"),
    (0, 7, 7, "cin", "Convective inhibition", "J kg**-1"),
    (0, 7, 8, "hlcy", "Storm relative helicity", "m**2 s**-2"),
    (0, 7, 192, "lftx", "Surface lifted index", "K"),
    (0, 7, 193, "4lftx", "Best (4-layer) lifted index", "K"),
    (0, 7, 2, "hindex", "Haines Index", "Numeric"),
    // Radar
    (0, 16, 195, "refd", "Derived radar reflectivity", "dB"),
    (0, 16, 196, "refc", "Maximum/Composite radar reflectivity", "dB"),
    // Electrodynamics
    (0, 17, 192, "ltng", "Lightning", "non-dim"),
    // Physical atmospheric properties
    (0, 19, 0, "vis", "Visibility", "m"),
    (0, 19, 1, "al", "Albedo", "%"),
    (0, 19, 11, "tke", "Turbulent kinetic energy", "J kg**-1"),
    (0, 19, 12, "bmixl", "Blackadar mixing length scale", "m"),
    // Land surface
    (2, 0, 0, "lsm", "Land-sea mask", "(0 - 1)"),
    (2, 0, 1, "sr", "Surface roughness", "m"),
    (2, 0, 4, "veg", "Vegetation", "%"),
    (2, 0, 7, "orog", "Orography", "m"),
    (2, 0, 13, "cnwat", "Plant canopy surface water", "kg m**-2"),
    (2, 0, 192, "soilw", "Volumetric soil moisture content", "Proportion"),
    (2, 0, 198, "vgtyp", "Vegetation Type", "Integer(0-13)"),
    (2, 0, 2, "st", "Soil Temperature", "K"),
    (2, 3, 0, "slt", "Soil type", "(Code table 4.213)"),
    (2, 3, 192, "soill", "Liquid volumetric soil moisture (non-frozen)", "Proportion"),
    // Sea ice
    (10, 2, 0, "ci", "Sea-ice cover", "(0 - 1)"),
];

/// (discipline, category, number, level type, level, short name)
const NCEP_OVERRIDES: &[(u8, u8, u8, u8, i64, &str)] = &[
    (0, 0, 0, 103, 2, "2t"),
    (0, 0, 6, 103, 2, "2d"),
    (0, 1, 1, 103, 2, "2r"),
    (0, 2, 2, 103, 10, "10u"),
    (0, 2, 3, 103, 10, "10v"),
    (0, 3, 0, 1, 0, "sp"),
];

/// (level type, typeOfLevel, units, divisor)
const NCEP_LEVELS: &[(u8, &str, &str, f64)] = &[
    (1, "surface", "unknown", 1.0),
    (2, "cloudBase", "unknown", 1.0),
    (3, "cloudTop", "unknown", 1.0),
    (4, "isothermZero", "unknown", 1.0),
    (5, "adiabaticCondensation", "unknown", 1.0),
    (6, "maxWind", "unknown", 1.0),
    (7, "tropopause", "unknown", 1.0),
    (8, "nominalTop", "unknown", 1.0),
    (10, "entireAtmosphere", "unknown", 1.0),
    (20, "isothermal", "K", 1.0),
    (100, "isobaricInhPa", "hPa", 100.0),
    (101, "meanSea", "unknown", 1.0),
    (102, "heightAboveSea", "m", 1.0),
    (103, "heightAboveGround", "m", 1.0),
    (104, "sigma", "sigma", 1.0),
    (105, "hybrid", "unknown", 1.0),
    (106, "depthBelowLandLayer", "m", 1.0),
    (108, "pressureFromGroundLayer", "Pa", 1.0),
    (200, "atmosphereSingleLayer", "unknown", 1.0),
    (204, "highestTroposphericFreezing", "unknown", 1.0),
];

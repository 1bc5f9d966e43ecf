//! The assembled forecast dataset.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use ndarray::{s, Array2, Array4, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::{feature_description, ProjectionConfig};
use crate::reftime::us_eastern;

/// Values of one vertical axis, shared by every variable of a layer type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAxis {
    pub values: Vec<f64>,
    pub units: String,
}

/// A 4-D array `[forecast, level, y, x]` for one feature on one layer type.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// `<feature>_<layer>`
    pub name: String,
    pub feature: String,
    /// Layer tag; also the name of the level axis
    pub layer: String,
    pub long_name: String,
    pub units: String,
    pub forecast: Vec<u32>,
    pub levels: LevelAxis,
    pub y: Vec<f64>,
    pub x: Vec<f64>,
    pub data: Array4<f32>,
}

impl Variable {
    /// `(forecast, level, y, x)`
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// The 2-D slice at one forecast hour and level value.
    pub fn slice(&self, forecast: u32, level: f64) -> Option<ArrayView2<'_, f32>> {
        let f = self.forecast.iter().position(|&v| v == forecast)?;
        let l = self.levels.values.iter().position(|&v| v == level)?;
        Some(self.data.slice(s![f, l, .., ..]))
    }

    /// CF-style attributes.
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("long_name".into(), json!(self.long_name));
        attrs.insert("units".into(), json!(self.units));
        attrs.insert("feature".into(), json!(self.feature));
        attrs.insert("layer".into(), json!(self.layer));
        attrs.insert("level_units".into(), json!(self.levels.units));
        attrs.insert("grid_mapping".into(), json!("lambert_conformal"));
        attrs.insert(
            "dimensions".into(),
            json!(["forecast", self.layer, "y", "x"]),
        );
        attrs
    }
}

/// All variables of one run on shared coordinates.
///
/// Every variable's `forecast`, `y`, `x` and level axis equal the dataset's
/// axes of the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub reftime: DateTime<Utc>,
    /// Forecast hours after `reftime`
    pub forecast: Vec<u32>,
    /// Level axes keyed by layer tag
    pub levels: BTreeMap<String, LevelAxis>,
    /// Projected y per row, meters
    pub y: Vec<f64>,
    /// Projected x per column, meters
    pub x: Vec<f64>,
    pub lat: Array2<f64>,
    pub lon: Array2<f64>,
    pub projection: ProjectionConfig,
    pub variables: BTreeMap<String, Variable>,
}

impl Dataset {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Reference time in another fixed offset.
    pub fn reftime_in(&self, tz: &FixedOffset) -> DateTime<FixedOffset> {
        self.reftime.with_timezone(tz)
    }

    /// Reference time in US Eastern standard time.
    pub fn reftime_local(&self) -> DateTime<FixedOffset> {
        self.reftime_in(&us_eastern())
    }

    /// Descriptions of the features present, keyed by feature code.
    pub fn features(&self) -> BTreeMap<String, String> {
        self.variables
            .values()
            .map(|v| {
                let description = feature_description(&v.feature)
                    .map(str::to_string)
                    .unwrap_or_else(|| v.long_name.clone());
                (v.feature.clone(), description)
            })
            .collect()
    }

    /// CF grid-mapping attributes.
    pub fn grid_mapping(&self) -> Map<String, Value> {
        let p = &self.projection;
        let mut attrs = Map::new();
        attrs.insert("grid_mapping_name".into(), json!(p.grid_mapping_name));
        attrs.insert(
            "latitude_of_projection_origin".into(),
            json!(p.latitude_of_projection_origin),
        );
        attrs.insert(
            "longitude_of_central_meridian".into(),
            json!(p.longitude_of_central_meridian),
        );
        attrs.insert("standard_parallel".into(), json!(p.standard_parallel));
        attrs.insert("earth_radius".into(), json!(p.earth_radius));
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn dataset() -> Dataset {
        let levels = LevelAxis {
            values: vec![500.0, 850.0],
            units: "hPa".into(),
        };
        let data = Array4::from_shape_fn((2, 2, 3, 3), |(f, l, j, i)| {
            (f * 1000 + l * 100 + j * 10 + i) as f32
        });
        let variable = Variable {
            name: "t_isobaricInhPa".into(),
            feature: "t".into(),
            layer: "isobaricInhPa".into(),
            long_name: "Temperature".into(),
            units: "K".into(),
            forecast: vec![0, 1],
            levels: levels.clone(),
            y: vec![0.0, 1.0, 2.0],
            x: vec![0.0, 1.0, 2.0],
            data,
        };
        Dataset {
            reftime: Utc.with_ymd_and_hms(2020, 3, 1, 12, 0, 0).unwrap(),
            forecast: vec![0, 1],
            levels: BTreeMap::from([("isobaricInhPa".to_string(), levels)]),
            y: vec![0.0, 1.0, 2.0],
            x: vec![0.0, 1.0, 2.0],
            lat: Array2::zeros((3, 3)),
            lon: Array2::zeros((3, 3)),
            projection: ProjectionConfig::default(),
            variables: BTreeMap::from([("t_isobaricInhPa".to_string(), variable)]),
        }
    }

    #[test]
    fn test_slice_by_coordinates() {
        let ds = dataset();
        let t = ds.variable("t_isobaricInhPa").unwrap();
        assert_eq!(t.shape(), (2, 2, 3, 3));
        let slice = t.slice(1, 850.0).unwrap();
        assert_eq!(slice[[2, 1]], 1121.0);
        assert!(t.slice(2, 850.0).is_none());
        assert!(t.slice(0, 700.0).is_none());
    }

    #[test]
    fn test_reftime_local() {
        let ds = dataset();
        assert_eq!(ds.reftime_local().hour(), 7);
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(ds.reftime_in(&tz).hour(), 21);
    }

    #[test]
    fn test_metadata() {
        let ds = dataset();
        assert_eq!(ds.names().collect::<Vec<_>>(), vec!["t_isobaricInhPa"]);
        assert_eq!(ds.features().get("t").map(String::as_str), Some("Temperature"));

        let mapping = ds.grid_mapping();
        assert_eq!(mapping["grid_mapping_name"], "lambert_conformal_conic");
        assert_eq!(mapping["standard_parallel"], 25.0);
        assert_eq!(mapping["earth_radius"], 6_371_229.0);

        let attrs = ds.variables["t_isobaricInhPa"].attributes();
        assert_eq!(attrs["units"], "K");
        assert_eq!(attrs["level_units"], "hPa");
    }
}

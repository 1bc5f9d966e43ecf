//! Decode raw forecast files into grid records.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use grib2_parser::sections::{GridDefinition, ProductDefinition};
use grib2_parser::{Grib2Error, Grib2Message, Grib2Reader, Grib2Tables};
use metrics::counter;
use ndarray::Array2;
use tracing::{debug, trace};

use crate::error::{NamError, Result};

/// Kind of vertical axis a field lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerType {
    /// A surface type with a known name, e.g. `isobaricInhPa`.
    Known(String),
    /// A surface type without a name, identified by its code.
    Synthesized(u8),
}

impl LayerType {
    pub fn from_product(pd: &ProductDefinition) -> Self {
        match &pd.type_of_level {
            Some(name) => Self::Known(name.clone()),
            None => Self::Synthesized(pd.level_type),
        }
    }

    /// Tag used in variable and axis names.
    pub fn tag(&self) -> String {
        match self {
            Self::Known(name) => name.clone(),
            Self::Synthesized(id) => format!("z{}", id),
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Geographic coordinates of every cell of a grid, row-major `(y, x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LatLonGrid {
    pub lat: Array2<f64>,
    pub lon: Array2<f64>,
}

impl LatLonGrid {
    pub fn new(lat: Array2<f64>, lon: Array2<f64>) -> Result<Self> {
        if lat.dim() != lon.dim() {
            return Err(NamError::grid_mismatch(
                "lat/lon",
                format!("latitude {:?} vs longitude {:?}", lat.dim(), lon.dim()),
            ));
        }
        Ok(Self { lat, lon })
    }

    /// (ny, nx)
    pub fn shape(&self) -> (usize, usize) {
        self.lat.dim()
    }

    fn from_message(msg: &Grib2Message) -> std::result::Result<Self, Grib2Error> {
        let shape = msg.shape();
        let (lat, lon) = msg.latlons()?;
        let lat = Array2::from_shape_vec(shape, lat)
            .map_err(|e| Grib2Error::InvalidFormat(format!("latitude grid: {}", e)))?;
        let lon = Array2::from_shape_vec(shape, lon)
            .map_err(|e| Grib2Error::InvalidFormat(format!("longitude grid: {}", e)))?;
        Ok(Self { lat, lon })
    }
}

/// One decoded field at one level and forecast offset.
#[derive(Debug, Clone)]
pub struct GridRecord {
    /// Short feature code, e.g. `t`
    pub feature: String,
    pub layer: LayerType,
    pub level: f64,
    pub level_units: String,
    pub reftime: DateTime<Utc>,
    /// Hours after `reftime`
    pub forecast: u32,
    pub grid: Arc<LatLonGrid>,
    pub values: Array2<f32>,
    pub long_name: String,
    pub units: String,
}

impl GridRecord {
    /// Variable name: `<feature>_<layer tag>`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.feature, self.layer.tag())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// Lazy, single-pass iterator over the records of one raw file.
///
/// Messages whose feature is not in the allow-list are skipped before
/// their data is unpacked. The first malformed message ends the sequence
/// with an error.
pub struct RecordDecoder {
    path: PathBuf,
    reader: Grib2Reader,
    features: Option<HashSet<String>>,
    grid: Option<(GridDefinition, Arc<LatLonGrid>)>,
    failed: bool,
}

impl RecordDecoder {
    /// Read `path` fully and decode it lazily.
    pub fn open(path: &Path, features: Option<&[String]>) -> Result<Self> {
        let data = std::fs::read(path)?;
        debug!(path = %path.display(), bytes = data.len(), "Opened raw grid file");
        Ok(Self::from_bytes(path, Bytes::from(data), features))
    }

    pub fn from_bytes(
        path: impl Into<PathBuf>,
        data: Bytes,
        features: Option<&[String]>,
    ) -> Self {
        Self {
            path: path.into(),
            reader: Grib2Reader::new(data, Grib2Tables::ncep()),
            features: features.map(|f| f.iter().cloned().collect()),
            grid: None,
            failed: false,
        }
    }

    fn wanted(&self, msg: &Grib2Message) -> bool {
        self.features
            .as_ref()
            .map_or(true, |f| f.contains(&msg.product_definition.parameter_short_name))
    }

    fn error(&self, source: Grib2Error) -> NamError {
        NamError::Grib2 {
            path: self.path.clone(),
            source,
        }
    }

    fn decode(&mut self, msg: Grib2Message) -> Result<GridRecord> {
        let pd = &msg.product_definition;
        let forecast = pd.forecast_hours().map_err(|e| self.error(e))?;
        let values = msg.unpack_data().map_err(|e| self.error(e))?;
        let values = Array2::from_shape_vec(msg.shape(), values).map_err(|e| {
            self.error(Grib2Error::UnpackingError(format!("value grid: {}", e)))
        })?;

        let cached = match &self.grid {
            Some((definition, grid)) if *definition == msg.grid_definition => {
                Some(Arc::clone(grid))
            }
            _ => None,
        };
        let grid = match cached {
            Some(grid) => grid,
            None => {
                let grid = Arc::new(LatLonGrid::from_message(&msg).map_err(|e| self.error(e))?);
                self.grid = Some((msg.grid_definition.clone(), Arc::clone(&grid)));
                grid
            }
        };

        let record = GridRecord {
            feature: pd.parameter_short_name.clone(),
            layer: LayerType::from_product(pd),
            level: pd.level_value,
            level_units: pd.level_units.clone(),
            reftime: msg.identification.reference_time,
            forecast,
            grid,
            values,
            long_name: pd.parameter_name.clone(),
            units: pd.parameter_units.clone(),
        };

        trace!(
            name = %record.name(),
            level = record.level,
            forecast = record.forecast,
            "Decoded grid record"
        );
        counter!("nam_records_decoded_total").increment(1);
        Ok(record)
    }
}

impl Iterator for RecordDecoder {
    type Item = Result<GridRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let result = match self.reader.next()? {
                Ok(msg) if !self.wanted(&msg) => continue,
                Ok(msg) => self.decode(msg),
                Err(e) => Err(self.error(e)),
            };
            self.failed = result.is_err();
            return Some(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, fixtures, Grib2Builder};

    fn decoder(data: Vec<u8>, features: Option<&[String]>) -> RecordDecoder {
        RecordDecoder::from_bytes("synthetic.grib2", Bytes::from(data), features)
    }

    #[test]
    fn test_layer_tags() {
        assert_eq!(LayerType::Known("isobaricInhPa".into()).tag(), "isobaricInhPa");
        assert_eq!(LayerType::Synthesized(214).tag(), "z214");
        assert_eq!(LayerType::Synthesized(7).to_string(), "z7");
    }

    #[test]
    fn test_decodes_every_record() {
        let records: Vec<_> = decoder(fixtures::nam_file(3), None)
            .collect::<Result<_>>()
            .unwrap();
        let names: Vec<_> = records.iter().map(GridRecord::name).collect();
        assert_eq!(
            names,
            vec![
                "t_isobaricInhPa",
                "t_isobaricInhPa",
                "r_isobaricInhPa",
                "2r_heightAboveGround",
                "dswrf_surface",
                "tcc_atmosphereSingleLayer",
                "tcc_z214",
            ]
        );

        let t500 = &records[0];
        assert_eq!(t500.level, 500.0);
        assert_eq!(t500.level_units, "hPa");
        assert_eq!(t500.forecast, 3);
        assert_eq!(t500.units, "K");
        assert_eq!(t500.long_name, "Temperature");
        assert_eq!(t500.shape(), (20, 20));
        assert_eq!(t500.grid.shape(), (20, 20));
    }

    #[test]
    fn test_allow_list_filters_records() {
        let features = vec!["t".to_string(), "dswrf".to_string()];
        let records: Vec<_> = decoder(fixtures::nam_file(0), Some(features.as_slice()))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.feature == "t"));
    }

    #[test]
    fn test_grid_is_shared_between_records() {
        let records: Vec<_> = decoder(fixtures::nam_file(1), None)
            .collect::<Result<_>>()
            .unwrap();
        assert!(records.windows(2).all(|w| Arc::ptr_eq(&w[0].grid, &w[1].grid)));

        let (lat, lon) = fixtures::places::MACON;
        assert_approx_eq!(records[0].grid.lat[[10, 10]], lat, 1e-4);
        assert_approx_eq!(records[0].grid.lon[[10, 10]], lon, 1e-4);
    }

    #[test]
    fn test_malformed_message_ends_sequence() {
        let mut data = Grib2Builder::nam().build();
        data.extend(Grib2Builder::nam().with_scanning_mode(0x80).build());
        data.extend(Grib2Builder::nam().build());

        let results: Vec<_> = decoder(data, None).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(NamError::Grib2 {
                source: Grib2Error::UnsupportedScanningMode(0x80),
                ..
            })
        ));
    }

    #[test]
    fn test_non_grib_file_is_an_error() {
        let body = b"<html><body>503 Service Unavailable</body></html>".to_vec();
        let results: Vec<_> = decoder(body, None).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(NamError::Grib2 {
                source: Grib2Error::InvalidFormat(_),
                ..
            })
        ));

        let results: Vec<_> = decoder(Vec::new(), None).collect();
        assert!(matches!(results.as_slice(), [Err(NamError::Grib2 { .. })]));
    }

    #[test]
    fn test_file_with_only_filtered_messages_is_empty() {
        let features = vec!["vis".to_string()];
        let results: Vec<_> = decoder(fixtures::nam_file(1), Some(features.as_slice())).collect();
        assert!(results.is_empty());
    }

    #[test]
    fn test_open_reads_file_from_disk() {
        let (_dir, path) = test_utils::temp_file("nam.t12z.awphys02.tm00.grib2", &fixtures::nam_file(2));
        let features = vec!["r".to_string()];
        let records: Vec<_> = RecordDecoder::open(&path, Some(features.as_slice()))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "r_isobaricInhPa");
        assert_eq!(records[0].forecast, 2);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RecordDecoder::open(&dir.path().join("missing.grib2"), None),
            Err(NamError::Io(_))
        ));
    }
}

//! GRIB2 parser implementation (WMO FM 92 GRIB Edition 2).
//!
//! This crate provides a pure Rust implementation for parsing GRIB2 files,
//! the standard format for meteorological data exchange.
//!
//! A file is a concatenation of messages. [`Grib2Reader`] walks them in
//! order and yields one [`Grib2Message`] per message; the message exposes
//! the parsed sections, the unpacked values and the latitude/longitude of
//! every grid point.
//!
//! Messages carrying several fields (repeated sections 4-7) are read for
//! their first field only.

pub mod sections;
pub mod tables;
pub mod unpacking;

use bytes::Bytes;
use projection::LambertGrid;
use sections::{
    Bitmap, DataRepresentation, DataSection, GridDefinition, GridProjection, Identification,
    Indicator, ProductDefinition,
};
use tracing::debug;

pub use tables::Grib2Tables;

/// Errors raised while reading GRIB2 data.
#[derive(Debug, thiserror::Error)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Unsupported GRIB edition {0}")]
    UnsupportedEdition(u8),

    #[error("Unsupported template {section}.{template}")]
    UnsupportedTemplate { section: u8, template: u16 },

    #[error("Unsupported scanning mode {0:#04x}")]
    UnsupportedScanningMode(u8),

    #[error("Unpacking error: {0}")]
    UnpackingError(String),

    #[error("Projection error: {0}")]
    Projection(#[from] projection::ProjectionError),
}

pub type Result<T> = std::result::Result<T, Grib2Error>;

/// One decoded GRIB2 message.
#[derive(Debug, Clone)]
pub struct Grib2Message {
    pub indicator: Indicator,
    pub identification: Identification,
    pub grid_definition: GridDefinition,
    pub product_definition: ProductDefinition,
    pub data_representation: DataRepresentation,
    pub bitmap: Option<Bitmap>,
    pub data_section: DataSection,
    /// The complete encoded message
    pub raw: Bytes,
}

impl Grib2Message {
    /// Parse a single message. `raw` must span exactly one message.
    pub fn parse(raw: Bytes, tables: &Grib2Tables) -> Result<Self> {
        let indicator = sections::parse_indicator(&raw)?;
        if indicator.message_length != raw.len() as u64 {
            return Err(Grib2Error::InvalidFormat(format!(
                "Message length {} does not match {} available bytes",
                indicator.message_length,
                raw.len()
            )));
        }
        if !raw.ends_with(b"7777") {
            return Err(Grib2Error::InvalidFormat(
                "Missing end section 7777".to_string(),
            ));
        }

        let identification = sections::parse_identification(&raw)?;
        let grid_definition = sections::parse_grid_definition(&raw)?;
        let product_definition =
            sections::parse_product_definition(&raw, indicator.discipline, tables)?;
        let data_representation = sections::parse_data_representation(&raw)?;
        let bitmap = sections::parse_bitmap(&raw)?;
        let data_section = sections::parse_data_section(&raw)?;

        Ok(Self {
            indicator,
            identification,
            grid_definition,
            product_definition,
            data_representation,
            bitmap,
            data_section,
            raw,
        })
    }

    /// Number of rows and columns, `(ny, nx)`.
    pub fn shape(&self) -> (usize, usize) {
        (
            self.grid_definition.ny as usize,
            self.grid_definition.nx as usize,
        )
    }

    /// Unpack the field values in row-major `(ny, nx)` order.
    ///
    /// Missing points (bitmap) are NaN.
    pub fn unpack_data(&self) -> Result<Vec<f32>> {
        self.check_scanning_mode()?;

        let dr = &self.data_representation;
        let values = match dr.template {
            0 => unpacking::unpack_simple(
                &self.data_section.data,
                self.grid_definition.num_data_points,
                dr.bits_per_value,
                dr.reference_value,
                dr.binary_scale_factor,
                dr.decimal_scale_factor,
                self.bitmap.as_ref().map(|b| b.data.as_ref()),
            )?,
            2 | 3 | 40 | 41 => {
                debug!(template = dr.template, "Delegating unpacking to grib crate");
                unpacking::unpack_with_grib_crate(&self.raw)?
            }
            other => {
                return Err(Grib2Error::UnsupportedTemplate {
                    section: 5,
                    template: other,
                })
            }
        };

        let expected = self.grid_definition.num_data_points as usize;
        if values.len() != expected {
            return Err(Grib2Error::UnpackingError(format!(
                "Expected {} values, got {}",
                expected,
                values.len()
            )));
        }
        Ok(values)
    }

    /// Latitude and longitude of every grid point in row-major `(ny, nx)`
    /// order, matching [`Self::unpack_data`]. Longitudes are in [-180, 180).
    pub fn latlons(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        self.check_scanning_mode()?;

        let gd = &self.grid_definition;
        match gd.projection {
            GridProjection::Lambert {
                la1,
                lo1,
                lov,
                dx,
                dy,
                latin1,
                latin2,
                ..
            } => {
                let grid = LambertGrid::from_grib2(
                    la1,
                    lo1,
                    lov,
                    latin1,
                    latin2,
                    dx,
                    dy,
                    gd.nx as usize,
                    gd.ny as usize,
                    gd.earth_radius,
                )?
                .with_j_positive(gd.j_positive());
                Ok(grid.latlons())
            }
            GridProjection::LatLon { la1, lo1, di, dj, .. } => {
                let (ny, nx) = self.shape();
                let mut lats = Vec::with_capacity(nx * ny);
                let mut lons = Vec::with_capacity(nx * ny);
                let j_sign = if gd.j_positive() { 1.0 } else { -1.0 };
                for j in 0..ny {
                    for i in 0..nx {
                        lats.push(la1 + j_sign * j as f64 * dj);
                        lons.push(projection::normalize_degrees(lo1 + i as f64 * di));
                    }
                }
                Ok((lats, lons))
            }
        }
    }

    /// Only +i scanning with consecutive i points is supported.
    fn check_scanning_mode(&self) -> Result<()> {
        let gd = &self.grid_definition;
        if gd.i_negative() || gd.j_consecutive() {
            return Err(Grib2Error::UnsupportedScanningMode(gd.scanning_mode));
        }
        Ok(())
    }
}

/// Sequential reader over the messages of a GRIB2 file.
pub struct Grib2Reader {
    data: Bytes,
    offset: usize,
    tables: Grib2Tables,
    messages: usize,
    failed: bool,
}

impl Grib2Reader {
    pub fn new(data: Bytes, tables: Grib2Tables) -> Self {
        Self {
            data,
            offset: 0,
            tables,
            messages: 0,
            failed: false,
        }
    }

    /// Read the next message. Returns `Ok(None)` at end of data.
    ///
    /// Zero padding around messages is skipped. Any other bytes outside a
    /// message, or a buffer without a single message, is an error.
    pub fn next_message(&mut self) -> Result<Option<Grib2Message>> {
        let rest = &self.data[self.offset..];
        let skip = find_magic(rest).unwrap_or(rest.len());
        if let Some(pos) = rest[..skip].iter().position(|&b| b != 0) {
            return Err(Grib2Error::InvalidFormat(format!(
                "Non-GRIB data at byte {}",
                self.offset + pos
            )));
        }
        if skip == rest.len() {
            self.offset = self.data.len();
            if self.messages == 0 {
                return Err(Grib2Error::InvalidFormat(
                    "No GRIB message found".to_string(),
                ));
            }
            return Ok(None);
        }
        let start = self.offset + skip;

        let remaining = &self.data[start..];
        if remaining.len() < 16 {
            return Err(Grib2Error::InvalidFormat(
                "Truncated message header".to_string(),
            ));
        }

        let indicator = sections::parse_indicator(remaining)?;
        let length = usize::try_from(indicator.message_length).map_err(|_| {
            Grib2Error::InvalidFormat("Message length does not fit in memory".to_string())
        })?;
        if length < 16 || length > remaining.len() {
            return Err(Grib2Error::InvalidFormat(format!(
                "Message length {} exceeds {} available bytes",
                length,
                remaining.len()
            )));
        }

        let raw = self.data.slice(start..start + length);
        self.offset = start + length;
        self.messages += 1;

        Grib2Message::parse(raw, &self.tables).map(Some)
    }
}

impl Iterator for Grib2Reader {
    type Item = Result<Grib2Message>;

    /// Stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_message() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn find_magic(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"GRIB")
}

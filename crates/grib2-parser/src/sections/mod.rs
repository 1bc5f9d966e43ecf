//! GRIB2 section parsing.
//!
//! This module handles parsing of individual GRIB2 message sections.
//! Each GRIB2 message consists of multiple sections containing
//! metadata, grid information, and compressed data.

use crate::tables::Grib2Tables;
use crate::Grib2Error;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub edition: u8,
    pub discipline: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub local_table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Geometry of the grid, per grid definition template.
#[derive(Debug, Clone, PartialEq)]
pub enum GridProjection {
    /// Template 3.0, regular latitude/longitude. Angles in degrees.
    LatLon {
        la1: f64,
        lo1: f64,
        la2: f64,
        lo2: f64,
        di: f64,
        dj: f64,
    },
    /// Template 3.30, Lambert Conformal. Angles in degrees, increments in meters.
    Lambert {
        la1: f64,
        lo1: f64,
        lad: f64,
        lov: f64,
        dx: f64,
        dy: f64,
        latin1: f64,
        latin2: f64,
        projection_centre: u8,
    },
}

/// Section 3: Grid Definition Section
#[derive(Debug, Clone, PartialEq)]
pub struct GridDefinition {
    pub template: u16,
    pub num_data_points: u32,
    pub shape_of_earth: u8,
    /// Earth radius in meters implied by the shape of the earth
    pub earth_radius: f64,
    /// Points along a parallel (x)
    pub nx: u32,
    /// Points along a meridian (y)
    pub ny: u32,
    pub scanning_mode: u8,
    pub projection: GridProjection,
}

impl GridDefinition {
    /// Points are scanned in the -i direction.
    pub fn i_negative(&self) -> bool {
        self.scanning_mode & 0x80 != 0
    }

    /// Points are scanned in the +j direction (south to north).
    pub fn j_positive(&self) -> bool {
        self.scanning_mode & 0x40 != 0
    }

    /// Adjacent points in the j direction are consecutive.
    pub fn j_consecutive(&self) -> bool {
        self.scanning_mode & 0x20 != 0
    }
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub parameter_short_name: String,
    pub parameter_name: String,
    pub parameter_units: String,
    /// Indicator of unit of time range (code table 4.4)
    pub time_unit: u8,
    /// Forecast time in `time_unit`s
    pub forecast_time: u32,
    /// Type of first fixed surface (code table 4.5)
    pub level_type: u8,
    /// First fixed surface value with the scale factor applied and the
    /// level divisor of the surface type (hPa for isobaric surfaces)
    pub level_value: f64,
    /// ecCodes `typeOfLevel`, `None` for surface types without a name
    pub type_of_level: Option<String>,
    pub level_units: String,
}

impl ProductDefinition {
    /// Forecast time converted to whole hours.
    pub fn forecast_hours(&self) -> Result<u32, Grib2Error> {
        let seconds_per_unit: u64 = match self.time_unit {
            0 => 60,
            1 => 3_600,
            2 => 86_400,
            10 => 3 * 3_600,
            11 => 6 * 3_600,
            12 => 12 * 3_600,
            13 => 1,
            other => {
                return Err(Grib2Error::InvalidSection {
                    section: 4,
                    reason: format!("Unsupported time unit {}", other),
                })
            }
        };
        let seconds = u64::from(self.forecast_time) * seconds_per_unit;
        if seconds % 3_600 != 0 {
            return Err(Grib2Error::InvalidSection {
                section: 4,
                reason: format!(
                    "Forecast time {} (unit {}) is not a whole number of hours",
                    self.forecast_time, self.time_unit
                ),
            });
        }
        u32::try_from(seconds / 3_600).map_err(|_| Grib2Error::InvalidSection {
            section: 4,
            reason: "Forecast time out of range".to_string(),
        })
    }
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone, PartialEq)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
    pub original_data_type: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub indicator: u8,
    pub data: Bytes,
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator, Grib2Error> {
    if data.len() < 16 {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octets 5-6 reserved, 7 discipline, 8 edition, 9-16 total length
    let discipline = data[6];
    let edition = data[7];

    if edition != 2 {
        return Err(Grib2Error::UnsupportedEdition(edition));
    }

    let message_length = read_u64(&data[8..16]);

    Ok(Indicator {
        edition,
        discipline,
        message_length,
    })
}

/// Parse Section 1 (Identification)
/// Located at offset 16 in the message
pub fn parse_identification(data: &[u8]) -> Result<Identification, Grib2Error> {
    let section_offset = find_section(data, 1)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 21 {
        return Err(Grib2Error::InvalidSection {
            section: 1,
            reason: "Not enough data".to_string(),
        });
    }

    // Skip section header (4 bytes) and section number (1 byte)
    let sec_data = &section_data[5..];

    let center = u16::from_be_bytes([sec_data[0], sec_data[1]]);
    let sub_center = u16::from_be_bytes([sec_data[2], sec_data[3]]);
    let table_version = sec_data[4];
    let local_table_version = sec_data[5];
    let significance_of_reference_time = sec_data[6];

    let year = u16::from_be_bytes([sec_data[7], sec_data[8]]);
    let month = sec_data[9];
    let day = sec_data[10];
    let hour = sec_data[11];
    let minute = sec_data[12];
    let second = sec_data[13];

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    let reference_time = DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc);

    let production_status = sec_data.get(14).copied().unwrap_or(0);
    let data_type = sec_data.get(15).copied().unwrap_or(0);

    Ok(Identification {
        center,
        sub_center,
        table_version,
        local_table_version,
        significance_of_reference_time,
        reference_time,
        production_status,
        data_type,
    })
}

/// Parse Section 3 (Grid Definition)
pub fn parse_grid_definition(data: &[u8]) -> Result<GridDefinition, Grib2Error> {
    let section_offset = find_section(data, 3)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 14 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: "Not enough data".to_string(),
        });
    }

    // Bytes 6-9: number of data points, 12-13: template number, 14+: template
    let num_data_points = read_u32(&section_data[6..10]);
    let template = u16::from_be_bytes([section_data[12], section_data[13]]);
    let gd = &section_data[14..];

    let required = match template {
        0 => 58,
        30 => 67,
        other => {
            return Err(Grib2Error::UnsupportedTemplate {
                section: 3,
                template: other,
            })
        }
    };
    if gd.len() < required {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!(
                "Template {} needs at least {} bytes, got {}",
                template,
                required,
                gd.len()
            ),
        });
    }

    // Bytes 0-15 are shared by both templates: shape of the earth and radii
    let shape_of_earth = gd[0];
    let earth_radius = earth_radius(shape_of_earth, gd[1], read_u32(&gd[2..6]))?;
    let nx = read_u32(&gd[16..20]);
    let ny = read_u32(&gd[20..24]);

    let (scanning_mode, projection) = if template == 0 {
        // 24-27 basic angle, 28-31 subdivisions, 32-39 La1/Lo1, 40 flags,
        // 41-48 La2/Lo2, 49-56 Di/Dj, 57 scanning mode
        let projection = GridProjection::LatLon {
            la1: micro(decode_grib2_signed(&gd[32..36])),
            lo1: micro(decode_grib2_signed(&gd[36..40])),
            la2: micro(decode_grib2_signed(&gd[41..45])),
            lo2: micro(decode_grib2_signed(&gd[45..49])),
            di: micro(read_u32(&gd[49..53]) as i64),
            dj: micro(read_u32(&gd[53..57]) as i64),
        };
        (gd[57], projection)
    } else {
        // 24-31 La1/Lo1, 32 flags, 33-36 LaD, 37-40 LoV, 41-48 Dx/Dy (mm),
        // 49 projection centre, 50 scanning mode, 51-58 Latin1/Latin2
        let projection = GridProjection::Lambert {
            la1: micro(decode_grib2_signed(&gd[24..28])),
            lo1: micro(decode_grib2_signed(&gd[28..32])),
            lad: micro(decode_grib2_signed(&gd[33..37])),
            lov: micro(decode_grib2_signed(&gd[37..41])),
            dx: read_u32(&gd[41..45]) as f64 / 1000.0,
            dy: read_u32(&gd[45..49]) as f64 / 1000.0,
            projection_centre: gd[49],
            latin1: micro(decode_grib2_signed(&gd[51..55])),
            latin2: micro(decode_grib2_signed(&gd[55..59])),
        };
        (gd[50], projection)
    };

    if u64::from(nx) * u64::from(ny) != u64::from(num_data_points) {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!(
                "Grid {}x{} does not match {} data points",
                nx, ny, num_data_points
            ),
        });
    }

    Ok(GridDefinition {
        template,
        num_data_points,
        shape_of_earth,
        earth_radius,
        nx,
        ny,
        scanning_mode,
        projection,
    })
}

/// Parse Section 4 (Product Definition)
pub fn parse_product_definition(
    data: &[u8],
    discipline: u8,
    tables: &Grib2Tables,
) -> Result<ProductDefinition, Grib2Error> {
    let section_offset = find_section(data, 4)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 34 {
        return Err(Grib2Error::InvalidSection {
            section: 4,
            reason: "Not enough data".to_string(),
        });
    }

    // Bytes 5-6: number of coordinate values, 7-8: template number,
    // 9: parameter category, 10: parameter number
    let template = u16::from_be_bytes([section_data[7], section_data[8]]);
    if template != 0 && template != 8 {
        return Err(Grib2Error::UnsupportedTemplate {
            section: 4,
            template,
        });
    }

    let parameter_category = section_data[9];
    let parameter_number = section_data[10];

    // Templates 4.0 and 4.8 share their first 34 bytes:
    // 17 time unit, 18-21 forecast time, 22 type of first fixed surface,
    // 23 scale factor, 24-27 scaled value
    let time_unit = section_data[17];
    let forecast_time = read_u32(&section_data[18..22]);
    let level_type = section_data[22];
    let scale_factor = section_data[23];
    let scaled_value = &section_data[24..28];

    let raw_level = if scale_factor == 0xFF || scaled_value == [0xFF; 4] {
        // Missing
        0.0
    } else {
        let scale = decode_grib2_signed(&[scale_factor]);
        decode_grib2_signed(scaled_value) as f64 / 10f64.powi(scale as i32)
    };

    let level = tables.level(level_type);
    let level_value = match level {
        Some(info) => raw_level / info.divisor,
        None => raw_level,
    };
    let type_of_level = level.map(|info| info.type_of_level.clone());
    let level_units = level
        .map(|info| info.units.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let key = (discipline, parameter_category, parameter_number);
    let parameter = tables.parameter(discipline, parameter_category, parameter_number);
    let parameter_short_name = tables.short_name(key, level_type, level_value);

    Ok(ProductDefinition {
        template,
        parameter_category,
        parameter_number,
        parameter_short_name,
        parameter_name: parameter.name,
        parameter_units: parameter.units,
        time_unit,
        forecast_time,
        level_type,
        level_value,
        type_of_level,
        level_units,
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(data: &[u8]) -> Result<DataRepresentation, Grib2Error> {
    let section_offset = find_section(data, 5)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 21 {
        return Err(Grib2Error::InvalidSection {
            section: 5,
            reason: "Not enough data".to_string(),
        });
    }

    // Octets 6-9 [5-8]: number of data points
    // Octets 10-11 [9-10]: template number
    // Octets 12-15 [11-14]: reference value (IEEE float)
    // Octets 16-17 [15-16]: binary scale factor E
    // Octets 18-19 [17-18]: decimal scale factor D
    // Octet 20 [19]: bits per packed value
    // Octet 21 [20]: type of original field values
    //
    // Templates 5.0, 5.2, 5.3, 5.40 and 5.41 all share this prefix.
    let num_data_points = read_u32(&section_data[5..9]);
    let template = u16::from_be_bytes([section_data[9], section_data[10]]);
    let reference_value = f32::from_be_bytes([
        section_data[11],
        section_data[12],
        section_data[13],
        section_data[14],
    ]);
    let binary_scale_factor = decode_grib2_signed(&section_data[15..17]) as i16;
    let decimal_scale_factor = decode_grib2_signed(&section_data[17..19]) as i16;
    let bits_per_value = section_data[19];
    let original_data_type = section_data[20];

    Ok(DataRepresentation {
        num_data_points,
        template,
        reference_value,
        binary_scale_factor,
        decimal_scale_factor,
        bits_per_value,
        original_data_type,
    })
}

/// Parse Section 6 (Bitmap)
///
/// Returns `None` when the indicator says no bitmap applies (255).
pub fn parse_bitmap(data: &[u8]) -> Result<Option<Bitmap>, Grib2Error> {
    let section_offset = find_section(data, 6)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 6 {
        return Err(Grib2Error::InvalidSection {
            section: 6,
            reason: "Not enough data".to_string(),
        });
    }

    let section_length = read_u32(&section_data[0..4]) as usize;
    if section_length < 6 {
        return Err(Grib2Error::InvalidSection {
            section: 6,
            reason: format!("Section length {} leaves no room for the indicator", section_length),
        });
    }
    let indicator = section_data[5];

    match indicator {
        255 => Ok(None),
        0 => Ok(Some(Bitmap {
            indicator,
            data: Bytes::copy_from_slice(&section_data[6..section_length]),
        })),
        other => Err(Grib2Error::InvalidSection {
            section: 6,
            reason: format!("Predefined bitmap {} not supported", other),
        }),
    }
}

/// Parse Section 7 (Data)
pub fn parse_data_section(data: &[u8]) -> Result<DataSection, Grib2Error> {
    let section_offset = find_section(data, 7)?;
    let section_data = &data[section_offset..];

    let section_length = read_u32(&section_data[0..4]) as usize;

    let data_bytes = if section_length > 5 {
        Bytes::copy_from_slice(&section_data[5..section_length])
    } else {
        Bytes::new()
    };

    Ok(DataSection { data: data_bytes })
}

// ===== Helper Functions =====

/// Decode a GRIB2 sign-magnitude integer of 1 to 4 bytes.
///
/// The most significant bit is the sign, the rest is the magnitude.
/// Inputs of any other length decode to zero.
pub fn decode_grib2_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() || bytes.len() > 4 {
        return 0;
    }
    let mut raw: u64 = 0;
    for &b in bytes {
        raw = (raw << 8) | u64::from(b);
    }
    let sign_bit = 1u64 << (bytes.len() * 8 - 1);
    let magnitude = (raw & (sign_bit - 1)) as i64;
    if raw & sign_bit != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Earth radius in meters from code table 3.2.
fn earth_radius(shape: u8, scale_factor: u8, scaled_value: u32) -> Result<f64, Grib2Error> {
    match shape {
        0 => Ok(6_367_470.0),
        1 => {
            let radius = scaled_value as f64 / 10f64.powi(scale_factor as i32);
            if radius > 0.0 {
                Ok(radius)
            } else {
                Err(Grib2Error::InvalidSection {
                    section: 3,
                    reason: "Earth radius must be positive".to_string(),
                })
            }
        }
        6 => Ok(6_371_229.0),
        8 => Ok(6_371_200.0),
        other => Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!("Unsupported shape of the earth {}", other),
        }),
    }
}

fn micro(value: i64) -> f64 {
    value as f64 * 1e-6
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Find a section by number within a message
fn find_section(data: &[u8], section_num: u8) -> Result<usize, Grib2Error> {
    let mut offset = 16; // After Section 0

    loop {
        if offset + 5 > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Section not found".to_string(),
            });
        }

        // Section 8 is the 4-byte "7777" trailer
        if &data[offset..offset + 4] == b"7777" {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Reached end of message without finding section".to_string(),
            });
        }

        let section_length = read_u32(&data[offset..offset + 4]) as usize;

        if section_length < 5 || offset + section_length > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Invalid section length".to_string(),
            });
        }

        if data[offset + 4] == section_num {
            return Ok(offset);
        }

        offset += section_length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(number: u8, body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 5) as u32).to_be_bytes().to_vec();
        out.push(number);
        out.extend_from_slice(body);
        out
    }

    fn message(sections: &[Vec<u8>]) -> Vec<u8> {
        let mut out = b"GRIB".to_vec();
        out.extend_from_slice(&[0, 0, 0, 2]);
        let body: usize = sections.iter().map(Vec::len).sum();
        out.extend_from_slice(&((16 + body + 4) as u64).to_be_bytes());
        for s in sections {
            out.extend_from_slice(s);
        }
        out.extend_from_slice(b"7777");
        out
    }

    #[test]
    fn test_indicator_rejects_grib1() {
        let mut data = b"GRIB".to_vec();
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&[0; 8]);
        assert!(matches!(
            parse_indicator(&data),
            Err(Grib2Error::UnsupportedEdition(1))
        ));
    }

    #[test]
    fn test_indicator_rejects_bad_magic() {
        let data = [0u8; 16];
        assert!(matches!(
            parse_indicator(&data),
            Err(Grib2Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_find_section_stops_at_trailer() {
        let data = message(&[section(1, &[0; 16])]);
        assert!(find_section(&data, 1).is_ok());
        assert!(matches!(
            find_section(&data, 3),
            Err(Grib2Error::InvalidSection { section: 3, .. })
        ));
    }

    #[test]
    fn test_bitmap_absent() {
        let data = message(&[section(6, &[255])]);
        assert!(parse_bitmap(&data).unwrap().is_none());
    }

    #[test]
    fn test_bitmap_present() {
        let data = message(&[section(6, &[0, 0b1010_0000])]);
        let bitmap = parse_bitmap(&data).unwrap().unwrap();
        assert_eq!(bitmap.data.as_ref(), &[0b1010_0000]);
    }

    #[test]
    fn test_bitmap_without_indicator_is_an_error() {
        let data = message(&[section(6, &[]), section(7, &[0])]);
        assert!(matches!(
            parse_bitmap(&data),
            Err(Grib2Error::InvalidSection { section: 6, .. })
        ));
    }

    #[test]
    fn test_unsupported_grid_template() {
        let mut body = vec![0u8; 9];
        body[7..9].copy_from_slice(&40u16.to_be_bytes());
        body.extend_from_slice(&[0; 80]);
        let data = message(&[section(3, &body)]);
        assert!(matches!(
            parse_grid_definition(&data),
            Err(Grib2Error::UnsupportedTemplate {
                section: 3,
                template: 40
            })
        ));
    }

    #[test]
    fn test_forecast_hours_units() {
        let mut pd = ProductDefinition {
            template: 0,
            parameter_category: 0,
            parameter_number: 0,
            parameter_short_name: "t".to_string(),
            parameter_name: "Temperature".to_string(),
            parameter_units: "K".to_string(),
            time_unit: 1,
            forecast_time: 36,
            level_type: 100,
            level_value: 500.0,
            type_of_level: Some("isobaricInhPa".to_string()),
            level_units: "hPa".to_string(),
        };
        assert_eq!(pd.forecast_hours().unwrap(), 36);

        pd.time_unit = 0;
        pd.forecast_time = 180;
        assert_eq!(pd.forecast_hours().unwrap(), 3);

        pd.time_unit = 10;
        pd.forecast_time = 4;
        assert_eq!(pd.forecast_hours().unwrap(), 12);

        pd.time_unit = 0;
        pd.forecast_time = 90;
        assert!(pd.forecast_hours().is_err());
    }

    #[test]
    fn test_earth_radius_shapes() {
        assert_eq!(earth_radius(6, 0, 0).unwrap(), 6_371_229.0);
        assert_eq!(earth_radius(0, 0, 0).unwrap(), 6_367_470.0);
        assert_eq!(earth_radius(1, 1, 63_712_290).unwrap(), 6_371_229.0);
        assert!(earth_radius(1, 0, 0).is_err());
        assert!(earth_radius(7, 0, 0).is_err());
    }
}

//! Parse synthetic NAM-style GRIB2 files end to end.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use grib2_parser::sections::GridProjection;
use grib2_parser::{Grib2Error, Grib2Reader, Grib2Tables};
use test_utils::{assert_approx_eq, create_temperature_grid, fixtures, Grib2Builder};

fn reader(data: Vec<u8>) -> Grib2Reader {
    Grib2Reader::new(Bytes::from(data), Grib2Tables::ncep())
}

#[test]
fn test_reads_every_message_in_order() {
    let messages: Vec<_> = reader(fixtures::nam_file(3))
        .collect::<Result<_, _>>()
        .expect("file should parse");

    let names: Vec<_> = messages
        .iter()
        .map(|m| m.product_definition.parameter_short_name.as_str())
        .collect();
    assert_eq!(names, vec!["t", "t", "r", "2r", "dswrf", "tcc", "tcc"]);
}

#[test]
fn test_message_metadata() {
    let mut reader = reader(fixtures::nam_file(5));
    let msg = reader.next_message().unwrap().expect("one message");

    assert_eq!(msg.identification.center, 7);
    assert_eq!(
        msg.identification.reference_time,
        Utc.with_ymd_and_hms(2020, 3, 1, 12, 0, 0).unwrap()
    );

    let pd = &msg.product_definition;
    assert_eq!(pd.forecast_hours().unwrap(), 5);
    assert_eq!(pd.type_of_level.as_deref(), Some("isobaricInhPa"));
    assert_eq!(pd.level_value, 500.0);
    assert_eq!(pd.level_units, "hPa");
    assert_eq!(pd.parameter_units, "K");
    assert_eq!(msg.shape(), (20, 20));
}

#[test]
fn test_lambert_grid_definition() {
    let mut reader = reader(fixtures::nam_file(0));
    let msg = reader.next_message().unwrap().unwrap();
    let gd = &msg.grid_definition;

    assert_eq!(gd.template, 30);
    assert_eq!(gd.earth_radius, 6_371_229.0);
    assert!(gd.j_positive());
    match gd.projection {
        GridProjection::Lambert {
            lov,
            latin1,
            latin2,
            dx,
            dy,
            ..
        } => {
            assert_approx_eq!(lov, 265.0, 1e-6);
            assert_approx_eq!(latin1, 25.0, 1e-6);
            assert_approx_eq!(latin2, 25.0, 1e-6);
            assert_eq!(dx, 12_191.0);
            assert_eq!(dy, 12_191.0);
        }
        ref other => panic!("expected Lambert grid, got {:?}", other),
    }
}

#[test]
fn test_unsupported_levels_have_no_name() {
    let messages: Vec<_> = reader(fixtures::nam_file(1))
        .collect::<Result<_, _>>()
        .unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.product_definition.level_type, 214);
    assert!(last.product_definition.type_of_level.is_none());
}

#[test]
fn test_statistical_template_is_read() {
    let messages: Vec<_> = reader(fixtures::nam_file(2))
        .collect::<Result<_, _>>()
        .unwrap();
    let dswrf = messages
        .iter()
        .find(|m| m.product_definition.parameter_short_name == "dswrf")
        .expect("dswrf present");
    assert_eq!(dswrf.product_definition.template, 8);
    assert_eq!(dswrf.product_definition.forecast_hours().unwrap(), 2);
    assert_eq!(
        dswrf.product_definition.type_of_level.as_deref(),
        Some("surface")
    );
}

#[test]
fn test_unpacked_values_match_input() {
    let expected = create_temperature_grid(20, 20, 7.0);
    let data = Grib2Builder::nam().with_data(expected.clone()).build();
    let msg = reader(data).next_message().unwrap().unwrap();

    let values = msg.unpack_data().unwrap();
    assert_eq!(values.len(), expected.len());
    for (got, want) in values.iter().zip(&expected) {
        assert_approx_eq!(*got, *want, 0.01);
    }
}

#[test]
fn test_constant_field_uses_zero_bits() {
    let data = Grib2Builder::nam().with_constant_value(288.15).build();
    let msg = reader(data).next_message().unwrap().unwrap();

    assert_eq!(msg.data_representation.bits_per_value, 0);
    let values = msg.unpack_data().unwrap();
    assert!(values.iter().all(|v| (v - 288.15).abs() < 1e-3));
}

#[test]
fn test_missing_points_decode_as_nan() {
    let mut expected = create_temperature_grid(4, 4, 0.0);
    expected[0] = f32::NAN;
    expected[9] = f32::NAN;
    let data = Grib2Builder::nam()
        .with_grid(4, 4)
        .with_data(expected.clone())
        .build();
    let msg = reader(data).next_message().unwrap().unwrap();

    assert!(msg.bitmap.is_some());
    let values = msg.unpack_data().unwrap();
    for (got, want) in values.iter().zip(&expected) {
        if want.is_nan() {
            assert!(got.is_nan());
        } else {
            assert_approx_eq!(*got, *want, 0.01);
        }
    }
}

#[test]
fn test_latlons_follow_grid() {
    let msg = reader(fixtures::nam_file(0)).next_message().unwrap().unwrap();
    let (lats, lons) = msg.latlons().unwrap();
    assert_eq!(lats.len(), 400);
    assert_eq!(lons.len(), 400);

    // The patch is centered on Macon at cell (10, 10)
    let center = 10 * 20 + 10;
    let (lat, lon) = fixtures::places::MACON;
    assert_approx_eq!(lats[center], lat, 1e-4);
    assert_approx_eq!(lons[center], lon, 1e-4);

    // Rows run south to north, columns west to east
    assert!(lats[center + 20] > lats[center]);
    assert!(lons[center + 1] > lons[center]);
}

#[test]
fn test_minutes_forecast_time() {
    let data = Grib2Builder::nam().with_forecast_time(0, 360).build();
    let msg = reader(data).next_message().unwrap().unwrap();
    assert_eq!(msg.product_definition.forecast_hours().unwrap(), 6);
}

#[test]
fn test_padding_between_messages_is_skipped() {
    let mut data = vec![0u8; 8];
    data.extend(Grib2Builder::nam().build());
    data.extend_from_slice(&[0u8; 3]);
    data.extend(Grib2Builder::nam().with_forecast_hour(1).build());

    let messages: Vec<_> = reader(data).collect::<Result<_, _>>().unwrap();
    assert_eq!(messages.len(), 2);
}

#[test]
fn test_file_without_messages_is_an_error() {
    for data in [
        b"<html><body>503 Service Unavailable</body></html>".to_vec(),
        Vec::new(),
        vec![0u8; 32],
    ] {
        let results: Vec<_> = reader(data).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Grib2Error::InvalidFormat(_))));
    }
}

#[test]
fn test_stray_bytes_around_messages_are_an_error() {
    let mut leading = b"<html>".to_vec();
    leading.extend(Grib2Builder::nam().build());
    assert!(matches!(
        reader(leading).next_message(),
        Err(Grib2Error::InvalidFormat(_))
    ));

    let mut trailing = Grib2Builder::nam().build();
    trailing.extend_from_slice(b"</html>");
    let results: Vec<_> = reader(trailing).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(Grib2Error::InvalidFormat(_))));
}

#[test]
fn test_truncated_file_is_an_error() {
    let mut data = fixtures::nam_file(0);
    data.truncate(data.len() - 10);

    let results: Vec<_> = reader(data).collect();
    assert!(results.last().unwrap().is_err());
    // The iterator stops at the first error
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
}

#[test]
fn test_grib1_is_rejected() {
    let mut data = b"GRIB".to_vec();
    data.extend_from_slice(&[0, 0, 100, 1]);
    data.extend_from_slice(&[0u8; 100]);

    let err = reader(data).next_message().unwrap_err();
    assert!(matches!(err, Grib2Error::UnsupportedEdition(1)));
}

#[test]
fn test_unsupported_scanning_mode() {
    let data = Grib2Builder::nam().with_scanning_mode(0x80).build();
    let msg = reader(data).next_message().unwrap().unwrap();
    assert!(matches!(
        msg.unpack_data(),
        Err(Grib2Error::UnsupportedScanningMode(0x80))
    ));
}

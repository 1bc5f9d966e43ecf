//! Unit tests for GRIB2 sign-magnitude integers.
//!
//! These tests don't require test data files and focus on individual functions.

use grib2_parser::sections::decode_grib2_signed;

#[test]
fn test_decode_grib2_signed_zero() {
    assert_eq!(decode_grib2_signed(&[0x00, 0x00, 0x00, 0x00]), 0);
}

#[test]
fn test_decode_grib2_signed_positive() {
    assert_eq!(decode_grib2_signed(&[0x00, 0x00, 0x00, 0x01]), 1);
    assert_eq!(decode_grib2_signed(&[0x00, 0x00, 0x03, 0xE8]), 1000);

    // 90 degrees in microdegrees
    let bytes = 90_000_000_u32.to_be_bytes();
    assert_eq!(decode_grib2_signed(&bytes), 90_000_000);
}

#[test]
fn test_decode_grib2_signed_negative() {
    // Sign-magnitude: MSB=1 means negative
    assert_eq!(decode_grib2_signed(&[0x80, 0x00, 0x00, 0x01]), -1);
    assert_eq!(decode_grib2_signed(&[0x80, 0x00, 0x03, 0xE8]), -1000);

    let with_sign = 90_000_000_u32 | 0x8000_0000;
    assert_eq!(decode_grib2_signed(&with_sign.to_be_bytes()), -90_000_000);
}

#[test]
fn test_decode_grib2_signed_extremes() {
    assert_eq!(decode_grib2_signed(&[0x7F, 0xFF, 0xFF, 0xFF]), 2_147_483_647);
    assert_eq!(decode_grib2_signed(&[0xFF, 0xFF, 0xFF, 0xFF]), -2_147_483_647);
}

#[test]
fn test_decode_grib2_signed_negative_zero() {
    assert_eq!(decode_grib2_signed(&[0x80, 0x00, 0x00, 0x00]), 0);
}

#[test]
fn test_decode_grib2_signed_short_widths() {
    // Scale factors are 1 or 2 bytes wide
    assert_eq!(decode_grib2_signed(&[0x81]), -1);
    assert_eq!(decode_grib2_signed(&[0x02]), 2);
    assert_eq!(decode_grib2_signed(&[0x80, 0x0A]), -10);
    assert_eq!(decode_grib2_signed(&[0x00, 0x0A]), 10);
}

#[test]
fn test_decode_grib2_signed_wrong_length() {
    assert_eq!(decode_grib2_signed(&[]), 0);
    assert_eq!(decode_grib2_signed(&[0x00, 0x00, 0x00, 0x00, 0x01]), 0);
}

#[test]
fn test_sign_magnitude_vs_twos_complement() {
    // Two's complement -1 read as sign-magnitude is -(2^31 - 1)
    assert_eq!(decode_grib2_signed(&[0xFF, 0xFF, 0xFF, 0xFF]), -2_147_483_647);
    assert_eq!(decode_grib2_signed(&[0x80, 0x00, 0x00, 0x01]), -1);
}

#[test]
fn test_nam218_corner_coordinates() {
    // La1 = 12.19 N, Lo1 = 226.541 E
    assert_eq!(decode_grib2_signed(&12_190_000_u32.to_be_bytes()), 12_190_000);
    assert_eq!(decode_grib2_signed(&226_541_000_u32.to_be_bytes()), 226_541_000);

    // A western longitude stored with the sign bit
    let lon = (133_459_000_u32 | 0x8000_0000).to_be_bytes();
    assert_eq!(decode_grib2_signed(&lon), -133_459_000);
}

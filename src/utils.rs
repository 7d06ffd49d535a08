/// Utility functions for frame parsing, statistics and formatting
use std::f64::consts::PI;
use time::{format_description, OffsetDateTime};

use crate::errors::DecodeError;

/// Resultant vectors shorter than this have no meaningful direction
const DEGENERATE_RESULTANT: f64 = 1e-9;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Parse a hexadecimal text frame into one value per nibble
///
/// # Arguments
/// * `frame` - Frame payload, e.g. `"1D20485C480882835"`
///
/// # Returns
/// Nibble values in frame order, or `InvalidHex` naming the first bad digit
pub fn parse_nibbles(frame: &str) -> Result<Vec<u8>, DecodeError> {
    frame
        .chars()
        .enumerate()
        .map(|(position, digit)| {
            digit
                .to_digit(16)
                .map(|v| v as u8)
                .ok_or(DecodeError::InvalidHex { digit, position })
        })
        .collect()
}

/// Parse a 16-bit hex field as two's complement
pub fn parse_signed_short(field: &'static str, text: &str) -> Result<i16, DecodeError> {
    parse_unsigned_short(field, text).map(|v| v as i16)
}

/// Parse a 16-bit unsigned hex field
pub fn parse_unsigned_short(field: &'static str, text: &str) -> Result<u16, DecodeError> {
    u16::from_str_radix(text.trim(), 16).map_err(|e| DecodeError::MalformedField {
        field,
        reason: format!("{:?}: {}", text, e),
    })
}

/// Smallest value, `None` for an empty slice
pub fn minimum(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Largest value, `None` for an empty slice
pub fn maximum(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean direction of a set of angles in degrees
///
/// Computes `atan2(mean(sin θ), mean(cos θ))` and maps the result into
/// `[0, 360)`, so 350° and 10° average to 0° instead of 180°.
///
/// When the unit vectors cancel out (e.g. 0° and 180°) the resultant has no
/// direction. Floating point noise would otherwise pick an arbitrary angle,
/// so a resultant shorter than 1e-9 is reported as 0°, the value of
/// `atan2(0, 0)`.
///
/// # Returns
/// `None` for an empty slice
pub fn circular_mean(degrees: &[f64]) -> Option<f64> {
    if degrees.is_empty() {
        return None;
    }

    let count = degrees.len() as f64;
    let (sum_sin, sum_cos) = degrees.iter().fold((0.0, 0.0), |(s, c), deg| {
        let rad = deg * PI / 180.0;
        (s + rad.sin(), c + rad.cos())
    });
    let (mean_sin, mean_cos) = (sum_sin / count, sum_cos / count);

    if mean_sin.hypot(mean_cos) < DEGENERATE_RESULTANT {
        return Some(0.0);
    }

    let result = (mean_sin.atan2(mean_cos) * 180.0 / PI).rem_euclid(360.0);
    // rem_euclid can round a tiny negative angle up to exactly 360
    Some(if result >= 360.0 { 0.0 } else { result })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angular_distance(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn nibbles_are_parsed_case_insensitively() {
        assert_eq!(parse_nibbles("1d2F").unwrap(), vec![1, 13, 2, 15]);
    }

    #[test]
    fn bad_hex_digit_is_reported_with_position() {
        assert_eq!(
            parse_nibbles("12G4"),
            Err(DecodeError::InvalidHex {
                digit: 'G',
                position: 2
            })
        );
    }

    #[test]
    fn signed_short_uses_twos_complement() {
        assert_eq!(parse_signed_short("t", "FFB8").unwrap(), -72);
        assert_eq!(parse_signed_short("t", "0198").unwrap(), 408);
        assert!(parse_signed_short("t", "1FFFF").is_err());
    }

    #[test]
    fn arithmetic_statistics() {
        let values = [10.0, 20.0, 30.0];
        assert_eq!(minimum(&values), Some(10.0));
        assert_eq!(maximum(&values), Some(30.0));
        assert_eq!(mean(&values), Some(20.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn circular_mean_wraps_around_north() {
        let result = circular_mean(&[350.0, 10.0]).unwrap();
        assert!(angular_distance(result, 0.0) < 1e-6, "got {}", result);
        assert!((0.0..360.0).contains(&result));
    }

    #[test]
    fn circular_mean_of_opposing_vectors_is_zero() {
        assert_eq!(circular_mean(&[0.0, 180.0]), Some(0.0));
        assert_eq!(circular_mean(&[90.0, 270.0]), Some(0.0));
    }

    #[test]
    fn circular_mean_stays_in_compass_range() {
        let result = circular_mean(&[270.0, 280.0, 290.0]).unwrap();
        assert!((result - 280.0).abs() < 1e-9, "got {}", result);

        let single = circular_mean(&[202.5]).unwrap();
        assert!((single - 202.5).abs() < 1e-9);
    }
}

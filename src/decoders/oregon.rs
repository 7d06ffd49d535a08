/// Oregon Scientific v2.1/v3 sensor frame decoding
use super::SensorDecoder;
use crate::errors::DecodeError;
use crate::models::{
    Reading, AVERAGE_WIND, CURRENT_WIND, HUMIDITY, PRESSURE, RAIN_RATE, RAIN_TOTAL, TEMPERATURE,
    UV, WIND_DIR,
};
use crate::utils::parse_nibbles;

// Oregon frame constants
const MIN_FRAME_LEN: usize = 8; // type(4) + channel(1) + rolling code(2) + flags(1)
const CHECKSUM_LEN: usize = 2;
const CHECKSUM_PREFIX: &str = "OS3"; // only v3 frames carry a checksum
const WIND_DIR_STEP: f64 = 22.5; // degrees per direction nibble
const INCH_TO_MM: f64 = 25.4;
const PRESSURE_BASELINE_HPA: f64 = 856.0;

/// Field layout selected by the 4-nibble type code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorKind {
    TemperatureHumidity,
    Temperature,
    Uv,
    UvAlt,
    Wind,
    RainImperial,
    RainMetric,
    Barometer,
}

impl SensorKind {
    fn from_type_code(code: &str) -> Option<Self> {
        match code {
            "1D20" | "F824" | "F8B4" => Some(SensorKind::TemperatureHumidity),
            "EC40" | "C844" => Some(SensorKind::Temperature),
            "EC70" => Some(SensorKind::Uv),
            "D874" => Some(SensorKind::UvAlt),
            "1984" | "1994" => Some(SensorKind::Wind),
            "2914" => Some(SensorKind::RainImperial),
            "2D10" => Some(SensorKind::RainMetric),
            "5D60" => Some(SensorKind::Barometer),
            _ => None,
        }
    }

    /// Exact frame length in nibbles, checksum included
    fn frame_len(self) -> usize {
        match self {
            SensorKind::TemperatureHumidity => 17,
            SensorKind::Temperature | SensorKind::Uv => 14,
            SensorKind::UvAlt => 15,
            SensorKind::Wind => 19,
            SensorKind::RainImperial | SensorKind::Barometer => 20,
            SensorKind::RainMetric => 18,
        }
    }

    fn label(self) -> &'static str {
        match self {
            SensorKind::TemperatureHumidity => "temperature/humidity",
            SensorKind::Temperature => "temperature",
            SensorKind::Uv | SensorKind::UvAlt => "UV",
            SensorKind::Wind => "wind",
            SensorKind::RainImperial | SensorKind::RainMetric => "rain",
            SensorKind::Barometer => "temperature/humidity/pressure",
        }
    }
}

/// Stateless decoder for the `OS2` and `OS3` prefixes
///
/// Frame layout (one hex digit per nibble):
/// - Nibbles 0-3: sensor type code
/// - Nibble 4: channel
/// - Nibbles 5-6: rolling code, reported as the serial
/// - Nibble 7: flags
/// - Nibbles 8..: BCD payload, least significant digit first
/// - Last 2 nibbles (`OS3` only): checksum, low nibble first
pub struct OregonDecoder;

impl SensorDecoder for OregonDecoder {
    fn decode(&mut self, prefix: &str, payload: &str) -> Result<Option<Reading>, DecodeError> {
        let nibbles = parse_nibbles(payload)?;
        if nibbles.len() < MIN_FRAME_LEN {
            return Err(DecodeError::TooShort {
                minimum: MIN_FRAME_LEN,
                actual: nibbles.len(),
            });
        }

        if prefix == CHECKSUM_PREFIX {
            verify_checksum(&nibbles)?;
        }

        let type_code = payload[0..4].to_ascii_uppercase();
        let reading = Reading::new(
            format!("{}:{}", prefix, type_code),
            nibbles[4],
            &payload[5..7],
        );

        // Unknown sensor types still report channel and rolling code so new
        // transmitters show up, just without measurements
        let kind = match SensorKind::from_type_code(&type_code) {
            Some(kind) => kind,
            None => return Ok(Some(reading)),
        };

        if nibbles.len() != kind.frame_len() {
            return Err(DecodeError::LengthMismatch {
                layout: kind.label(),
                expected: kind.frame_len(),
                actual: nibbles.len(),
            });
        }

        let n = &nibbles;
        let reading = match kind {
            SensorKind::TemperatureHumidity => reading
                .with(TEMPERATURE, temperature(n))
                .with(HUMIDITY, humidity(n)),
            SensorKind::Temperature => reading.with(TEMPERATURE, temperature(n)),
            SensorKind::Uv => reading.with(UV, f64::from(n[9] * 10 + n[8])),
            SensorKind::UvAlt => reading.with(UV, f64::from(n[12] * 10 + n[11])),
            SensorKind::Wind => {
                let current = bcd(&[(n[13], 10.0), (n[12], 1.0), (n[11], 0.1)]);
                let average = bcd(&[(n[16], 10.0), (n[15], 1.0), (n[14], 0.1)]);
                reading
                    .with(WIND_DIR, f64::from(n[8]) * WIND_DIR_STEP)
                    .with(CURRENT_WIND, current)
                    .with(AVERAGE_WIND, average)
            }
            SensorKind::RainImperial => {
                let rate = bcd(&[(n[11], 10.0), (n[10], 1.0), (n[9], 0.1), (n[8], 0.01)]);
                let total = bcd(&[
                    (n[17], 100.0),
                    (n[16], 10.0),
                    (n[15], 1.0),
                    (n[14], 0.1),
                    (n[13], 0.01),
                    (n[12], 0.001),
                ]);
                reading
                    .with(RAIN_RATE, rate * INCH_TO_MM)
                    .with(RAIN_TOTAL, total * INCH_TO_MM)
            }
            SensorKind::RainMetric => {
                let rate = bcd(&[(n[10], 10.0), (n[9], 1.0), (n[8], 0.1)]);
                let total = bcd(&[
                    (n[15], 1000.0),
                    (n[14], 100.0),
                    (n[13], 10.0),
                    (n[12], 1.0),
                    (n[11], 0.1),
                ]);
                reading.with(RAIN_RATE, rate).with(RAIN_TOTAL, total)
            }
            SensorKind::Barometer => {
                let pressure = PRESSURE_BASELINE_HPA + f64::from(n[16] * 10 + n[15]);
                reading
                    .with(TEMPERATURE, temperature(n))
                    .with(HUMIDITY, humidity(n))
                    .with(PRESSURE, pressure)
            }
        };

        Ok(Some(reading))
    }

    fn name(&self) -> &'static str {
        "oregon"
    }
}

/// Check the v3 checksum: the wrapping 8-bit sum of every nibble before the
/// checksum must equal the checksum byte, stored low nibble first
fn verify_checksum(nibbles: &[u8]) -> Result<(), DecodeError> {
    let body = &nibbles[..nibbles.len() - CHECKSUM_LEN];
    let computed = body.iter().fold(0i8, |sum, &n| sum.wrapping_add(n as i8));

    let low = nibbles[nibbles.len() - 2];
    let high = nibbles[nibbles.len() - 1];
    let provided = ((high << 4) | low) as i8;

    if computed != provided {
        return Err(DecodeError::ChecksumMismatch {
            computed: computed as u8,
            provided: provided as u8,
        });
    }
    Ok(())
}

/// Sum weighted decimal digits, most significant first
fn bcd(digits: &[(u8, f64)]) -> f64 {
    digits
        .iter()
        .fold(0.0, |acc, &(digit, weight)| acc + f64::from(digit) * weight)
}

/// Temperature in °C from nibbles 8-10, negative when nibble 11 is set
fn temperature(n: &[u8]) -> f64 {
    let value = bcd(&[(n[10], 10.0), (n[9], 1.0), (n[8], 0.1)]);
    if n[11] != 0 {
        -value
    } else {
        value
    }
}

/// Relative humidity in % from nibbles 12-13
fn humidity(n: &[u8]) -> f64 {
    bcd(&[(n[13], 10.0), (n[12], 1.0)])
}

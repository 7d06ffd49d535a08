/// VN1TX anemometer / rain gauge / thermo-hygrometer decoding
use super::SensorDecoder;
use crate::errors::DecodeError;
use crate::models::{Reading, CURRENT_WIND, HUMIDITY, RAIN_TOTAL, TEMPERATURE, WIND_DIR};
use crate::utils::parse_nibbles;

// VN1TX protocol constants
const FRAME_LEN: usize = 17;
const CHECKSUM_SPAN: usize = 14; // nibbles covered by the checksum
const MSG_WIND_RAIN: u8 = 1;
const MSG_TEMP_HUMIDITY: u8 = 8;
const WIND_SPEED_FACTOR: f64 = 1.8278; // empirical, applied to non-zero raw speeds
const KMH_PER_MS: f64 = 3.6;
const RAIN_PER_TIP_MM: f64 = 0.254;
const WIND_DIR_STEP: f64 = 22.5;

/// Transmitted direction code -> compass sector (0 = N, clockwise)
const WIND_DIR_MAP: [u8; 16] = [14, 11, 13, 12, 15, 10, 0, 9, 3, 6, 4, 5, 2, 7, 1, 8];

/// Stateless decoder for the `VN1` prefix
///
/// Every frame carries wind speed; message id 1 adds direction and rain tip
/// count, message id 8 adds temperature and humidity.
pub struct Vn1txDecoder;

impl SensorDecoder for Vn1txDecoder {
    fn decode(&mut self, prefix: &str, payload: &str) -> Result<Option<Reading>, DecodeError> {
        let m = parse_nibbles(payload)?;
        if m.len() != FRAME_LEN {
            return Err(DecodeError::LengthMismatch {
                layout: "VN1TX",
                expected: FRAME_LEN,
                actual: m.len(),
            });
        }

        let computed = m[..CHECKSUM_SPAN]
            .chunks(2)
            .fold(0u8, |sum, pair| sum.wrapping_add((pair[0] << 4) | pair[1]));
        let provided = (m[14] << 4) | m[15];
        if computed != provided {
            return Err(DecodeError::ChecksumMismatch { computed, provided });
        }

        let channel = 4 - (m[0] >> 2);
        let reading = Reading::new(format!("{}:{}", prefix, &payload[1..5]), channel, &payload[5..7])
            .with(CURRENT_WIND, wind_speed(&m));

        let reading = match m[5] {
            MSG_WIND_RAIN => {
                let direction = f64::from(WIND_DIR_MAP[usize::from(m[9])]) * WIND_DIR_STEP;
                let tips = (u32::from(m[10] & 0x03) << 11)
                    | (u32::from(m[11]) << 7)
                    | (u32::from(m[12] & 0x07) << 4)
                    | u32::from(m[13]);
                reading
                    .with(WIND_DIR, direction)
                    .with(RAIN_TOTAL, RAIN_PER_TIP_MM * f64::from(tips))
            }
            MSG_TEMP_HUMIDITY => {
                let raw_f = (u32::from(m[9]) << 7) | (u32::from(m[10] & 0x07) << 4) | u32::from(m[11]);
                let fahrenheit = f64::from(raw_f) * 0.1 - 40.0;
                let humidity = (u32::from(m[12] & 0x07) << 4) | u32::from(m[13]);
                reading
                    .with(TEMPERATURE, (fahrenheit - 32.0) / 1.8)
                    .with(HUMIDITY, f64::from(humidity))
            }
            other => return Err(DecodeError::UnknownMessageId(other)),
        };

        Ok(Some(reading))
    }

    fn name(&self) -> &'static str {
        "vn1tx"
    }
}

/// Wind speed in m/s from the raw km/h field in nibbles 6-8
fn wind_speed(m: &[u8]) -> f64 {
    let raw = (u32::from(m[6] & 0x01) << 7) | (u32::from(m[7]) << 3) | u32::from(m[8] & 0x07);
    let kmh = if raw > 0 {
        f64::from(raw) * WIND_SPEED_FACTOR
    } else {
        0.0
    };
    kmh / KMH_PER_MS
}

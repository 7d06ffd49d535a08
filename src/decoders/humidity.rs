/// Simple wired humidity/temperature sensors (SHT1x, DHT22)
use super::SensorDecoder;
use crate::errors::DecodeError;
use crate::models::{Reading, HUMIDITY, TEMPERATURE};
use crate::utils::parse_signed_short;

/// Stateless decoder for `SHT` and `DHT` frames
///
/// Payload is `temperature,humidity`, each a 16-bit two's complement hex
/// value in tenths.
pub struct HumidityDecoder;

impl SensorDecoder for HumidityDecoder {
    fn decode(&mut self, prefix: &str, payload: &str) -> Result<Option<Reading>, DecodeError> {
        let (temperature, humidity) =
            payload
                .split_once(',')
                .ok_or_else(|| DecodeError::MalformedField {
                    field: "payload",
                    reason: format!("expected temperature,humidity, got {:?}", payload),
                })?;

        let temperature = f64::from(parse_signed_short("temperature", temperature)?) / 10.0;
        let humidity = f64::from(parse_signed_short("humidity", humidity)?) / 10.0;

        Ok(Some(
            Reading::new(prefix, 0, "0")
                .with(TEMPERATURE, temperature)
                .with(HUMIDITY, humidity),
        ))
    }

    fn name(&self) -> &'static str {
        "humidity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tenths() {
        let reading = HumidityDecoder.decode("SHT", "00D7,01C2").unwrap().unwrap();
        assert_eq!(reading.station_id(), "SHT");
        assert_eq!(reading.measurement(TEMPERATURE), Some(21.5));
        assert_eq!(reading.measurement(HUMIDITY), Some(45.0));
    }

    #[test]
    fn negative_temperature() {
        let reading = HumidityDecoder.decode("DHT", "FF9C,0320").unwrap().unwrap();
        assert_eq!(reading.station_id(), "DHT");
        assert_eq!(reading.measurement(TEMPERATURE), Some(-10.0));
        assert_eq!(reading.measurement(HUMIDITY), Some(80.0));
    }

    #[test]
    fn rejects_missing_field() {
        assert!(matches!(
            HumidityDecoder.decode("SHT", "00D7"),
            Err(DecodeError::MalformedField { field: "payload", .. })
        ));
        assert!(HumidityDecoder.decode("SHT", "00D7,").is_err());
    }
}

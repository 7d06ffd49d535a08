/// BMP085-style barometric sensor decoding with multi-frame calibration
use log::debug;

use super::SensorDecoder;
use crate::errors::DecodeError;
use crate::models::{Reading, PRESSURE, TEMPERATURE};
use crate::utils::{parse_signed_short, parse_unsigned_short};

// Barometric protocol constants
const COEFFICIENT_COUNT: usize = 11;
const ALL_OBSERVED: u16 = (1 << COEFFICIENT_COUNT) - 1;
const UNSIGNED_COEFFICIENTS: [usize; 3] = [3, 4, 5]; // AC4..AC6
const PRESSURE_OVERSAMPLE_DIVISOR: u32 = 16;
const HPA_PER_100M: f64 = 12.0;
const STATION_ID: &str = "BMP";
const SAMPLE_PREFIX: &str = "BMX";
const AVERAGING_PREFIX: &str = "BMV";
const OVERSAMPLING_PREFIX: &str = "BMO";

/// Polynomial coefficients derived from the raw calibration integers
#[derive(Debug, Clone, Copy, PartialEq)]
struct Compensation {
    c5: f64,
    c6: f64,
    mc: f64,
    md: f64,
    x: [f64; 3],
    y: [f64; 3],
    p: [f64; 3],
}

impl Compensation {
    fn derive(cal: &[i32; COEFFICIENT_COUNT]) -> Self {
        let c = |i: usize| f64::from(cal[i]);
        let pow2 = |e: i32| 2f64.powi(e);

        let c3 = 160.0 * pow2(-15) * c(2);
        let c4 = 0.001 * pow2(-15) * c(3);
        let b1 = 160.0 * 160.0 * pow2(-30) * c(6);

        Compensation {
            c5: pow2(-15) / 160.0 * c(4),
            c6: c(5),
            mc: pow2(11) / (160.0 * 160.0) * c(9),
            md: c(10) / 160.0,
            x: [
                c(0),
                160.0 * pow2(-13) * c(1),
                160.0 * 160.0 * pow2(-25) * c(7),
            ],
            y: [c4 * pow2(15), c4 * c3, c4 * b1],
            p: [
                (3791.0 - 8.0) / 1600.0,
                1.0 - 7357.0 * pow2(-20),
                3038.0 * 100.0 * pow2(-36),
            ],
        }
    }

    /// Compensated temperature (°C) and pressure (hPa) from averaged ADC values
    fn apply(&self, raw_temperature: u32, raw_pressure: u32) -> (f64, f64) {
        let alpha = self.c5 * (f64::from(raw_temperature) - self.c6);
        let temperature = alpha + self.mc / (alpha + self.md);

        let s = temperature - 25.0;
        let x = (self.x[2] * s + self.x[1]) * s + self.x[0];
        let y = (self.y[2] * s + self.y[1]) * s + self.y[0];
        let z = (f64::from(raw_pressure) - x) / y;
        let pressure = (self.p[2] * z + self.p[1]) * z + self.p[0];

        (temperature, pressure)
    }
}

/// Calibration collected from the `BM0`..`BMA` frames of one sensor
///
/// Readiness is monotonic: once all eleven coefficients have been seen the
/// state stays ready. A coefficient that arrives again afterwards replaces
/// the old value and the polynomial is derived anew.
#[derive(Debug, Clone, Default)]
pub struct CalibrationState {
    raw: [i32; COEFFICIENT_COUNT],
    observed: u16,
    compensation: Option<Compensation>,
}

impl CalibrationState {
    pub fn set(&mut self, index: usize, value: i32) {
        self.raw[index] = value;
        self.observed |= 1 << index;
        if self.observed == ALL_OBSERVED {
            self.compensation = Some(Compensation::derive(&self.raw));
        }
    }

    pub fn is_ready(&self) -> bool {
        self.compensation.is_some()
    }

    pub fn missing(&self) -> u32 {
        COEFFICIENT_COUNT as u32 - self.observed.count_ones()
    }
}

/// Stateful decoder for one physical barometric sensor
///
/// Prefixes:
/// - `BM0`..`BM9`, `BMA`: calibration coefficients 0-10
/// - `BMV`: number of ADC samples summed per sample frame
/// - `BMO`: oversampling mode
/// - `BMX`: `temperatureSum,pressureSum` sample frame
pub struct BarometricDecoder {
    calibration: CalibrationState,
    averaging_count: u32,
    oversampling_mode: u8,
    elevation_m: i32,
}

impl BarometricDecoder {
    /// Prefixes besides `BMX` that belong to this decoder
    pub const CONTROL_PREFIXES: [&'static str; 13] = [
        "BM0", "BM1", "BM2", "BM3", "BM4", "BM5", "BM6", "BM7", "BM8", "BM9", "BMA",
        AVERAGING_PREFIX, OVERSAMPLING_PREFIX,
    ];

    pub fn new(elevation_m: i32) -> Self {
        BarometricDecoder {
            calibration: CalibrationState::default(),
            averaging_count: 1,
            oversampling_mode: 0,
            elevation_m,
        }
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn oversampling_mode(&self) -> u8 {
        self.oversampling_mode
    }

    fn set_coefficient(&mut self, index: usize, payload: &str) -> Result<(), DecodeError> {
        let value = if UNSIGNED_COEFFICIENTS.contains(&index) {
            i32::from(parse_unsigned_short("calibration coefficient", payload)?)
        } else {
            i32::from(parse_signed_short("calibration coefficient", payload)?)
        };
        self.calibration.set(index, value);
        debug!(
            "Barometric coefficient {} = {} ({} missing)",
            index,
            value,
            self.calibration.missing()
        );
        Ok(())
    }

    fn decode_sample(&self, payload: &str) -> Result<Reading, DecodeError> {
        let compensation = self
            .calibration
            .compensation
            .ok_or(DecodeError::NotCalibrated {
                missing: self.calibration.missing(),
            })?;

        let (temperature, pressure) = payload.split_once(',').ok_or(DecodeError::MalformedField {
            field: "sample",
            reason: format!("expected temperature,pressure, got {:?}", payload),
        })?;
        let parse = |field: &'static str, text: &str| {
            u32::from_str_radix(text.trim(), 16).map_err(|e| DecodeError::MalformedField {
                field,
                reason: format!("{:?}: {}", text, e),
            })
        };

        let raw_temperature = parse("temperature sum", temperature)? / self.averaging_count;
        let raw_pressure = parse("pressure sum", pressure)?
            / (self.averaging_count * PRESSURE_OVERSAMPLE_DIVISOR);

        let (celsius, hpa) = compensation.apply(raw_temperature, raw_pressure);
        let elevation_correction = f64::from(self.elevation_m) * HPA_PER_100M / 100.0;

        Ok(Reading::new(STATION_ID, 0, "0")
            .with(TEMPERATURE, celsius)
            .with(PRESSURE, hpa + elevation_correction))
    }
}

impl SensorDecoder for BarometricDecoder {
    fn decode(&mut self, prefix: &str, payload: &str) -> Result<Option<Reading>, DecodeError> {
        match prefix {
            SAMPLE_PREFIX => self.decode_sample(payload).map(Some),
            AVERAGING_PREFIX => {
                let count = parse_signed_short("averaging count", payload)?;
                if count <= 0 {
                    return Err(DecodeError::MalformedField {
                        field: "averaging count",
                        reason: format!("must be positive, got {}", count),
                    });
                }
                self.averaging_count = count as u32;
                Ok(None)
            }
            OVERSAMPLING_PREFIX => {
                let mode = parse_unsigned_short("oversampling mode", payload)?;
                self.oversampling_mode =
                    u8::try_from(mode).map_err(|_| DecodeError::MalformedField {
                        field: "oversampling mode",
                        reason: format!("{} does not fit in 8 bits", mode),
                    })?;
                Ok(None)
            }
            _ => {
                // BM0..BM9 and BMA carry coefficient index as the last digit
                let index = prefix
                    .strip_prefix("BM")
                    .and_then(|digit| u8::from_str_radix(digit, 16).ok())
                    .map(usize::from)
                    .filter(|&i| i < COEFFICIENT_COUNT)
                    .ok_or(DecodeError::MalformedField {
                        field: "prefix",
                        reason: format!("{:?} is not a barometric frame", prefix),
                    })?;
                self.set_coefficient(index, payload)?;
                Ok(None)
            }
        }
    }

    fn name(&self) -> &'static str {
        "barometric"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Datasheet example calibration: AC1..AC6, B1, B2, MB, MC, MD
    const CALIBRATION: [(&str, &str); 11] = [
        ("BM0", "0198"),
        ("BM1", "FFB8"),
        ("BM2", "C7D1"),
        ("BM3", "7FE5"),
        ("BM4", "7FF5"),
        ("BM5", "5A71"),
        ("BM6", "182E"),
        ("BM7", "0004"),
        ("BM8", "8000"),
        ("BM9", "DDF9"),
        ("BMA", "0B34"),
    ];

    // UT = 27898, UP = 23843 with a single sample (pressure sum carries x16)
    const SAMPLE: &str = "6CFA,5D230";

    fn calibrated(elevation_m: i32) -> BarometricDecoder {
        let mut decoder = BarometricDecoder::new(elevation_m);
        for (prefix, payload) in CALIBRATION {
            assert_eq!(decoder.decode(prefix, payload), Ok(None));
        }
        decoder
    }

    #[test]
    fn sample_before_calibration_is_rejected() {
        let mut decoder = BarometricDecoder::new(0);
        for (prefix, payload) in &CALIBRATION[..10] {
            decoder.decode(prefix, payload).unwrap();
            assert!(matches!(
                decoder.decode("BMX", SAMPLE),
                Err(DecodeError::NotCalibrated { .. })
            ));
        }
        assert_eq!(
            decoder.decode("BMX", SAMPLE),
            Err(DecodeError::NotCalibrated { missing: 1 })
        );

        decoder.decode("BMA", "0B34").unwrap();
        assert!(decoder.calibration().is_ready());
        assert!(decoder.decode("BMX", SAMPLE).unwrap().is_some());
    }

    #[test]
    fn compensates_datasheet_example() {
        let mut decoder = calibrated(0);
        let reading = decoder.decode("BMX", SAMPLE).unwrap().unwrap();

        assert_eq!(reading.station_id(), "BMP");
        assert_eq!(reading.channel(), 0);
        assert_eq!(reading.serial(), "0");
        let celsius = reading.measurement(TEMPERATURE).unwrap();
        let hpa = reading.measurement(PRESSURE).unwrap();
        assert!((celsius - 15.0).abs() < 0.1, "temperature {}", celsius);
        assert!((hpa - 699.64).abs() < 0.5, "pressure {}", hpa);
    }

    #[test]
    fn averaging_count_divides_sums() {
        let mut single = calibrated(0);
        let expected = single.decode("BMX", SAMPLE).unwrap().unwrap();

        let mut averaged = calibrated(0);
        assert_eq!(averaged.decode("BMV", "0004"), Ok(None));
        // Four samples summed: 4 x 27898, 4 x 16 x 23843
        let reading = averaged.decode("BMX", "1B3E8,1748C0").unwrap().unwrap();
        assert_eq!(reading.measurements(), expected.measurements());
    }

    #[test]
    fn elevation_adds_linear_correction() {
        let sea_level = calibrated(0).decode("BMX", SAMPLE).unwrap().unwrap();
        let hill = calibrated(250).decode("BMX", SAMPLE).unwrap().unwrap();
        let delta = hill.measurement(PRESSURE).unwrap() - sea_level.measurement(PRESSURE).unwrap();
        assert!((delta - 30.0).abs() < 1e-9);
    }

    #[test]
    fn readiness_never_reverts() {
        let mut decoder = calibrated(0);
        decoder.decode("BM3", "7FE6").unwrap();
        assert!(decoder.calibration().is_ready());
        assert_eq!(decoder.calibration().missing(), 0);
    }

    #[test]
    fn control_frames_are_validated() {
        let mut decoder = BarometricDecoder::new(0);
        assert!(decoder.decode("BMV", "0000").is_err());
        assert!(decoder.decode("BM0", "zz").is_err());
        assert_eq!(decoder.decode("BMO", "3"), Ok(None));
        assert_eq!(decoder.oversampling_mode(), 3);

        // Out-of-range modes are rejected, not truncated
        assert!(matches!(
            decoder.decode("BMO", "0103"),
            Err(DecodeError::MalformedField {
                field: "oversampling mode",
                ..
            })
        ));
        assert_eq!(decoder.oversampling_mode(), 3);

        let mut ready = calibrated(0);
        assert!(matches!(
            ready.decode("BMX", "6CFA"),
            Err(DecodeError::MalformedField { field: "sample", .. })
        ));
    }

    #[test]
    fn unsigned_coefficients_keep_high_bit() {
        let mut decoder = BarometricDecoder::new(0);
        decoder.decode("BM3", "8000").unwrap();
        decoder.decode("BM0", "8000").unwrap();
        assert_eq!(decoder.calibration().raw[3], 32768);
        assert_eq!(decoder.calibration().raw[0], -32768);
    }
}

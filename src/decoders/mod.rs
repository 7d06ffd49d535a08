/// Frame decoders for the RF sensor protocol families
pub mod barometric;
pub mod humidity;
pub mod oregon;
pub mod registry;
pub mod vn1tx;

use crate::errors::DecodeError;
use crate::models::Reading;

pub use barometric::BarometricDecoder;
pub use humidity::HumidityDecoder;
pub use oregon::OregonDecoder;
pub use registry::{DecoderRegistry, Dispatch};
pub use vn1tx::Vn1txDecoder;

/// A decoder for one protocol family
///
/// `prefix` is the token before the first `:` of the line and `payload`
/// everything after it. Several prefixes may route to the same decoder, so
/// implementations can use the prefix to tell frame variants apart.
///
/// Returns `Ok(Some(reading))` for a decoded measurement frame, `Ok(None)`
/// for a frame that was accepted but carries no measurement (calibration
/// data, for instance), and `Err` when the frame is rejected.
///
/// ```
/// use rf_weather_etl::decoders::{DecoderRegistry, Dispatch, SensorDecoder};
/// use rf_weather_etl::errors::DecodeError;
/// use rf_weather_etl::models::{Reading, UV};
///
/// struct UvSensor;
///
/// impl SensorDecoder for UvSensor {
///     fn decode(&mut self, prefix: &str, payload: &str) -> Result<Option<Reading>, DecodeError> {
///         let index = u8::from_str_radix(payload, 16).map_err(|e| DecodeError::MalformedField {
///             field: "uv index",
///             reason: e.to_string(),
///         })?;
///         Ok(Some(Reading::new(prefix, 0, "0").with(UV, f64::from(index))))
///     }
///
///     fn name(&self) -> &'static str {
///         "uv"
///     }
/// }
///
/// let mut registry = DecoderRegistry::new();
/// registry.register("UVX", Box::new(UvSensor));
/// match registry.decode("UVX:07") {
///     Dispatch::Reading(reading) => assert_eq!(reading.measurement(UV), Some(7.0)),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
pub trait SensorDecoder: Send {
    fn decode(&mut self, prefix: &str, payload: &str) -> Result<Option<Reading>, DecodeError>;

    /// Short name used in log output
    fn name(&self) -> &'static str;
}

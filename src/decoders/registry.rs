/// Prefix-keyed dispatch of raw frames to decoders
use log::debug;
use std::collections::HashMap;

use super::{BarometricDecoder, HumidityDecoder, OregonDecoder, SensorDecoder, Vn1txDecoder};
use crate::errors::DecodeError;
use crate::models::Reading;

const PREFIX_DELIMITER: char = ':';

/// Handle to a registered decoder, used to alias further prefixes to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderHandle(usize);

/// Outcome of dispatching one input line
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The frame decoded into a Reading
    Reading(Reading),
    /// The frame was accepted but produced no Reading (e.g. calibration data)
    Consumed { prefix: String },
    /// A decoder owns this prefix but rejected the frame
    Rejected { prefix: String, error: DecodeError },
    /// No decoder is registered for the line's prefix
    Unrecognized { line: String },
}

/// Maps frame prefixes to decoder instances
///
/// Decoders live in one list and prefixes index into it, so several
/// prefixes can share a single (possibly stateful) decoder.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn SensorDecoder>>,
    prefixes: HashMap<String, usize>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with every supported protocol family
    ///
    /// # Arguments
    /// * `elevation_m` - Station elevation for the barometric correction
    pub fn with_default_decoders(elevation_m: i32) -> Self {
        let mut registry = Self::new();

        let oregon = registry.register("OS3", Box::new(OregonDecoder));
        registry.alias("OS2", oregon);

        registry.register("VN1", Box::new(Vn1txDecoder));

        let barometric = registry.register("BMX", Box::new(BarometricDecoder::new(elevation_m)));
        for prefix in BarometricDecoder::CONTROL_PREFIXES {
            registry.alias(prefix, barometric);
        }

        let humidity = registry.register("SHT", Box::new(HumidityDecoder));
        registry.alias("DHT", humidity);

        registry
    }

    /// Register a decoder under `prefix`, replacing any previous owner of it
    pub fn register(&mut self, prefix: &str, decoder: Box<dyn SensorDecoder>) -> DecoderHandle {
        self.decoders.push(decoder);
        let handle = DecoderHandle(self.decoders.len() - 1);
        self.alias(prefix, handle);
        handle
    }

    /// Route `prefix` to an already registered decoder
    pub fn alias(&mut self, prefix: &str, handle: DecoderHandle) {
        self.prefixes.insert(prefix.to_string(), handle.0);
    }

    pub fn is_registered(&self, prefix: &str) -> bool {
        self.prefixes.contains_key(prefix)
    }

    /// Decode one `prefix:payload` line
    ///
    /// Lookup is an exact match on the text before the first `:`. A line
    /// without a delimiter is looked up as a whole.
    pub fn decode(&mut self, line: &str) -> Dispatch {
        let line = line.trim_end_matches(['\r', '\n']);
        let (prefix, payload) = line.split_once(PREFIX_DELIMITER).unwrap_or((line, ""));

        let decoder = match self.prefixes.get(prefix) {
            Some(&index) => &mut self.decoders[index],
            None => {
                return Dispatch::Unrecognized {
                    line: line.to_string(),
                }
            }
        };

        match decoder.decode(prefix, payload) {
            Ok(Some(reading)) => Dispatch::Reading(reading),
            Ok(None) => {
                debug!("{} accepted {} frame without a reading", decoder.name(), prefix);
                Dispatch::Consumed {
                    prefix: prefix.to_string(),
                }
            }
            Err(error) => Dispatch::Rejected {
                prefix: prefix.to_string(),
                error,
            },
        }
    }
}

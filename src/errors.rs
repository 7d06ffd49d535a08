/// Error types shared by decoders, sinks and configuration loading
use thiserror::Error;

/// Why a frame did not produce a Reading
///
/// None of these are fatal. The event loop logs them at debug level and
/// moves on to the next line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid hex digit {digit:?} at position {position}")]
    InvalidHex { digit: char, position: usize },

    #[error("frame too short: {actual} nibbles, need at least {minimum}")]
    TooShort { minimum: usize, actual: usize },

    #[error("frame length {actual} does not match {expected} required for {layout}")]
    LengthMismatch {
        layout: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("checksum mismatch: computed {computed:#04x}, frame carries {provided:#04x}")]
    ChecksumMismatch { computed: u8, provided: u8 },

    #[error("unknown message id {0}")]
    UnknownMessageId(u8),

    #[error("malformed {field}: {reason}")]
    MalformedField {
        field: &'static str,
        reason: String,
    },

    #[error("calibration incomplete: {missing} of 11 coefficients still missing")]
    NotCalibrated { missing: u32 },
}

/// Failure while persisting or republishing data
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(String),

    #[error("publish error: {0}")]
    Publish(#[from] rumqttc::ClientError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl From<tokio_postgres::Error> for SinkError {
    fn from(e: tokio_postgres::Error) -> Self {
        SinkError::Database(e.to_string())
    }
}

/// Startup configuration problems, always fatal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

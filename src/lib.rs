//! RF weather sensor ETL
//!
//! Decodes hexadecimal sensor frames (`prefix:payload` lines) into typed
//! readings, summarizes them over fixed windows and hands the summaries to
//! storage and pub/sub sinks. The binary in `main.rs` wires these pieces
//! into one event loop.

pub mod aggregation;
pub mod config;
pub mod database;
pub mod decoders;
pub mod errors;
pub mod input;
pub mod models;
pub mod mqtt;
pub mod utils;

pub use aggregation::{AggregationWindow, StatSink};
pub use decoders::{DecoderRegistry, Dispatch, SensorDecoder};
pub use errors::{ConfigError, DecodeError, SinkError};
pub use models::{AggregatedStat, Reading, SampleKey};

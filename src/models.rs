use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

// Measurement names shared by decoders and the aggregation window
pub const TEMPERATURE: &str = "Temperature";
pub const HUMIDITY: &str = "Humidity";
pub const PRESSURE: &str = "Pressure";
pub const UV: &str = "UV";
pub const WIND_DIR: &str = "WindDir";
pub const CURRENT_WIND: &str = "CurrentWind";
pub const AVERAGE_WIND: &str = "AverageWind";
pub const RAIN_RATE: &str = "RainRate";
pub const RAIN_TOTAL: &str = "RainTotal";

/// Suffix marking angular measurements that need circular statistics
pub const DIRECTIONAL_SUFFIX: &str = "Dir";

/// One decoded frame: station identity plus named measurements
///
/// Decoders build a Reading and hand it out by value; after that the only
/// access is through the getters below.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(rename = "capturedAtUTC", with = "time::serde::rfc3339")]
    captured_at: OffsetDateTime,
    station_id: String,
    channel: u8,
    serial: String,
    measurements: BTreeMap<String, f64>,
}

impl Reading {
    /// Start a Reading captured now, with no measurements yet
    ///
    /// ```
    /// use rf_weather_etl::models::{Reading, TEMPERATURE};
    ///
    /// let reading = Reading::new("SHT", 0, "0").with(TEMPERATURE, 21.5);
    /// assert_eq!(reading.measurement(TEMPERATURE), Some(21.5));
    /// ```
    pub fn new(station_id: impl Into<String>, channel: u8, serial: impl Into<String>) -> Self {
        Self::captured_at(OffsetDateTime::now_utc(), station_id, channel, serial)
    }

    pub fn captured_at(
        captured_at: OffsetDateTime,
        station_id: impl Into<String>,
        channel: u8,
        serial: impl Into<String>,
    ) -> Self {
        Reading {
            captured_at,
            station_id: station_id.into(),
            channel,
            serial: serial.into(),
            measurements: BTreeMap::new(),
        }
    }

    /// Add or replace one named measurement
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.measurements.insert(name.to_string(), value);
        self
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }

    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.captured_at
    }
}

/// Identifies one aggregation bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleKey {
    pub station_id: String,
    pub channel: u8,
    pub serial: String,
    #[serde(rename = "measurementName")]
    pub measurement: String,
}

impl SampleKey {
    pub fn for_measurement(reading: &Reading, measurement: &str) -> Self {
        SampleKey {
            station_id: reading.station_id.clone(),
            channel: reading.channel,
            serial: reading.serial.clone(),
            measurement: measurement.to_string(),
        }
    }

    /// Angular quantities ("WindDir") are summarized with a circular mean
    pub fn is_directional(&self) -> bool {
        self.measurement.ends_with(DIRECTIONAL_SUFFIX)
    }
}

/// Summary of one key over one window
///
/// Serializes flat, the same shape as the storage row:
/// `{timestamp, stationId, channel, serial, measurementName, min, max, mean}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedStat {
    pub timestamp: i64,
    #[serde(flatten)]
    pub key: SampleKey,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// One row returned by the storage range queries
#[derive(Debug, Clone, PartialEq)]
pub struct StatRow {
    pub timestamp: i64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

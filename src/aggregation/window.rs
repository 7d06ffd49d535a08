/// Per-key sample buffering and windowed summary statistics
use log::debug;
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::models::{AggregatedStat, Reading, SampleKey};
use crate::utils::{circular_mean, maximum, mean, minimum};

/// Buffers raw samples per key until the next tick
///
/// The window is owned by the event loop and never shared; `tick` swaps the
/// live buffer for an empty one, so samples ingested afterwards always land
/// in the next window.
#[derive(Debug, Default)]
pub struct AggregationWindow {
    buffer: HashMap<SampleKey, Vec<f64>>,
}

impl AggregationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every measurement of `reading` to its key's buffer
    ///
    /// # Returns
    /// Number of samples appended (zero for a Reading without measurements)
    pub fn ingest(&mut self, reading: &Reading) -> usize {
        for (name, value) in reading.measurements() {
            debug!("Adding {} {} -> {}", reading.station_id(), name, value);
            self.buffer
                .entry(SampleKey::for_measurement(reading, name))
                .or_default()
                .push(*value);
        }
        reading.measurements().len()
    }

    /// Number of keys with samples in the current window
    pub fn pending_keys(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Summarize and reset the window
    ///
    /// Directional keys (name ending in "Dir") report the circular mean as
    /// min, max and mean. Every other key reports arithmetic statistics. All
    /// stats share `at` as their epoch-second timestamp and come out sorted
    /// by key. Keys without samples are never emitted.
    pub fn tick(&mut self, at: OffsetDateTime) -> Vec<AggregatedStat> {
        let snapshot = std::mem::take(&mut self.buffer);
        let timestamp = at.unix_timestamp();

        let mut stats: Vec<AggregatedStat> = snapshot
            .into_iter()
            .filter_map(|(key, values)| summarize(timestamp, key, &values))
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }
}

fn summarize(timestamp: i64, key: SampleKey, values: &[f64]) -> Option<AggregatedStat> {
    let (min, max, mean) = if key.is_directional() {
        let direction = circular_mean(values)?;
        (direction, direction, direction)
    } else {
        (minimum(values)?, maximum(values)?, mean(values)?)
    };

    Some(AggregatedStat {
        timestamp,
        key,
        min,
        max,
        mean,
    })
}

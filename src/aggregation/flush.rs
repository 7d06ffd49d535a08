/// Delivery of window summaries to storage and pub/sub sinks
use async_trait::async_trait;
use log::{error, info};

use crate::errors::SinkError;
use crate::models::AggregatedStat;

/// Consumer of AggregatedStat entries
#[async_trait]
pub trait StatSink: Send {
    async fn insert(&mut self, stat: &AggregatedStat) -> Result<(), SinkError>;

    /// Short name used in log output
    fn name(&self) -> &'static str;
}

/// Delivery counts for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Hand every stat to every sink
///
/// A failure is logged and only affects that stat on that sink; the rest
/// of the tick is still delivered.
pub async fn flush_stats(stats: &[AggregatedStat], sinks: &mut [Box<dyn StatSink>]) -> FlushReport {
    let mut report = FlushReport::default();

    for stat in stats {
        for sink in sinks.iter_mut() {
            match sink.insert(stat).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Failed to deliver {} {}/{}/{} to {}: {}",
                        stat.key.measurement,
                        stat.key.station_id,
                        stat.key.channel,
                        stat.key.serial,
                        sink.name(),
                        e
                    );
                }
            }
        }
    }

    if !stats.is_empty() {
        info!(
            "Flushed {} stats: {} deliveries succeeded, {} failed",
            stats.len(),
            report.delivered,
            report.failed
        );
    }
    report
}

use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};

use rf_weather_etl::aggregation::{
    flush_stats, AggregationWindow, FlushReport, IdleWatchdog, Liveness, StatSink,
};
use rf_weather_etl::config::StationConfig;
use rf_weather_etl::database::PostgresStore;
use rf_weather_etl::decoders::{DecoderRegistry, Dispatch};
use rf_weather_etl::input::{is_reopenable, spawn_line_reader, InputEvent};
use rf_weather_etl::models::Reading;
use rf_weather_etl::mqtt::MqttPublisher;
use rf_weather_etl::utils::format_datetime;

const INPUT_QUEUE_CAPACITY: usize = 256;
const WATCHDOG_CHECKS_PER_TIMEOUT: u32 = 4;
const MQTT_SHUTDOWN_GRACE_SECS: u64 = 2;

/// Run one input line through the registry and log the outcome
///
/// # Returns
/// The decoded Reading, or None when the line produced nothing to publish
fn dispatch_line(registry: &mut DecoderRegistry, line: &str) -> Option<Reading> {
    match registry.decode(line) {
        Dispatch::Reading(reading) => Some(reading),
        Dispatch::Consumed { prefix } => {
            debug!("Consumed {} frame", prefix);
            None
        }
        Dispatch::Rejected { prefix, error } => {
            debug!("Rejected {} frame: {}", prefix, error);
            None
        }
        Dispatch::Unrecognized { line } => {
            // Anything the decoders don't own (boot messages, debug output)
            // is passed through to the log
            info!("{}", line);
            None
        }
    }
}

/// Summarize and deliver whatever the window holds
async fn flush_window(
    window: &mut AggregationWindow,
    sinks: &mut [Box<dyn StatSink>],
) -> FlushReport {
    let now = OffsetDateTime::now_utc();
    info!("Window complete at: {}", format_datetime(&now));

    let stats = window.tick(now);
    if stats.is_empty() {
        warn!("No data collected during this interval!");
    }
    for stat in &stats {
        debug!(
            "{} {}/{}/{}: min {:.2}, max {:.2}, mean {:.2}",
            stat.key.measurement,
            stat.key.station_id,
            stat.key.channel,
            stat.key.serial,
            stat.min,
            stat.max,
            stat.mean
        );
    }
    flush_stats(&stats, sinks).await
}

/// Handle buffered samples at shutdown
async fn finish_window(
    window: &mut AggregationWindow,
    sinks: &mut [Box<dyn StatSink>],
    flush_on_exit: bool,
) -> FlushReport {
    if window.is_empty() {
        return FlushReport::default();
    }
    if flush_on_exit {
        info!("Flushing {} buffered keys before exit", window.pending_keys());
        flush_window(window, sinks).await
    } else {
        info!("Discarding {} buffered keys", window.pending_keys());
        FlushReport::default()
    }
}

async fn main_loop(
    config: StationConfig,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting RF weather station service");

    let mut registry = DecoderRegistry::with_default_decoders(config.elevation_m);
    let mut window = AggregationWindow::new();

    let (publisher, mqtt_task) = MqttPublisher::connect(&config);
    let mut store = PostgresStore::new(&config.database_url);
    if let Err(e) = store.ensure_schema().await {
        // Not fatal: every insert reconnects on its own
        error!("Database not ready: {}", e);
    }
    let mut sinks: Vec<Box<dyn StatSink>> = vec![
        Box::new(store),
        Box::new(publisher.clone()),
    ];

    let (tx, mut rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
    let mut reader = spawn_line_reader(config.input_path.clone(), tx.clone());

    let start = Instant::now();
    let mut watchdog = IdleWatchdog::new(config.idle_timeout, start);

    let mut ticker = interval_at(start + config.average_interval, config.average_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let check_period = config.idle_timeout / WATCHDOG_CHECKS_PER_TIMEOUT;
    let mut watchdog_timer = interval_at(start + check_period, check_period);
    watchdog_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Frames, ticks and watchdog checks are serialized here, so the window
    // never sees an ingest in the middle of a tick
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(InputEvent::Line(line)) => {
                    let Some(reading) = dispatch_line(&mut registry, &line) else {
                        continue;
                    };
                    if let Err(e) = publisher.publish_reading(&reading) {
                        error!("Failed to publish reading from {}: {}", reading.station_id(), e);
                    }
                    window.ingest(&reading);
                    watchdog.record_success(Instant::now());
                }
                Some(InputEvent::Closed) | None => {
                    info!("Input closed");
                    break;
                }
            },
            _ = ticker.tick() => {
                flush_window(&mut window, &mut sinks).await;
            }
            _ = watchdog_timer.tick() => {
                if let Liveness::Stalled { idle } = watchdog.check(Instant::now()) {
                    warn!(
                        "No frames decoded for {} s (limit {} s)",
                        idle.as_secs(),
                        watchdog.idle_timeout().as_secs()
                    );
                    if is_reopenable(&config.input_path) {
                        info!("Reopening input {}", config.input_path);
                        reader.abort();
                        reader = spawn_line_reader(config.input_path.clone(), tx.clone());
                    }
                    watchdog.record_success(Instant::now());
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    reader.abort();
    finish_window(&mut window, &mut sinks, config.flush_on_exit).await;

    publisher.disconnect();
    if timeout(Duration::from_secs(MQTT_SHUTDOWN_GRACE_SECS), mqtt_task)
        .await
        .is_err()
    {
        warn!("MQTT connection did not close in time");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match StationConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        let _ = tx.send(());
    });

    match main_loop(config, rx).await {
        Ok(_) => info!("Program completed successfully"),
        Err(e) => error!("Fatal error: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_weather_etl::errors::SinkError;
    use rf_weather_etl::models::{AggregatedStat, TEMPERATURE};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct RecordingSink(Arc<Mutex<Vec<AggregatedStat>>>);

    #[async_trait]
    impl StatSink for RecordingSink {
        async fn insert(&mut self, stat: &AggregatedStat) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(stat.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn window_with_sample() -> AggregationWindow {
        let mut registry = DecoderRegistry::with_default_decoders(0);
        let reading = dispatch_line(&mut registry, "SHT:00D7,01C2").unwrap();
        let mut window = AggregationWindow::new();
        window.ingest(&reading);
        window
    }

    #[test]
    fn only_measurement_frames_yield_readings() {
        let mut registry = DecoderRegistry::with_default_decoders(0);

        let reading = dispatch_line(&mut registry, "OS3:1D2016B1091073A14").unwrap();
        assert_eq!(reading.measurement(TEMPERATURE), Some(19.0));

        assert!(dispatch_line(&mut registry, "BM0:0198").is_none());
        assert!(dispatch_line(&mut registry, "OS3:1D20485C480882845").is_none());
        assert!(dispatch_line(&mut registry, "WSDL ready").is_none());
    }

    #[tokio::test]
    async fn flush_on_exit_delivers_pending_samples() {
        let stored = Arc::new(Mutex::new(Vec::new()));
        let mut sinks: Vec<Box<dyn StatSink>> = vec![Box::new(RecordingSink(stored.clone()))];
        let mut window = window_with_sample();

        let report = finish_window(&mut window, &mut sinks, true).await;
        assert_eq!(report.delivered, 2);
        assert!(window.is_empty());
        let stored = stored.lock().unwrap();
        let temperature = stored
            .iter()
            .find(|stat| stat.key.measurement == TEMPERATURE)
            .unwrap();
        assert_eq!(temperature.mean, 21.5);
    }

    #[tokio::test]
    async fn pending_samples_are_discarded_by_default() {
        let stored = Arc::new(Mutex::new(Vec::new()));
        let mut sinks: Vec<Box<dyn StatSink>> = vec![Box::new(RecordingSink(stored.clone()))];
        let mut window = window_with_sample();

        let report = finish_window(&mut window, &mut sinks, false).await;
        assert_eq!(report, FlushReport::default());
        assert!(stored.lock().unwrap().is_empty());
    }
}

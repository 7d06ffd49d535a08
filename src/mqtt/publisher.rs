/// MQTT publication of decoded readings and window summaries
use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::aggregation::StatSink;
use crate::config::StationConfig;
use crate::errors::SinkError;
use crate::models::{AggregatedStat, Reading};

const KEEP_ALIVE_SECS: u64 = 30;
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY_SECS: u64 = 5;

/// Publishes readings and summaries to their topics
///
/// Cloning is cheap; every clone feeds the same client and event loop.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    sample_topic: String,
    summary_topic: String,
}

impl MqttPublisher {
    /// Create the client and spawn the task that drives its event loop
    ///
    /// The broker connection is established by that task; publishes issued
    /// before it connects are queued by the client.
    pub fn connect(config: &StationConfig) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let handle = tokio::spawn(drive_event_loop(eventloop));

        let publisher = MqttPublisher {
            client,
            sample_topic: config.sample_topic.clone(),
            summary_topic: config.summary_topic.clone(),
        };
        (publisher, handle)
    }

    /// Publish one decoded Reading as JSON on the sample topic
    ///
    /// Never waits on the broker: when the client's request queue is full
    /// (broker unreachable) the reading is dropped with `SinkError::Publish`.
    pub fn publish_reading(&self, reading: &Reading) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(reading)?;
        debug!(
            "Publishing {} -> {}",
            self.sample_topic,
            String::from_utf8_lossy(&payload)
        );
        self.client
            .try_publish(&self.sample_topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }

    /// Publish one summary as JSON on the summary topic
    ///
    /// Like `publish_reading`, fails instead of waiting when the request
    /// queue is full.
    pub fn publish_stat(&self, stat: &AggregatedStat) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(stat)?;
        self.client
            .try_publish(&self.summary_topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }

    /// Queue a disconnect behind any pending publishes
    ///
    /// The event loop task exits once the disconnect has been sent.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect failed: {}", e);
        }
    }
}

#[async_trait]
impl StatSink for MqttPublisher {
    async fn insert(&mut self, stat: &AggregatedStat) -> Result<(), SinkError> {
        self.publish_stat(stat)
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

/// Poll the event loop until a disconnect goes out; rumqttc reconnects on
/// the next poll after an error, so errors only need logging and a pause
async fn drive_event_loop(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("Connected to MQTT broker"),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from MQTT broker");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {}", e);
                sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TEMPERATURE;
    use tokio::time::timeout;

    fn unreachable_broker() -> StationConfig {
        StationConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://wx@localhost/weather".into()),
            "STATION_ELEVATION" => Some("0".into()),
            "MQTT_BROKER" => Some("tcp://127.0.0.1:1".into()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn publishing_never_blocks_without_a_broker() {
        let (publisher, task) = MqttPublisher::connect(&unreachable_broker());
        let reading = Reading::new("SHT", 0, "0").with(TEMPERATURE, 21.5);

        let failed = timeout(Duration::from_secs(2), async {
            let mut failed = 0;
            for _ in 0..(REQUEST_CAPACITY * 2) {
                if let Err(e) = publisher.publish_reading(&reading) {
                    assert!(matches!(e, SinkError::Publish(_)));
                    failed += 1;
                }
            }
            failed
        })
        .await
        .unwrap();

        assert!(failed > 0);
        task.abort();
    }
}

/// Database operations for storing and querying window summaries
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use crate::aggregation::StatSink;
use crate::database::connection::connect;
use crate::errors::SinkError;
use crate::models::{AggregatedStat, StatRow};

const MAX_RETRIES: usize = 3;
const WAIT_BETWEEN_RETRIES: u64 = 1;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const STATEMENT_TIMEOUT_SECS: u64 = 5;
const OUTAGE_BACKOFF_SECS: u64 = 30;

const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS samples (
        timestamp   BIGINT NOT NULL,
        station_id  TEXT NOT NULL,
        channel     INTEGER NOT NULL,
        serial      TEXT NOT NULL,
        measurement TEXT NOT NULL,
        min         DOUBLE PRECISION NOT NULL,
        max         DOUBLE PRECISION NOT NULL,
        mean        DOUBLE PRECISION NOT NULL
    );
    CREATE INDEX IF NOT EXISTS i_samples ON samples (
        timestamp, measurement, station_id, channel, serial
    );";

const INSERT_STAT: &str = "
    INSERT INTO samples (timestamp, station_id, channel, serial, measurement, min, max, mean)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const QUERY_ROWS: &str = "
    SELECT timestamp, min, max, mean FROM samples
    WHERE measurement = $1 AND station_id LIKE $2 AND timestamp > $3
    ORDER BY timestamp";

const QUERY_FIRST: &str = "
    SELECT mean FROM samples
    WHERE measurement = $1 AND station_id LIKE $2 AND channel = $3 AND timestamp > $4
    ORDER BY timestamp
    LIMIT 1";

const QUERY_LAST: &str = "
    SELECT mean FROM samples
    WHERE measurement = $1 AND station_id LIKE $2 AND channel = $3 AND timestamp > $4
    ORDER BY timestamp DESC
    LIMIT 1";

/// Postgres-backed storage for AggregatedStat rows
///
/// Connects lazily and creates the schema on every new connection. A
/// failed statement drops the connection so the next attempt reconnects.
/// A failed connect marks the database unavailable for a backoff period,
/// during which every call fails immediately instead of waiting on the
/// network again.
pub struct PostgresStore {
    database_url: String,
    client: Option<Client>,
    unavailable_until: Option<Instant>,
}

/// Await `future`, turning an expired deadline into a database error
async fn bounded<T, F>(what: &str, secs: u64, future: F) -> Result<T, SinkError>
where
    F: Future<Output = Result<T, SinkError>>,
{
    match timeout(Duration::from_secs(secs), future).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::Database(format!("{} timed out after {} s", what, secs))),
    }
}

impl PostgresStore {
    pub fn new(database_url: &str) -> Self {
        PostgresStore {
            database_url: database_url.to_string(),
            client: None,
            unavailable_until: None,
        }
    }

    /// False while a recent connect failure is being backed off
    pub fn is_available(&self) -> bool {
        self.unavailable_until
            .map_or(true, |until| Instant::now() >= until)
    }

    async fn client(&mut self) -> Result<&Client, SinkError> {
        if let Some(until) = self.unavailable_until {
            let now = Instant::now();
            if now < until {
                return Err(SinkError::Database(format!(
                    "database unavailable, next connect attempt in {} s",
                    (until - now).as_secs()
                )));
            }
            self.unavailable_until = None;
        }

        if self.client.as_ref().map_or(true, Client::is_closed) {
            let database_url = self.database_url.clone();
            let connected = bounded("connect", CONNECT_TIMEOUT_SECS, async move {
                let client = connect(&database_url).await?;
                client.batch_execute(CREATE_SCHEMA).await?;
                Ok::<Client, SinkError>(client)
            })
            .await;

            match connected {
                Ok(client) => {
                    info!("Connected to database, schema ready");
                    self.client = Some(client);
                }
                Err(e) => {
                    warn!(
                        "Database connect failed, backing off for {} s: {}",
                        OUTAGE_BACKOFF_SECS, e
                    );
                    self.client = None;
                    self.unavailable_until =
                        Some(Instant::now() + Duration::from_secs(OUTAGE_BACKOFF_SECS));
                    return Err(e);
                }
            }
        }

        self.client
            .as_ref()
            .ok_or_else(|| SinkError::Database("no connection".into()))
    }

    /// Connect and create the `samples` table and index if they are missing
    pub async fn ensure_schema(&mut self) -> Result<(), SinkError> {
        self.client().await.map(|_| ())
    }

    /// Run a statement, reconnecting between a bounded number of attempts
    ///
    /// Statement failures are retried. A failed connect is not: the store
    /// is then backing off and a retry would fail the same way.
    async fn execute_with_retry(
        &mut self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, SinkError> {
        let mut last_error = SinkError::Database("no attempt made".into());

        for attempt in 0..MAX_RETRIES {
            let client = self.client().await?;
            let result = bounded("statement", STATEMENT_TIMEOUT_SECS, async {
                client.execute(statement, params).await.map_err(SinkError::from)
            })
            .await;

            match result {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    error!("Attempt {}: {}", attempt + 1, e);
                    self.client = None;
                    last_error = e;
                }
            }

            if attempt < MAX_RETRIES - 1 {
                sleep(Duration::from_secs(WAIT_BETWEEN_RETRIES)).await;
            }
        }

        Err(last_error)
    }

    async fn query(
        &mut self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, SinkError> {
        let client = self.client().await?;
        let result = bounded("query", STATEMENT_TIMEOUT_SECS, async {
            client.query(statement, params).await.map_err(SinkError::from)
        })
        .await;
        if result.is_err() {
            self.client = None;
        }
        result
    }

    /// Store one window summary
    ///
    /// # Arguments
    /// * `stat` - Summary to insert as one `samples` row
    pub async fn store_stat(&mut self, stat: &AggregatedStat) -> Result<(), SinkError> {
        let channel = i32::from(stat.key.channel);
        self.execute_with_retry(
            INSERT_STAT,
            &[
                &stat.timestamp,
                &stat.key.station_id,
                &channel,
                &stat.key.serial,
                &stat.key.measurement,
                &stat.min,
                &stat.max,
                &stat.mean,
            ],
        )
        .await?;
        debug!(
            "Stored {} for {}/{}/{}",
            stat.key.measurement, stat.key.station_id, stat.key.channel, stat.key.serial
        );
        Ok(())
    }

    /// Rows for one measurement after `since`, ordered by timestamp
    ///
    /// # Arguments
    /// * `measurement` - Measurement name, e.g. "Temperature"
    /// * `station_pattern` - SQL LIKE pattern on the station id, e.g. "OS3:%"
    /// * `since` - Exclusive lower bound, epoch seconds
    pub async fn query_rows(
        &mut self,
        measurement: &str,
        station_pattern: &str,
        since: i64,
    ) -> Result<Vec<StatRow>, SinkError> {
        let rows = self
            .query(QUERY_ROWS, &[&measurement, &station_pattern, &since])
            .await?;
        Ok(rows.iter().map(stat_row).collect())
    }

    /// Like `query_rows`, folded into `bucket_secs` wide buckets
    ///
    /// See [`bucket_rows`] for how rows are combined.
    pub async fn query_rows_interval(
        &mut self,
        measurement: &str,
        station_pattern: &str,
        since: i64,
        bucket_secs: i64,
    ) -> Result<Vec<StatRow>, SinkError> {
        if bucket_secs <= 0 {
            return Err(SinkError::InvalidQuery(format!(
                "bucket width must be positive, got {}",
                bucket_secs
            )));
        }
        let rows = self.query_rows(measurement, station_pattern, since).await?;
        Ok(bucket_rows(&rows, bucket_secs))
    }

    /// Earliest mean of a series after `since`
    pub async fn query_first(
        &mut self,
        measurement: &str,
        station_pattern: &str,
        channel: u8,
        since: i64,
    ) -> Result<Option<f64>, SinkError> {
        self.query_single(QUERY_FIRST, measurement, station_pattern, channel, since)
            .await
    }

    /// Latest mean of a series after `since`
    pub async fn query_last(
        &mut self,
        measurement: &str,
        station_pattern: &str,
        channel: u8,
        since: i64,
    ) -> Result<Option<f64>, SinkError> {
        self.query_single(QUERY_LAST, measurement, station_pattern, channel, since)
            .await
    }

    async fn query_single(
        &mut self,
        statement: &str,
        measurement: &str,
        station_pattern: &str,
        channel: u8,
        since: i64,
    ) -> Result<Option<f64>, SinkError> {
        let channel = i32::from(channel);
        let rows = self
            .query(statement, &[&measurement, &station_pattern, &channel, &since])
            .await?;
        Ok(rows.first().map(|row| row.get(0)))
    }
}

fn stat_row(row: &Row) -> StatRow {
    StatRow {
        timestamp: row.get(0),
        min: row.get(1),
        max: row.get(2),
        mean: row.get(3),
    }
}

/// Fold rows into `bucket_secs` wide buckets keyed by the bucket's start
///
/// Each bucket reports the lowest min, highest max and the average of the
/// means inside it. Buckets come out in ascending order.
pub fn bucket_rows(rows: &[StatRow], bucket_secs: i64) -> Vec<StatRow> {
    // bucket start -> (min, max, sum of means, count)
    let mut buckets: BTreeMap<i64, (f64, f64, f64, usize)> = BTreeMap::new();

    for row in rows {
        let start = row.timestamp.div_euclid(bucket_secs) * bucket_secs;
        let entry = buckets
            .entry(start)
            .or_insert((row.min, row.max, 0.0, 0));
        entry.0 = entry.0.min(row.min);
        entry.1 = entry.1.max(row.max);
        entry.2 += row.mean;
        entry.3 += 1;
    }

    buckets
        .into_iter()
        .map(|(timestamp, (min, max, sum, count))| StatRow {
            timestamp,
            min,
            max,
            mean: sum / count as f64,
        })
        .collect()
}

#[async_trait]
impl StatSink for PostgresStore {
    async fn insert(&mut self, stat: &AggregatedStat) -> Result<(), SinkError> {
        self.store_stat(stat).await
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SampleKey, TEMPERATURE};

    fn row(timestamp: i64, min: f64, max: f64, mean: f64) -> StatRow {
        StatRow {
            timestamp,
            min,
            max,
            mean,
        }
    }

    fn stat(station_id: &str, timestamp: i64, mean: f64) -> AggregatedStat {
        AggregatedStat {
            timestamp,
            key: SampleKey {
                station_id: station_id.to_string(),
                channel: 1,
                serial: "85".into(),
                measurement: TEMPERATURE.into(),
            },
            min: mean - 1.0,
            max: mean + 1.0,
            mean,
        }
    }

    #[test]
    fn rows_fold_into_buckets() {
        let rows = [
            row(3_600, 10.0, 12.0, 11.0),
            row(3_900, 9.0, 11.0, 10.0),
            row(7_199, 8.0, 14.0, 12.0),
            row(7_200, 5.0, 6.0, 5.5),
        ];

        assert_eq!(
            bucket_rows(&rows, 3_600),
            vec![row(3_600, 8.0, 14.0, 11.0), row(7_200, 5.0, 6.0, 5.5)]
        );
    }

    #[test]
    fn bucket_starts_round_down() {
        let rows = [row(-1, 1.0, 1.0, 1.0), row(599, 2.0, 2.0, 2.0)];
        let buckets = bucket_rows(&rows, 300);
        assert_eq!(buckets[0].timestamp, -300);
        assert_eq!(buckets[1].timestamp, 300);
        assert!(bucket_rows(&[], 300).is_empty());
    }

    #[tokio::test]
    async fn zero_bucket_width_is_rejected_before_querying() {
        let mut store = PostgresStore::new("postgres://wx@127.0.0.1:1/weather");
        assert!(matches!(
            store.query_rows_interval(TEMPERATURE, "%", 0, 0).await,
            Err(SinkError::InvalidQuery(_))
        ));
        assert!(store.is_available());
    }

    #[tokio::test]
    async fn refused_connection_backs_off() {
        let mut store = PostgresStore::new("postgres://wx@127.0.0.1:1/weather");
        let stat = stat("OS3:1D20", 1_700_000_000, 20.0);

        assert!(store.store_stat(&stat).await.is_err());
        assert!(!store.is_available());

        // Later keys in the same tick fail without touching the network
        let started = Instant::now();
        for _ in 0..5 {
            assert!(store.store_stat(&stat).await.is_err());
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    /// Runs against a real server only when DATABASE_URL is set
    #[tokio::test]
    async fn stored_rows_come_back_through_queries() {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let mut store = PostgresStore::new(&database_url);
        let station_id = format!(
            "TEST:{}",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        );
        let since = 1_000_000_000;

        for (offset, mean) in [(0, 20.0), (60, 22.0), (400, 30.0)] {
            store
                .store_stat(&stat(&station_id, since + 300 + offset, mean))
                .await
                .unwrap();
        }

        let rows = store.query_rows(TEMPERATURE, &station_id, since).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].mean, 20.0);

        let buckets = store
            .query_rows_interval(TEMPERATURE, &station_id, since, 300)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].mean, 21.0);
        assert_eq!(buckets[0].min, 19.0);
        assert_eq!(buckets[0].max, 23.0);

        assert_eq!(
            store.query_first(TEMPERATURE, &station_id, 1, since).await.unwrap(),
            Some(20.0)
        );
        assert_eq!(
            store.query_last(TEMPERATURE, &station_id, 1, since).await.unwrap(),
            Some(30.0)
        );
        assert_eq!(
            store.query_last(TEMPERATURE, &station_id, 2, since).await.unwrap(),
            None
        );
    }
}

//! SQLite-backed time-series store.
//!
//! Three append-only tables: `weather_log`, `sensor_log`, `system_events`.
//! Sensor samples additionally go through a rolling multi-tier compaction
//! (`compact_sensor_data`) that replaces aged raw rows with bucket averages:
//!
//! - newer than 1 hour: untouched (level 0)
//! - 1–24 hours old:    5-minute averages (level 1)
//! - 24 hours–7 days:   30-minute averages (level 2)
//! - older than 7 days: deleted
//!
//! Timestamps are stored as ISO 8601 text with an explicit UTC offset;
//! compacted bucket rows use the fixed `%Y-%m-%dT%H:%M:00Z` form so the
//! stored strings keep sorting chronologically.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};

use super::models::{EventRow, SensorHistoryRow, SensorRow, WeatherRow};

/// Maximum number of pooled connections for an on-disk database.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;

/// Retention horizon for sensor samples (days).
const RETENTION_DAYS: i64 = 7;

/// Samples older than this are compacted to 30-minute buckets (hours).
const LEVEL_2_AGE_HOURS: i64 = 24;

/// Samples older than this are compacted to 5-minute buckets (hours).
const LEVEL_1_AGE_HOURS: i64 = 1;

/// SQLite-backed logging store. Cheap to clone; all clones share one pool,
/// which the store owns for the process lifetime.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Serialize a timestamp the way the store expects it on disk.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

impl Store {
    /// Open (creating if necessary) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(DB_POOL_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open a private in-memory database (tests, unconfigured deployments).
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        // A single never-recycled connection keeps every handle on the same
        // in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS weather_log (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT    NOT NULL,
                temperature    REAL,
                precipitation  REAL,
                humidity       REAL,
                wind_speed     REAL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sensor_log (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT    NOT NULL,
                sensor_id TEXT    NOT NULL,
                value     REAL    NOT NULL,
                compacted INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system_events (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp  TEXT    NOT NULL,
                event_type TEXT    NOT NULL,
                message    TEXT    NOT NULL DEFAULT ''
            )",
        )
        .execute(&self.pool)
        .await?;

        // Databases created before compaction existed lack the tier column.
        let columns = sqlx::query("PRAGMA table_info(sensor_log)")
            .fetch_all(&self.pool)
            .await?;
        let has_compacted = columns
            .iter()
            .any(|row| row.get::<String, _>("name") == "compacted");
        if !has_compacted {
            sqlx::query("ALTER TABLE sensor_log ADD COLUMN compacted INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sensor_log_timestamp ON sensor_log (timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sensor_log_compacted_timestamp \
             ON sensor_log (compacted, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn log_weather(
        &self,
        temperature: Option<f64>,
        precipitation: Option<f64>,
        humidity: Option<f64>,
        wind_speed: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        let ts = format_timestamp(timestamp.unwrap_or_else(Utc::now));
        sqlx::query(
            "INSERT INTO weather_log (timestamp, temperature, precipitation, humidity, wind_speed) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ts)
        .bind(temperature)
        .bind(precipitation)
        .bind(humidity)
        .bind(wind_speed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn log_sensor(
        &self,
        sensor_id: &str,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        let ts = format_timestamp(timestamp.unwrap_or_else(Utc::now));
        sqlx::query("INSERT INTO sensor_log (timestamp, sensor_id, value) VALUES (?, ?, ?)")
            .bind(ts)
            .bind(sensor_id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn log_event(
        &self,
        event_type: &str,
        message: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        let ts = format_timestamp(timestamp.unwrap_or_else(Utc::now));
        sqlx::query("INSERT INTO system_events (timestamp, event_type, message) VALUES (?, ?, ?)")
            .bind(ts)
            .bind(event_type)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listing queries (newest first)
    // -----------------------------------------------------------------------

    pub async fn get_weather_log(&self, limit: i64) -> Result<Vec<WeatherRow>, sqlx::Error> {
        sqlx::query_as::<_, WeatherRow>(
            "SELECT id, timestamp, temperature, precipitation, humidity, wind_speed \
             FROM weather_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_sensor_log(
        &self,
        sensor_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SensorRow>, sqlx::Error> {
        match sensor_id {
            Some(id) => {
                sqlx::query_as::<_, SensorRow>(
                    "SELECT id, timestamp, sensor_id, value, compacted \
                     FROM sensor_log WHERE sensor_id = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, SensorRow>(
                    "SELECT id, timestamp, sensor_id, value, compacted \
                     FROM sensor_log ORDER BY id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
    }

    pub async fn get_events(&self, limit: i64) -> Result<Vec<EventRow>, sqlx::Error> {
        sqlx::query_as::<_, EventRow>(
            "SELECT id, timestamp, event_type, message \
             FROM system_events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    // -----------------------------------------------------------------------
    // History queries (oldest first)
    // -----------------------------------------------------------------------

    /// Pivoted sensor history for the last `hours` hours, ascending in time.
    ///
    /// With `limit == 0`, or when the window holds no more distinct
    /// timestamps than `limit`, rows are grouped by their exact stored
    /// timestamp (one poll cycle shares one timestamp, so a group is one
    /// cycle). Otherwise samples are averaged per sensor into
    /// `hours * 3600 / limit`-second buckets keyed by the bucket's lower
    /// boundary.
    pub async fn get_sensor_history(
        &self,
        hours: i64,
        limit: usize,
    ) -> Result<Vec<SensorHistoryRow>, sqlx::Error> {
        let cutoff = format_timestamp(Utc::now() - Duration::hours(hours));
        let rows = sqlx::query_as::<_, SensorRow>(
            "SELECT id, timestamp, sensor_id, value, compacted \
             FROM sensor_log WHERE timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let distinct = {
            let mut count = 0usize;
            let mut last: Option<&str> = None;
            for row in &rows {
                if last != Some(row.timestamp.as_str()) {
                    count += 1;
                    last = Some(row.timestamp.as_str());
                }
            }
            count
        };

        if limit == 0 || distinct <= limit {
            return Ok(pivot_exact(&rows));
        }

        Ok(pivot_bucketed(&rows, hours, limit))
    }

    /// Heating-related events (automatic and manual) in the last `hours`
    /// hours, ascending in time.
    pub async fn get_heating_periods(&self, hours: i64) -> Result<Vec<EventRow>, sqlx::Error> {
        let cutoff = format_timestamp(Utc::now() - Duration::hours(hours));
        sqlx::query_as::<_, EventRow>(
            "SELECT id, timestamp, event_type, message \
             FROM system_events \
             WHERE timestamp >= ? \
               AND event_type IN ('heating_on', 'heating_off', 'manual_on', 'manual_off') \
             ORDER BY timestamp ASC",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    /// Run the rolling compaction of `sensor_log` in a single transaction.
    ///
    /// Passes, in order:
    /// 1. delete rows older than 7 days;
    /// 2. compact [7 d, 24 h) to level 2 with 30-minute buckets;
    /// 3. compact [24 h, 1 h) to level 1 with 5-minute buckets.
    ///
    /// Level 2 runs before level 1 so a raw row aging past 24 hours lifts
    /// straight to a 30-minute bucket. Idempotent: a second run finds no
    /// rows below the target level in either window.
    pub async fn compact_sensor_data(&self) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let t_7d = format_timestamp(now - Duration::days(RETENTION_DAYS));
        let t_24h = format_timestamp(now - Duration::hours(LEVEL_2_AGE_HOURS));
        let t_1h = format_timestamp(now - Duration::hours(LEVEL_1_AGE_HOURS));

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sensor_log WHERE timestamp < ?")
            .bind(&t_7d)
            .execute(&mut *tx)
            .await?;

        compact_window(&mut tx, &t_7d, &t_24h, 2, 30).await?;
        compact_window(&mut tx, &t_24h, &t_1h, 1, 5).await?;

        tx.commit().await
    }

    /// Close the pool. Called once on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Compact one window `[from, to)` to `level` with `bucket_minutes` buckets.
///
/// Each `(bucket, sensor_id)` group of rows below the target level becomes a
/// single averaged row stamped with the bucket start (minutes truncated to
/// the slot within the UTC hour, fixed `:00Z` suffix); the source rows are
/// deleted in the same transaction.
async fn compact_window(
    tx: &mut Transaction<'_, Sqlite>,
    from: &str,
    to: &str,
    level: i64,
    bucket_minutes: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sensor_log (timestamp, sensor_id, value, compacted) \
         SELECT strftime('%Y-%m-%dT%H:', timestamp) \
                || printf('%02d', (CAST(strftime('%M', timestamp) AS INTEGER) / ?3) * ?3) \
                || ':00Z' AS bucket_ts, \
                sensor_id, AVG(value), ?4 \
         FROM sensor_log \
         WHERE timestamp >= ?1 AND timestamp < ?2 AND compacted < ?4 \
         GROUP BY bucket_ts, sensor_id",
    )
    .bind(from)
    .bind(to)
    .bind(bucket_minutes)
    .bind(level)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM sensor_log WHERE timestamp >= ?1 AND timestamp < ?2 AND compacted < ?3")
        .bind(from)
        .bind(to)
        .bind(level)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Group rows by exact stored timestamp (rows arrive sorted ascending).
fn pivot_exact(rows: &[SensorRow]) -> Vec<SensorHistoryRow> {
    let mut out: Vec<SensorHistoryRow> = Vec::new();
    for row in rows {
        let same_group = out
            .last()
            .is_some_and(|last| last.timestamp == row.timestamp);
        if !same_group {
            out.push(SensorHistoryRow {
                timestamp: row.timestamp.clone(),
                ..SensorHistoryRow::default()
            });
        }
        if let Some(current) = out.last_mut() {
            current.set_value(&row.sensor_id, row.value);
        }
    }
    out
}

/// Downsample rows into `hours * 3600 / limit`-second buckets, averaging per
/// sensor, keyed by the bucket's lower boundary.
fn pivot_bucketed(rows: &[SensorRow], hours: i64, limit: usize) -> Vec<SensorHistoryRow> {
    let bucket_seconds = ((hours * 3600) / limit as i64).max(1);

    // bucket epoch -> sensor_id -> (sum, count)
    let mut buckets: BTreeMap<i64, BTreeMap<&str, (f64, u32)>> = BTreeMap::new();
    for row in rows {
        let Ok(parsed) = DateTime::parse_from_rfc3339(&row.timestamp) else {
            continue;
        };
        let epoch = parsed.timestamp();
        let bucket = epoch.div_euclid(bucket_seconds) * bucket_seconds;
        let entry = buckets
            .entry(bucket)
            .or_default()
            .entry(row.sensor_id.as_str())
            .or_insert((0.0, 0));
        entry.0 += row.value;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .filter_map(|(bucket, sensors)| {
            let start = DateTime::<Utc>::from_timestamp(bucket, 0)?;
            let mut row = SensorHistoryRow {
                timestamp: start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                ..SensorHistoryRow::default()
            };
            for (sensor_id, (sum, count)) in sensors {
                row.set_value(sensor_id, sum / count as f64);
            }
            Some(row)
        })
        .collect()
}

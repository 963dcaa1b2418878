use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::structures::{HashIndex, ReadingList};
use crate::types::{CancelFlag, CleanReading, Measurements};
use crate::error::LoadError;

/// Per-batch write counts: rows actually inserted vs. rows already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub inserted: u64,
    pub skipped: u64,
}

/// Storage capability the loader writes against. Any store with idempotent
/// upsert-by-key and atomic batches satisfies it.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Cheap reachability probe, used as a run-start precondition.
    async fn ping(&self) -> Result<(), LoadError>;

    /// Applies one batch atomically. Rows whose (station, timestamp) key
    /// already exists are skipped, never duplicated.
    async fn upsert_batch(&self, batch: &[CleanReading]) -> Result<BatchCounts, LoadError>;

    async fn readings_for_station(&self, station_id: &str)
        -> Result<Vec<CleanReading>, LoadError>;

    async fn total_rows(&self) -> Result<u64, LoadError>;
}

/// SQLite-backed store. The (station_id, recorded_at) primary key plus
/// `INSERT OR IGNORE` inside a transaction gives idempotent, atomic batches.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LoadError::StorageUnavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| LoadError::StorageUnavailable(e.to_string()))?;
        Self::init(conn)
    }

    /// Private in-memory database, handy for tests.
    pub fn open_in_memory() -> Result<Self, LoadError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LoadError::StorageUnavailable(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LoadError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS weather_readings (
                station_id   TEXT NOT NULL,
                recorded_at  TEXT NOT NULL,
                temperature  REAL,
                humidity     REAL,
                rainfall     REAL,
                wind_speed   REAL,
                pressure     REAL,
                PRIMARY KEY (station_id, recorded_at)
            );
            "#,
        )
        .map_err(|e| LoadError::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Canonical timestamp encoding; must stay stable, it is half the upsert key.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn ping(&self) -> Result<(), LoadError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| LoadError::StorageUnavailable(e.to_string()))
    }

    async fn upsert_batch(&self, batch: &[CleanReading]) -> Result<BatchCounts, LoadError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| LoadError::BatchWriteFailed(e.to_string()))?;
        let mut inserted = 0u64;
        for reading in batch {
            let m = &reading.measurements;
            let changed = tx
                .execute(
                    "INSERT OR IGNORE INTO weather_readings
                     (station_id, recorded_at, temperature, humidity, rainfall, wind_speed, pressure)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        reading.station_id,
                        encode_ts(reading.timestamp),
                        m.temperature_c,
                        m.humidity_pct,
                        m.rainfall_mm,
                        m.wind_speed_ms,
                        m.pressure_pa,
                    ],
                )
                .map_err(|e| LoadError::BatchWriteFailed(e.to_string()))?;
            inserted += changed as u64;
        }
        tx.commit()
            .map_err(|e| LoadError::BatchWriteFailed(e.to_string()))?;
        Ok(BatchCounts {
            inserted,
            skipped: batch.len() as u64 - inserted,
        })
    }

    async fn readings_for_station(
        &self,
        station_id: &str,
    ) -> Result<Vec<CleanReading>, LoadError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT recorded_at, temperature, humidity, rainfall, wind_speed, pressure
                 FROM weather_readings WHERE station_id = ?1 ORDER BY recorded_at",
            )
            .map_err(|e| LoadError::StorageUnavailable(e.to_string()))?;
        let rows = stmt
            .query_map(params![station_id], |row| {
                let recorded_at: String = row.get(0)?;
                Ok((
                    recorded_at,
                    Measurements {
                        temperature_c: row.get(1)?,
                        humidity_pct: row.get(2)?,
                        rainfall_mm: row.get(3)?,
                        wind_speed_ms: row.get(4)?,
                        pressure_pa: row.get(5)?,
                    },
                ))
            })
            .map_err(|e| LoadError::StorageUnavailable(e.to_string()))?;

        let mut readings = Vec::new();
        for row in rows {
            let (recorded_at, measurements) =
                row.map_err(|e| LoadError::StorageUnavailable(e.to_string()))?;
            let timestamp = DateTime::parse_from_rfc3339(&recorded_at)
                .map_err(|e| LoadError::StorageUnavailable(format!("bad stored timestamp: {e}")))?
                .with_timezone(&Utc);
            readings.push(CleanReading {
                station_id: station_id.to_string(),
                timestamp,
                measurements,
            });
        }
        Ok(readings)
    }

    async fn total_rows(&self) -> Result<u64, LoadError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM weather_readings", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(|e| LoadError::StorageUnavailable(e.to_string()))
    }
}

/// In-memory store for development and tests.
pub struct InMemoryStore {
    rows: Mutex<HashMap<(String, DateTime<Utc>), CleanReading>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingStore for InMemoryStore {
    async fn ping(&self) -> Result<(), LoadError> {
        Ok(())
    }

    async fn upsert_batch(&self, batch: &[CleanReading]) -> Result<BatchCounts, LoadError> {
        let mut rows = self.rows.lock().unwrap();
        let mut counts = BatchCounts::default();
        for reading in batch {
            if rows.contains_key(&reading.key()) {
                counts.skipped += 1;
            } else {
                rows.insert(reading.key(), reading.clone());
                counts.inserted += 1;
            }
        }
        Ok(counts)
    }

    async fn readings_for_station(
        &self,
        station_id: &str,
    ) -> Result<Vec<CleanReading>, LoadError> {
        let rows = self.rows.lock().unwrap();
        let mut readings: Vec<CleanReading> = rows
            .values()
            .filter(|r| r.station_id == station_id)
            .cloned()
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        Ok(readings)
    }

    async fn total_rows(&self) -> Result<u64, LoadError> {
        Ok(self.rows.lock().unwrap().len() as u64)
    }
}

/// Result of persisting one transform batch.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub inserted: u64,
    pub skipped: u64,
    pub batches: usize,
    /// Failed batches are recorded, not raised; the run continues.
    pub failed: Vec<LoadError>,
}

/// Batches cleaned readings per station and writes them through a
/// [`ReadingStore`]. Readings are staged in per-station linked buffers so
/// each batch targets a single station in append order.
pub struct Loader {
    store: Arc<dyn ReadingStore>,
    batch_size: usize,
}

impl Loader {
    pub fn new(store: Arc<dyn ReadingStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    pub async fn persist(&self, readings: Vec<CleanReading>, cancel: &CancelFlag) -> LoadReport {
        let mut report = LoadReport::default();
        if readings.is_empty() {
            return report;
        }

        // Stage per station, keeping first-seen station order
        let mut order: Vec<String> = Vec::new();
        let mut buffers: HashIndex<String, ReadingList<CleanReading>> = HashIndex::new();
        for reading in readings {
            let station = reading.station_id.clone();
            match buffers.get_mut(&station) {
                Some(buffer) => buffer.append(reading),
                None => {
                    let mut buffer = ReadingList::new();
                    buffer.append(reading);
                    buffers.insert(station.clone(), buffer);
                    order.push(station);
                }
            }
        }

        for station in order {
            let Some(buffer) = buffers.get_mut(&station) else {
                continue;
            };
            debug!(station = %station, staged = buffer.len(), "flushing station buffer");
            let staged: Vec<CleanReading> = buffer.drain().collect();
            for batch in staged.chunks(self.batch_size) {
                if cancel.is_cancelled() {
                    info!("cancellation requested; no further batches issued");
                    return report;
                }
                match self.store.upsert_batch(batch).await {
                    Ok(counts) => {
                        report.inserted += counts.inserted;
                        report.skipped += counts.skipped;
                        report.batches += 1;
                    }
                    Err(err) => {
                        warn!(station = %station, error = %err, rows = batch.len(),
                              "batch write failed; continuing with next batch");
                        report.failed.push(err);
                    }
                }
            }
        }
        report
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ExtractError, LoadError, RejectReason};

/// Cooperative cancellation for an in-flight run. Cancelling stops new page
/// and batch requests promptly; committed batches are never rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One weather station from the upstream catalog. Immutable after resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationDescriptor {
    /// Stable upstream identifier, a zero-padded decimal string (e.g. "24").
    pub id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Extra upstream fields (dataset id, commune, ...) kept verbatim.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StationDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude: None,
            longitude: None,
            metadata: HashMap::new(),
        }
    }

    /// Numeric ordering key for the sorted station index.
    pub fn numeric_id(&self) -> Option<u32> {
        self.id.trim().parse().ok()
    }
}

/// A reading exactly as fetched from the upstream API, after vendor-field
/// aliasing but before any cleaning. Values may be strings, numbers or null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    pub station_id: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
}

impl RawReading {
    pub fn new(station_id: impl Into<String>) -> Self {
        Self {
            station_id: Some(station_id.into()),
            timestamp: None,
            values: HashMap::new(),
        }
    }
}

/// Validated measurement fields. `None` means the upstream value was missing,
/// non-numeric or physically implausible; it is never a sentinel like zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Measurements {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub rainfall_mm: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub pressure_pa: Option<f64>,
}

impl Measurements {
    pub fn present_count(&self) -> usize {
        [
            self.temperature_c,
            self.humidity_pct,
            self.rainfall_mm,
            self.wind_speed_ms,
            self.pressure_pa,
        ]
        .iter()
        .filter(|m| m.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.present_count() == 0
    }
}

/// A cleaned, validated reading ready for persistence.
///
/// Invariant: `station_id` refers to a known station, `timestamp` is a valid
/// UTC instant, and at least one measurement field is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanReading {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub measurements: Measurements,
}

impl CleanReading {
    /// Natural idempotency key used by the loader.
    pub fn key(&self) -> (String, DateTime<Utc>) {
        (self.station_id.clone(), self.timestamp)
    }
}

/// Pipeline stages, in run order.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Transform => write!(f, "transform"),
            Stage::Load => write!(f, "load"),
        }
    }
}

/// A stage-level failure recorded in the run report instead of aborting the run.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    /// Station being processed when the failure occurred, if any.
    pub station_id: Option<String>,
    pub message: String,
}

impl StageFailure {
    pub fn extract(station_id: &str, err: &ExtractError) -> Self {
        Self {
            stage: Stage::Extract,
            station_id: Some(station_id.to_string()),
            message: err.to_string(),
        }
    }

    pub fn load(station_id: Option<&str>, err: &LoadError) -> Self {
        Self {
            stage: Stage::Load,
            station_id: station_id.map(|s| s.to_string()),
            message: err.to_string(),
        }
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

/// Result of one complete pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub fetched: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub stored_new: u64,
    pub stored_skipped: u64,
    pub stations_processed: usize,
    /// Requested identifiers that did not resolve to a known station.
    pub unresolved: Vec<String>,
    pub rejections: HashMap<String, usize>,
    pub failures: Vec<StageFailure>,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            fetched: 0,
            accepted: 0,
            rejected: 0,
            duplicates: 0,
            stored_new: 0,
            stored_skipped: 0,
            stations_processed: 0,
            unresolved: Vec::new(),
            rejections: HashMap::new(),
            failures: Vec::new(),
            success: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_rejection(&mut self, reason: RejectReason) {
        self.rejected += 1;
        *self.rejections.entry(reason.to_string()).or_insert(0) += 1;
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

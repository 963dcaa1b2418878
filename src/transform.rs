use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::TransformConfig;
use crate::error::RejectReason;
use crate::types::{CleanReading, Measurements, RawReading};

/// One dropped record with the rule that rejected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position of the record in the input batch.
    pub index: usize,
    pub station_id: Option<String>,
    pub reason: RejectReason,
}

/// Output of one transform batch.
#[derive(Debug, Default)]
pub struct TransformOutcome {
    pub readings: Vec<CleanReading>,
    pub rejections: Vec<Rejection>,
    /// Records collapsed by in-batch (station, timestamp) deduplication.
    pub duplicates: usize,
}

/// Cleans, validates, normalizes and deduplicates raw readings.
///
/// Deterministic and total: malformed input is classified and dropped, never
/// propagated as a fault.
pub struct Transformer {
    known_stations: HashSet<String>,
    rules: TransformConfig,
    min_epoch: DateTime<Utc>,
}

impl Transformer {
    pub fn new(known_stations: impl IntoIterator<Item = String>, rules: TransformConfig) -> Self {
        let min_epoch = DateTime::parse_from_rfc3339(&rules.min_epoch)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            known_stations: known_stations.into_iter().collect(),
            rules,
            min_epoch,
        }
    }

    pub fn transform(&self, batch: Vec<RawReading>) -> TransformOutcome {
        self.transform_at(batch, Utc::now())
    }

    /// Like [`transform`](Self::transform) with an explicit "now", so the
    /// clock-skew rule stays testable.
    pub fn transform_at(&self, batch: Vec<RawReading>, now: DateTime<Utc>) -> TransformOutcome {
        let mut outcome = TransformOutcome::default();
        // (station, timestamp) -> position in outcome.readings
        let mut seen: HashMap<(String, DateTime<Utc>), usize> = HashMap::new();

        for (index, raw) in batch.into_iter().enumerate() {
            let clean = match self.clean_one(&raw, now) {
                Ok(clean) => clean,
                Err(reason) => {
                    debug!(index, station = ?raw.station_id, %reason, "record rejected");
                    outcome.rejections.push(Rejection {
                        index,
                        station_id: raw.station_id.clone(),
                        reason,
                    });
                    continue;
                }
            };

            match seen.get(&clean.key()) {
                None => {
                    seen.insert(clean.key(), outcome.readings.len());
                    outcome.readings.push(clean);
                }
                Some(&pos) => {
                    outcome.duplicates += 1;
                    // Keep the more complete record; first-seen wins ties
                    let kept = &outcome.readings[pos];
                    if clean.measurements.present_count() > kept.measurements.present_count() {
                        outcome.readings[pos] = clean;
                    }
                }
            }
        }
        outcome
    }

    fn clean_one(
        &self,
        raw: &RawReading,
        now: DateTime<Utc>,
    ) -> std::result::Result<CleanReading, RejectReason> {
        let station_id = raw
            .station_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(RejectReason::UnknownStation)?;
        if !self.known_stations.contains(station_id) {
            return Err(RejectReason::UnknownStation);
        }

        let timestamp = raw
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or(RejectReason::InvalidTimestamp)?;
        let skew = chrono::Duration::seconds(self.rules.clock_skew_seconds);
        if timestamp < self.min_epoch || timestamp > now + skew {
            return Err(RejectReason::InvalidTimestamp);
        }

        let measurements = self.validate_measurements(&raw.values);
        if measurements.is_empty() {
            return Err(RejectReason::NoUsableData);
        }

        Ok(CleanReading {
            station_id: station_id.to_string(),
            timestamp,
            measurements,
        })
    }

    /// Validates each field independently; an implausible or non-numeric
    /// value marks that field absent instead of rejecting the record.
    fn validate_measurements(&self, values: &HashMap<String, Value>) -> Measurements {
        let get = |key: &str| values.get(key).and_then(numeric);
        Measurements {
            temperature_c: get("temperature").filter(|t| {
                (self.rules.temperature_min_c..=self.rules.temperature_max_c).contains(t)
            }),
            humidity_pct: get("humidity")
                .map(normalize_humidity)
                .filter(|h| (0.0..=100.0).contains(h)),
            rainfall_mm: get("rainfall").filter(|r| *r >= 0.0),
            wind_speed_ms: get("wind_speed").filter(|w| *w >= 0.0),
            pressure_pa: get("pressure")
                .map(normalize_pressure)
                .filter(|p| (self.rules.pressure_min_pa..=self.rules.pressure_max_pa).contains(p)),
        }
    }
}

/// Accepts JSON numbers and numeric strings; anything else is absent.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Some upstreams report relative humidity as a 0..=1 fraction.
fn normalize_humidity(h: f64) -> f64 {
    if (0.0..=1.0).contains(&h) {
        h * 100.0
    } else {
        h
    }
}

/// Pressure in the 800..=1100 span is read as hPa and converted to Pa.
fn normalize_pressure(p: f64) -> f64 {
    if (800.0..=1100.0).contains(&p) {
        p * 100.0
    } else {
        p
    }
}

/// Parses the timestamp formats the upstream is known to emit. Naive
/// timestamps are taken as UTC. Sub-second precision is dropped here, in one
/// place: the store key is second-precision RFC 3339, and the dedup key must
/// not be finer than the upsert key.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let parsed = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        Some(dt.with_timezone(&Utc))
    } else {
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    };
    parsed.and_then(|dt| dt.with_nanosecond(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn transformer() -> Transformer {
        Transformer::new(
            ["24", "25"].map(String::from),
            TransformConfig::default(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn raw(station: &str, ts: &str, values: &[(&str, Value)]) -> RawReading {
        let mut reading = RawReading::new(station);
        reading.timestamp = Some(ts.to_string());
        for (k, v) in values {
            reading.values.insert(k.to_string(), v.clone());
        }
        reading
    }

    #[test]
    fn valid_record_is_accepted() {
        let out = transformer().transform_at(
            vec![raw(
                "24",
                "2024-05-01T10:00:00+00:00",
                &[("temperature", json!(21.5)), ("humidity", json!(55))],
            )],
            now(),
        );
        assert_eq!(out.readings.len(), 1);
        assert!(out.rejections.is_empty());
        let m = out.readings[0].measurements;
        assert_eq!(m.temperature_c, Some(21.5));
        assert_eq!(m.humidity_pct, Some(55.0));
        assert_eq!(m.rainfall_mm, None);
    }

    #[test]
    fn unknown_station_is_rejected() {
        let out = transformer().transform_at(
            vec![raw("99", "2024-05-01T10:00:00Z", &[("temperature", json!(20))])],
            now(),
        );
        assert!(out.readings.is_empty());
        assert_eq!(out.rejections[0].reason, RejectReason::UnknownStation);
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let mut reading = RawReading::new("24");
        reading.values.insert("temperature".into(), json!(20));
        let out = transformer().transform_at(vec![reading], now());
        assert!(out.readings.is_empty());
        assert_eq!(out.rejections[0].reason, RejectReason::InvalidTimestamp);
    }

    #[test]
    fn future_timestamp_beyond_skew_is_rejected() {
        let out = transformer().transform_at(
            vec![raw("24", "2024-06-01T13:00:00Z", &[("temperature", json!(20))])],
            now(),
        );
        assert_eq!(out.rejections[0].reason, RejectReason::InvalidTimestamp);

        // Within the ten-minute tolerance it passes
        let out = transformer().transform_at(
            vec![raw("24", "2024-06-01T12:05:00Z", &[("temperature", json!(20))])],
            now(),
        );
        assert_eq!(out.readings.len(), 1);
    }

    #[test]
    fn ancient_timestamp_is_rejected() {
        let out = transformer().transform_at(
            vec![raw("24", "1997-01-01 00:00:00", &[("temperature", json!(20))])],
            now(),
        );
        assert_eq!(out.rejections[0].reason, RejectReason::InvalidTimestamp);
    }

    #[test]
    fn out_of_range_humidity_marks_field_absent_not_record() {
        let out = transformer().transform_at(
            vec![raw(
                "24",
                "2024-05-01T10:00:00Z",
                &[("temperature", json!(21.0)), ("humidity", json!(150))],
            )],
            now(),
        );
        assert_eq!(out.readings.len(), 1);
        let m = out.readings[0].measurements;
        assert_eq!(m.humidity_pct, None);
        assert_eq!(m.temperature_c, Some(21.0));
    }

    #[test]
    fn record_with_no_usable_fields_is_rejected() {
        let out = transformer().transform_at(
            vec![raw(
                "24",
                "2024-05-01T10:00:00Z",
                &[("temperature", json!(999)), ("wind_speed", json!("fast"))],
            )],
            now(),
        );
        assert!(out.readings.is_empty());
        assert_eq!(out.rejections[0].reason, RejectReason::NoUsableData);
    }

    #[test]
    fn units_are_normalized() {
        let out = transformer().transform_at(
            vec![raw(
                "24",
                "2024-05-01T10:00:00Z",
                &[("humidity", json!(0.55)), ("pressure", json!(1013.25))],
            )],
            now(),
        );
        let m = out.readings[0].measurements;
        assert_eq!(m.humidity_pct, Some(55.0));
        assert_eq!(m.pressure_pa, Some(101325.0));
    }

    #[test]
    fn numeric_strings_are_parsed() {
        let out = transformer().transform_at(
            vec![raw(
                "24",
                "2024-05-01 10:00",
                &[("temperature", json!("18.3")), ("rainfall", json!("0.2"))],
            )],
            now(),
        );
        let m = out.readings[0].measurements;
        assert_eq!(m.temperature_c, Some(18.3));
        assert_eq!(m.rainfall_mm, Some(0.2));
    }

    #[test]
    fn subsecond_precision_is_dropped_so_store_keys_agree() {
        let out = transformer().transform_at(
            vec![
                raw("24", "2024-05-01T10:00:00.250Z", &[("temperature", json!(21.0))]),
                raw("24", "2024-05-01T10:00:00.750Z", &[("temperature", json!(21.2))]),
            ],
            now(),
        );
        // Same second means same reading: collapsed here, not at the store
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.duplicates, 1);
        assert_eq!(Timelike::nanosecond(&out.readings[0].timestamp), 0);
        assert_eq!(
            out.readings[0].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn duplicates_collapse_keeping_more_complete_record() {
        let sparse = raw("24", "2024-05-01T10:00:00Z", &[("temperature", json!(21.0))]);
        let full = raw(
            "24",
            "2024-05-01T10:00:00Z",
            &[
                ("temperature", json!(21.1)),
                ("humidity", json!(60)),
                ("pressure", json!(101300)),
            ],
        );
        let out = transformer().transform_at(vec![sparse, full], now());
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.readings[0].measurements.present_count(), 3);
        assert_eq!(out.readings[0].measurements.temperature_c, Some(21.1));
    }

    #[test]
    fn equally_complete_duplicates_keep_first_seen() {
        let first = raw("24", "2024-05-01T10:00:00Z", &[("temperature", json!(21.0))]);
        let second = raw("24", "2024-05-01T10:00:00Z", &[("temperature", json!(25.0))]);
        let out = transformer().transform_at(vec![first, second], now());
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.readings[0].measurements.temperature_c, Some(21.0));
    }

    #[test]
    fn transform_is_deterministic() {
        let batch = || {
            vec![
                raw("24", "2024-05-01T10:00:00Z", &[("temperature", json!(21.0))]),
                raw("99", "2024-05-01T10:00:00Z", &[("temperature", json!(21.0))]),
                raw("25", "not a date", &[("humidity", json!(50))]),
            ]
        };
        let a = transformer().transform_at(batch(), now());
        let b = transformer().transform_at(batch(), now());
        assert_eq!(a.readings, b.readings);
        assert_eq!(a.rejections, b.rejections);
        assert_eq!(a.duplicates, b.duplicates);
    }
}

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::error::{ExtractError, Result};
use crate::types::{RawReading, StationDescriptor};

/// Readings fetched for one station, possibly truncated by a mid-pagination
/// failure. `partial` carries the failure without discarding fetched pages.
#[derive(Debug)]
pub struct FetchOutcome {
    pub readings: Vec<RawReading>,
    pub partial: Option<ExtractError>,
}

/// Capability interface for raw-reading sources. Swapping upstream vendors
/// means providing another implementation behind this trait.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn fetch(
        &self,
        station: &StationDescriptor,
        limit: usize,
    ) -> std::result::Result<FetchOutcome, ExtractError>;
}

/// Outcome of a single page attempt, classified for the retry loop.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// Likely to succeed on retry: timeout, connection error, HTTP 5xx/429.
    Transient { what: String, rate_limited: bool },
    /// Retry is futile; abort the page immediately.
    Permanent(ExtractError),
}

/// Fixed-ceiling retry schedule with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(1u32 << (attempt - 1).min(16));
        let capped = exp.min(self.backoff_cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.backoff_base.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Runs `op` up to the attempt ceiling, backing off between transient
/// failures. Permanent failures abort on the spot.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> std::result::Result<T, ExtractError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut last_rate_limited = false;
    for attempt in 1..=policy.max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(err)) => return Err(err),
            Err(AttemptError::Transient { what, rate_limited }) => {
                last_rate_limited = rate_limited;
                warn!(attempt, max = policy.max_attempts, %what, "transient upstream failure");
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay_before(attempt)).await;
                }
            }
        }
    }
    if last_rate_limited {
        Err(ExtractError::UpstreamRateLimited {
            attempts: policy.max_attempts,
        })
    } else {
        Err(ExtractError::UpstreamUnavailable {
            attempts: policy.max_attempts,
        })
    }
}

/// Extractor for the Toulouse Métropole explore-v2.1 open-data API.
pub struct HttpExtractor {
    client: reqwest::Client,
    config: UpstreamConfig,
    retry: RetryPolicy,
}

impl HttpExtractor {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        let retry = RetryPolicy::from_config(&config);
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn dataset_for(&self, station: &StationDescriptor) -> String {
        station
            .metadata
            .get("dataset")
            .cloned()
            .unwrap_or_else(|| format!("{}-station-meteo", station.id))
    }

    async fn get_records(
        &self,
        url: &str,
        offset: usize,
        limit: usize,
    ) -> std::result::Result<Vec<Value>, AttemptError> {
        let response = self
            .client
            .get(url)
            .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| AttemptError::Transient {
                what: e.to_string(),
                rate_limited: false,
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AttemptError::Transient {
                what: "HTTP 429".to_string(),
                rate_limited: true,
            });
        }
        if status.is_server_error() {
            return Err(AttemptError::Transient {
                what: format!("HTTP {}", status.as_u16()),
                rate_limited: false,
            });
        }
        if status.is_client_error() {
            return Err(AttemptError::Permanent(ExtractError::UpstreamRejected {
                status: status.as_u16(),
            }));
        }

        let body: Value = response.json().await.map_err(|e| {
            AttemptError::Permanent(ExtractError::UpstreamMalformedResponse(e.to_string()))
        })?;
        match body.get("results").and_then(Value::as_array) {
            Some(results) => Ok(results.clone()),
            None => Err(AttemptError::Permanent(
                ExtractError::UpstreamMalformedResponse("missing 'results' array".to_string()),
            )),
        }
    }

    /// Fetches the station catalog dataset and adapts it into descriptors.
    pub async fn list_stations(&self) -> std::result::Result<Vec<StationDescriptor>, ExtractError> {
        let url = format!(
            "{}/{}/records",
            self.config.base_url, self.config.stations_dataset
        );
        let records = retry_with_backoff(&self.retry, |_| {
            self.get_records(&url, 0, self.config.page_size)
        })
        .await?;

        let mut stations = Vec::new();
        for record in &records {
            let fields = record.get("fields").unwrap_or(record);
            let Some(number) = fields.get("id_numero").and_then(value_as_u64) else {
                continue;
            };
            if number == 0 {
                continue;
            }
            let name = fields
                .get("id_nom")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            let mut metadata = HashMap::new();
            if let Some(commune) = fields.get("ville").and_then(Value::as_str) {
                metadata.insert("commune".to_string(), commune.to_string());
            }
            metadata.insert("dataset".to_string(), name.clone());
            stations.push(StationDescriptor {
                id: format!("{:02}", number),
                name,
                latitude: fields.get("latitude").and_then(Value::as_f64),
                longitude: fields.get("longitude").and_then(Value::as_f64),
                metadata,
            });
        }
        info!(stations = stations.len(), "fetched station catalog");
        Ok(stations)
    }

    /// Maps one vendor record onto the neutral raw-reading shape. Values stay
    /// raw; cleaning is the transformer's job.
    fn adapt_record(&self, station: &StationDescriptor, record: &Value) -> RawReading {
        let fields = record.get("fields").unwrap_or(record);
        let mut reading = RawReading::new(station.id.clone());
        reading.timestamp = pick_str(fields, &["heure_utc", "heure_de_paris", "date", "datetime"]);
        let aliases: [(&str, &[&str]); 5] = [
            ("temperature", &["temperature_en_degre_c", "temperature", "temp"]),
            ("humidity", &["humidite", "humidity"]),
            ("rainfall", &["pluie", "rainfall", "precipitation"]),
            (
                "wind_speed",
                &["force_moyenne_du_vecteur_vent", "vitesse_vent", "wind_speed"],
            ),
            ("pressure", &["pression", "pressure"]),
        ];
        for (canonical, candidates) in aliases {
            if let Some(value) = pick_value(fields, candidates) {
                reading.values.insert(canonical.to_string(), value);
            }
        }
        reading
    }
}

fn pick_value(fields: &Value, candidates: &[&str]) -> Option<Value> {
    candidates
        .iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| !v.is_null())
        .cloned()
}

fn pick_str(fields: &Value, candidates: &[&str]) -> Option<String> {
    pick_value(fields, candidates).and_then(|v| v.as_str().map(str::to_string))
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Extract for HttpExtractor {
    async fn fetch(
        &self,
        station: &StationDescriptor,
        limit: usize,
    ) -> std::result::Result<FetchOutcome, ExtractError> {
        let url = format!("{}/{}/records", self.config.base_url, self.dataset_for(station));
        let mut readings: Vec<RawReading> = Vec::new();
        let mut pages = 0usize;

        while readings.len() < limit && pages < self.config.max_pages {
            let want = (limit - readings.len()).min(self.config.page_size);
            let offset = readings.len();
            let page = retry_with_backoff(&self.retry, |_| self.get_records(&url, offset, want)).await;
            match page {
                Ok(results) => {
                    if results.is_empty() {
                        // Upstream signalled end-of-data
                        break;
                    }
                    let got = results.len();
                    for record in &results {
                        readings.push(self.adapt_record(station, record));
                    }
                    debug!(station = %station.id, page = pages, records = got, "fetched page");
                    pages += 1;
                    if got < want {
                        break;
                    }
                }
                Err(err) if readings.is_empty() => return Err(err),
                Err(err) => {
                    // Keep already-fetched pages instead of discarding progress
                    warn!(station = %station.id, error = %err, fetched = readings.len(),
                          "pagination aborted mid-stream");
                    return Ok(FetchOutcome {
                        readings,
                        partial: Some(err),
                    });
                }
            }
        }
        if pages >= self.config.max_pages {
            warn!(station = %station.id, max_pages = self.config.max_pages,
                  "page ceiling reached before end-of-data");
        }
        Ok(FetchOutcome {
            readings,
            partial: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn exhausted_retries_make_exactly_max_attempts() {
        let attempts = AtomicU32::new(0);
        let policy = fast_policy(4);
        let result: std::result::Result<(), _> = retry_with_backoff(&policy, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AttemptError::Transient {
                    what: "timeout".to_string(),
                    rate_limited: false,
                })
            }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(result, Err(ExtractError::UpstreamUnavailable { attempts: 4 }));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_failures() {
        let policy = fast_policy(5);
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(AttemptError::Transient {
                        what: "HTTP 503".to_string(),
                        rate_limited: false,
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_aborts_without_retry() {
        let policy = fast_policy(4);
        let attempts = AtomicU32::new(0);
        let result: std::result::Result<(), _> = retry_with_backoff(&policy, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AttemptError::Permanent(ExtractError::UpstreamRejected {
                    status: 404,
                }))
            }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(result, Err(ExtractError::UpstreamRejected { status: 404 }));
    }

    #[tokio::test]
    async fn exhausted_rate_limit_reports_rate_limited() {
        let policy = fast_policy(3);
        let result: std::result::Result<(), _> = retry_with_backoff(&policy, |_| async {
            Err(AttemptError::Transient {
                what: "HTTP 429".to_string(),
                rate_limited: true,
            })
        })
        .await;
        assert_eq!(result, Err(ExtractError::UpstreamRateLimited { attempts: 3 }));
    }

    #[test]
    fn backoff_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(500),
        };
        for attempt in 1..=10 {
            let delay = policy.delay_before(attempt);
            assert!(delay <= Duration::from_millis(600), "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn vendor_fields_are_aliased() {
        let extractor = HttpExtractor::new(UpstreamConfig::default()).unwrap();
        let station = StationDescriptor::new("24", "Colomiers");
        let record = serde_json::json!({
            "heure_utc": "2024-05-01T12:00:00+00:00",
            "temperature_en_degre_c": 21.5,
            "humidite": 55,
            "pluie": 0.0,
            "force_moyenne_du_vecteur_vent": 3.2,
            "pression": null,
        });
        let reading = extractor.adapt_record(&station, &record);
        assert_eq!(reading.station_id.as_deref(), Some("24"));
        assert_eq!(reading.timestamp.as_deref(), Some("2024-05-01T12:00:00+00:00"));
        assert_eq!(reading.values.get("temperature"), Some(&serde_json::json!(21.5)));
        assert_eq!(reading.values.get("humidity"), Some(&serde_json::json!(55)));
        // null pressure is treated as missing, not carried through
        assert!(!reading.values.contains_key("pressure"));
    }
}

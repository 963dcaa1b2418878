use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::StationCatalog;
use crate::config::TransformConfig;
use crate::extract::Extract;
use crate::load::Loader;
use crate::transform::Transformer;
use crate::types::{CancelFlag, RunReport, RunState, Stage, StageFailure};

/// Sequences Extract → Transform → Load for one run.
///
/// Stages are strictly sequential; the station loop runs inside the stages,
/// and a single station's failure is recorded, never fatal. Only global
/// preconditions (no resolvable stations, storage unreachable) fail the run.
pub struct Pipeline {
    catalog: StationCatalog,
    extractor: Arc<dyn Extract>,
    transformer: Transformer,
    loader: Loader,
    state: RunState,
}

impl Pipeline {
    pub fn new(
        catalog: StationCatalog,
        extractor: Arc<dyn Extract>,
        rules: TransformConfig,
        loader: Loader,
    ) -> Self {
        let known: Vec<String> = catalog.ids().cloned().collect();
        let transformer = Transformer::new(known, rules);
        Self {
            catalog,
            extractor,
            transformer,
            loader,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn fail(&mut self, mut report: RunReport, failure: StageFailure) -> RunReport {
        warn!(stage = %failure.stage, reason = %failure.message, "run failed");
        self.state = RunState::Failed;
        report.state = RunState::Failed;
        report.failures.push(failure);
        report.success = false;
        report.finished_at = Some(chrono::Utc::now());
        report
    }

    /// Runs the pipeline once for the requested stations (empty = all known),
    /// fetching up to `limit` records per station.
    #[instrument(skip(self, cancel), fields(stations = requested.len(), limit))]
    pub async fn run(
        &mut self,
        requested: &[String],
        limit: usize,
        cancel: &CancelFlag,
    ) -> RunReport {
        self.state = RunState::Idle;
        let mut report = RunReport::new();

        let resolution = self.catalog.resolve(requested);
        report.unresolved = resolution.unresolved.clone();
        if resolution.stations.is_empty() {
            return self.fail(
                report,
                StageFailure {
                    stage: Stage::Extract,
                    station_id: None,
                    message: "no requested station could be resolved".to_string(),
                },
            );
        }

        // Storage reachability is a run-start precondition
        if let Err(err) = self.loader.store().ping().await {
            return self.fail(report, StageFailure::load(None, &err));
        }

        info!(stations = resolution.stations.len(), "starting pipeline run");
        for station in &resolution.stations {
            if cancel.is_cancelled() {
                info!("run cancelled; skipping remaining stations");
                break;
            }

            self.state = RunState::Extracting;
            report.state = RunState::Extracting;
            let outcome = match self.extractor.fetch(station, limit).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    report.failures.push(StageFailure::extract(&station.id, &err));
                    continue;
                }
            };
            if let Some(err) = &outcome.partial {
                report.failures.push(StageFailure::extract(&station.id, err));
            }
            report.fetched += outcome.readings.len();
            if outcome.readings.is_empty() {
                report.stations_processed += 1;
                continue;
            }

            self.state = RunState::Transforming;
            report.state = RunState::Transforming;
            let transformed = self.transformer.transform(outcome.readings);
            report.accepted += transformed.readings.len();
            report.duplicates += transformed.duplicates;
            for rejection in &transformed.rejections {
                report.record_rejection(rejection.reason);
            }

            self.state = RunState::Loading;
            report.state = RunState::Loading;
            let loaded = self.loader.persist(transformed.readings, cancel).await;
            report.stored_new += loaded.inserted;
            report.stored_skipped += loaded.skipped;
            for err in &loaded.failed {
                report.failures.push(StageFailure::load(Some(&station.id), err));
            }

            report.stations_processed += 1;
            info!(
                station = %station.id,
                fetched = report.fetched,
                stored = report.stored_new,
                "station processed"
            );
        }

        self.state = RunState::Completed;
        report.state = RunState::Completed;
        report.success = report.failures.is_empty();
        report.finished_at = Some(chrono::Utc::now());
        info!(
            fetched = report.fetched,
            accepted = report.accepted,
            rejected = report.rejected,
            duplicates = report.duplicates,
            stored = report.stored_new,
            success = report.success,
            "pipeline run finished"
        );
        report
    }
}

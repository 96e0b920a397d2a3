use std::path::PathBuf;
use std::sync::Arc;

use attribution_client::{AttributionApiClient, BackoffPolicy, HttpScoringTransport};
use attribution_core::channels::ChannelSet;
use attribution_core::config::AppConfig;
use attribution_core::error::AttributionResult;
use attribution_core::types::{DateRange, RunSummary};
use attribution_core::AttributionError;
use attribution_reporting::ReportingEngine;
use attribution_storage::StorageGateway;
use attribution_transform::{batch_by_session, Transformer};
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bound on how many transform failure reasons the summary carries.
const ERROR_SAMPLE_LIMIT: usize = 5;

/// Thin glue over the four pipeline stages. An external scheduler invokes
/// `run(start, end)`; partial failures end up in the summary, and only an
/// unusable storage layer aborts a run.
pub struct PipelineCoordinator {
    gateway: Arc<StorageGateway>,
    transformer: Transformer,
    client: AttributionApiClient,
    engine: ReportingEngine,
    report_path: PathBuf,
    max_journeys_per_batch: usize,
    max_sessions_per_batch: usize,
}

impl PipelineCoordinator {
    pub fn new(
        gateway: Arc<StorageGateway>,
        transformer: Transformer,
        client: AttributionApiClient,
        config: &AppConfig,
    ) -> Self {
        Self {
            gateway,
            transformer,
            client,
            engine: ReportingEngine::new(),
            report_path: PathBuf::from(&config.storage.report_path),
            max_journeys_per_batch: config.pipeline.max_journeys_per_batch,
            max_sessions_per_batch: config.pipeline.max_sessions_per_batch,
        }
    }

    /// Wire up the production stack from configuration: SQLite gateway and
    /// HTTPS transport.
    pub fn from_config(config: &AppConfig) -> AttributionResult<Self> {
        let gateway = Arc::new(StorageGateway::open(&config.storage.database_path)?);
        let transport = HttpScoringTransport::new(&config.api)?;
        let client = AttributionApiClient::new(
            Arc::new(transport),
            BackoffPolicy::from_config(&config.api),
            config.pipeline.max_concurrent_batches,
        );
        let transformer = Transformer::new(ChannelSet::new(&config.pipeline.extra_channels));
        Ok(Self::new(gateway, transformer, client, config))
    }

    pub async fn run(&self, start: NaiveDate, end: NaiveDate) -> AttributionResult<RunSummary> {
        self.run_with_cancel(start, end, &CancellationToken::new())
            .await
    }

    /// Full pipeline pass: fetch → transform → score → persist → report.
    /// Cancellation is honored at batch boundaries during scoring.
    pub async fn run_with_cancel(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> AttributionResult<RunSummary> {
        let range = DateRange::new(start, end).ok_or_else(|| {
            AttributionError::Storage(format!("invalid date range: {start} > {end}"))
        })?;
        info!(%start, %end, "Starting attribution pipeline run");

        let raw = self.gateway.fetch_raw(start, end)?;
        info!(touchpoints = raw.len(), "Fetched raw touchpoints");

        let (records, transform_errors) = self.transformer.transform(&raw);
        if !transform_errors.is_empty() {
            // Threshold policy belongs to the caller; the run continues.
            warn!(
                excluded = transform_errors.len(),
                "Some touchpoints failed validation and were excluded"
            );
        }
        let error_samples: Vec<String> = transform_errors
            .iter()
            .take(ERROR_SAMPLE_LIMIT)
            .map(|e| format!("{}: {}", e.session_id, e.reason))
            .collect();
        let transformed_count = records.len();

        let batches = batch_by_session(
            records,
            self.max_journeys_per_batch,
            self.max_sessions_per_batch,
        );
        info!(batches = batches.len(), "Submitting batches for scoring");

        let results = self.client.score(batches, cancel).await;
        let scored_ok = results.iter().filter(|r| r.is_ok()).count();
        let scored_error = results.len() - scored_ok;

        // Failed sessions are persisted too, so downstream consumers can
        // see which sessions never got a score.
        self.gateway.save_scored(&results)?;

        // The report is a pure function of the persisted scored set, not of
        // this run's in-memory results.
        let persisted = self.gateway.fetch_scored(start, end)?;
        let rows = self.engine.aggregate(&persisted, &raw, range);
        self.gateway.save_report(&rows, &self.report_path)?;

        let summary = RunSummary {
            transformed_count,
            transform_errors: transform_errors.len(),
            error_samples,
            scored_ok,
            scored_error,
            report_path: self.report_path.display().to_string(),
        };
        info!(
            transformed = summary.transformed_count,
            transform_errors = summary.transform_errors,
            scored_ok = summary.scored_ok,
            scored_error = summary.scored_error,
            report = %summary.report_path,
            "Pipeline run complete"
        );
        Ok(summary)
    }
}

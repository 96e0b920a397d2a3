use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use attribution_core::config::IhcApiConfig;
use attribution_core::error::{AttributionError, AttributionResult};
use attribution_core::types::{ScoreStatus, ScoredResult, TransformedRecord};
use chrono::NaiveDateTime;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::response::{
    classify, clean_score, default_redistribution_parameter, ApiOutcome, PartialFailure,
    ScoringRequest, SessionScore,
};
use crate::retry::{BackoffPolicy, FailureKind, RetryState};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Transport-level failure, before any HTTP status exists. Always treated
/// as transient.
#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout(String),
    Network(String),
}

impl TransportError {
    fn detail(&self) -> String {
        match self {
            TransportError::Timeout(d) => format!("request timed out: {d}"),
            TransportError::Network(d) => format!("network error: {d}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between retry logic and the wire. Tests drive the client through a
/// scripted in-memory implementation.
#[async_trait]
pub trait ScoringTransport: Send + Sync {
    async fn submit(
        &self,
        batch: &[TransformedRecord],
    ) -> Result<TransportResponse, TransportError>;
}

/// Production transport: POSTs batches to the scoring endpoint over HTTPS.
pub struct HttpScoringTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
    conv_type_id: String,
}

impl HttpScoringTransport {
    pub fn new(config: &IhcApiConfig) -> AttributionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AttributionError::Api(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            conv_type_id: config.conv_type_id.clone(),
        })
    }
}

#[async_trait]
impl ScoringTransport for HttpScoringTransport {
    async fn submit(
        &self,
        batch: &[TransformedRecord],
    ) -> Result<TransportResponse, TransportError> {
        let request = ScoringRequest {
            customer_journeys: batch,
            redistribution_parameter: default_redistribution_parameter(),
        };
        let response = self
            .client
            .post(&self.url)
            .query(&[("conv_type_id", self.conv_type_id.as_str())])
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

/// Client for the external scoring service. Dispatches independent batches
/// concurrently under a bounded permit pool, retries transient failures,
/// and resolves every session of every batch to exactly one `ScoredResult`
/// — a failed batch yields error results, never a process-fatal error.
pub struct AttributionApiClient {
    transport: Arc<dyn ScoringTransport>,
    policy: BackoffPolicy,
    max_concurrent: usize,
}

impl AttributionApiClient {
    pub fn new(
        transport: Arc<dyn ScoringTransport>,
        policy: BackoffPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            transport,
            policy,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Score all batches. Cancellation is honored at batch boundaries:
    /// batches not yet dispatched are skipped, in-flight batches complete.
    pub async fn score(
        &self,
        batches: Vec<Vec<TransformedRecord>>,
        cancel: &CancellationToken,
    ) -> Vec<ScoredResult> {
        let total = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(total);

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    dispatched = index,
                    total, "Run cancelled; remaining batches skipped"
                );
                break;
            }
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let transport = self.transport.clone();
            let policy = self.policy.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Vec::new();
                };
                if cancel.is_cancelled() {
                    debug!(batch = index, "Batch skipped after cancellation");
                    return Vec::new();
                }
                submit_with_retry(transport.as_ref(), &policy, &batch, index).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(batch_results) => results.extend(batch_results),
                Err(e) => warn!(error = %e, "Batch task panicked; its results are lost"),
            }
        }
        results
    }
}

async fn submit_with_retry(
    transport: &dyn ScoringTransport,
    policy: &BackoffPolicy,
    batch: &[TransformedRecord],
    index: usize,
) -> Vec<ScoredResult> {
    let mut state = RetryState::new();
    loop {
        let attempt = match state {
            RetryState::Attempting(n) => n,
            RetryState::Failed {
                attempts,
                ref last_error,
            } => {
                warn!(batch = index, attempts, %last_error, "Batch failed terminally");
                return error_results(
                    batch,
                    &format!("scoring failed after {attempts} attempt(s): {last_error}"),
                );
            }
            // Success returns out of the loop directly.
            RetryState::Succeeded => return Vec::new(),
        };

        let outcome = match transport.submit(batch).await {
            Ok(response) => classify(response.status, &response.body),
            Err(transport_error) => ApiOutcome::Rejected {
                status: 0,
                retryable: true,
                detail: transport_error.detail(),
            },
        };

        match outcome {
            ApiOutcome::Scored { scores, failures } => {
                debug!(batch = index, attempt, scored = scores.len(), "Batch scored");
                return merge_results(batch, &scores, &failures);
            }
            ApiOutcome::Rejected {
                retryable: true,
                detail,
                ..
            } => {
                warn!(batch = index, attempt, %detail, "Transient scoring failure");
                state = state.on_failure(FailureKind::Transient, policy.max_attempts, detail);
                if matches!(state, RetryState::Attempting(_)) {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
            ApiOutcome::Rejected {
                retryable: false,
                detail,
                status,
            } => {
                warn!(batch = index, status, %detail, "Permanent rejection; not retrying");
                return error_results(batch, &detail);
            }
            ApiOutcome::Malformed(detail) => {
                warn!(batch = index, %detail, "Unusable scoring response");
                return error_results(batch, &format!("malformed response: {detail}"));
            }
        }
    }
}

/// Unique sessions of a batch in first-seen order, with the channel and
/// event time carried from the session's first record.
fn batch_sessions(batch: &[TransformedRecord]) -> Vec<(&str, &str, &str, NaiveDateTime)> {
    let mut seen = std::collections::HashSet::new();
    let mut sessions = Vec::new();
    for record in batch {
        if seen.insert(record.session_id.as_str()) {
            let event_time = NaiveDateTime::parse_from_str(&record.timestamp, TIME_FORMAT)
                .unwrap_or_default();
            sessions.push((
                record.session_id.as_str(),
                record.channel_label.as_str(),
                record.conversion_id.as_str(),
                event_time,
            ));
        }
    }
    sessions
}

/// Resolve each session independently: scored, rejected, or unaccounted
/// for. One session's failure never discards another's success, and no
/// session is ever silently dropped.
fn merge_results(
    batch: &[TransformedRecord],
    scores: &[SessionScore],
    failures: &[PartialFailure],
) -> Vec<ScoredResult> {
    let score_by_session: HashMap<&str, f64> = scores
        .iter()
        .map(|s| (s.session_id.as_str(), s.ihc))
        .collect();
    let failure_by_session: HashMap<&str, String> = failures
        .iter()
        .filter_map(|f| {
            f.session_id
                .as_deref()
                .map(|id| (id, failure_detail(f)))
        })
        .collect();
    let failure_by_conversion: HashMap<&str, String> = failures
        .iter()
        .filter(|f| f.session_id.is_none())
        .filter_map(|f| {
            f.conversion_id
                .as_deref()
                .map(|id| (id, failure_detail(f)))
        })
        .collect();

    batch_sessions(batch)
        .into_iter()
        .map(|(session_id, channel, conversion_id, event_time)| {
            if let Some(&score) = score_by_session.get(session_id) {
                return ScoredResult {
                    session_id: session_id.to_string(),
                    channel: channel.to_string(),
                    event_time,
                    ihc_score: clean_score(score),
                    status: ScoreStatus::Ok,
                    error_detail: None,
                };
            }
            let detail = failure_by_session
                .get(session_id)
                .or_else(|| failure_by_conversion.get(conversion_id))
                .cloned()
                .unwrap_or_else(|| "session missing from scoring response".to_string());
            error_result(session_id, channel, event_time, &detail)
        })
        .collect()
}

fn failure_detail(failure: &PartialFailure) -> String {
    failure
        .error
        .clone()
        .unwrap_or_else(|| "rejected by scoring service".to_string())
}

fn error_results(batch: &[TransformedRecord], detail: &str) -> Vec<ScoredResult> {
    batch_sessions(batch)
        .into_iter()
        .map(|(session_id, channel, _, event_time)| {
            error_result(session_id, channel, event_time, detail)
        })
        .collect()
}

fn error_result(
    session_id: &str,
    channel: &str,
    event_time: NaiveDateTime,
    detail: &str,
) -> ScoredResult {
    ScoredResult {
        session_id: session_id.to_string(),
        channel: channel.to_string(),
        event_time,
        ihc_score: 0.0,
        status: ScoreStatus::Error,
        error_detail: Some(detail.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        calls: AtomicU32,
    }

    impl FakeTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScoringTransport for FakeTransport {
        async fn submit(
            &self,
            _batch: &[TransformedRecord],
        ) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(step) => {
                    // Repeat the last scripted step forever.
                    if script.is_empty() {
                        script.push_back(step.clone());
                    }
                    step
                }
                None => Err(TransportError::Network("script exhausted".to_string())),
            }
        }
    }

    fn ok(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status,
            body: body.to_string(),
        })
    }

    fn record(session_id: &str, channel: &str) -> TransformedRecord {
        TransformedRecord {
            conversion_id: format!("{session_id}-conv"),
            session_id: session_id.to_string(),
            timestamp: "2023-08-01 10:00:00".to_string(),
            channel_label: channel.to_string(),
            holder_engagement: 0,
            closer_engagement: 0,
            conversion: 0,
            impression_interaction: 0,
        }
    }

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    fn client(transport: Arc<FakeTransport>, max_attempts: u32) -> AttributionApiClient {
        AttributionApiClient::new(transport, fast_policy(max_attempts), 2)
    }

    #[tokio::test]
    async fn test_successful_batch_scores_every_session() {
        let transport = FakeTransport::new(vec![ok(
            200,
            r#"{"statusCode":200,"value":[
                {"session_id":"s1","ihc":0.4},
                {"session_id":"s2","ihc":1.7}
            ]}"#,
        )]);
        let client = client(transport.clone(), 3);

        let results = client
            .score(
                vec![vec![record("s1", "Direct"), record("s2", "SEO")]],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!((results[0].ihc_score - 0.4).abs() < f64::EPSILON);
        // Out-of-range oracle output is clamped.
        assert!((results[1].ihc_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_isolates_sessions() {
        let transport = FakeTransport::new(vec![ok(
            206,
            r#"{"statusCode":206,
                "value":[{"session_id":"s1","ihc":0.8}],
                "partialFailureErrors":[{"session_id":"s2","error":"invalid journey"}]}"#,
        )]);
        let client = client(transport, 3);

        let mut results = client
            .score(
                vec![vec![record("s1", "Direct"), record("s2", "Direct")]],
                &CancellationToken::new(),
            )
            .await;
        results.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ScoreStatus::Ok);
        assert_eq!(results[1].status, ScoreStatus::Error);
        assert_eq!(results[1].error_detail.as_deref(), Some("invalid journey"));
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_not_retried() {
        let transport = FakeTransport::new(vec![ok(400, "journey validation failed")]);
        let client = client(transport.clone(), 5);

        let results = client
            .score(
                vec![vec![record("s1", "Direct")]],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(transport.calls(), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ScoreStatus::Error);
        assert!(results[0]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("400"));
    }

    #[tokio::test]
    async fn test_transient_failure_retries_exactly_max_attempts() {
        let transport = FakeTransport::new(vec![ok(503, "unavailable")]);
        let client = client(transport.clone(), 3);

        let results = client
            .score(
                vec![vec![record("s1", "Direct")]],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(transport.calls(), 3);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ScoreStatus::Error);
        assert!(results[0]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("after 3 attempt(s)"));
    }

    #[tokio::test]
    async fn test_transient_failure_then_success_recovers() {
        let transport = FakeTransport::new(vec![
            Err(TransportError::Timeout("30s elapsed".to_string())),
            ok(200, r#"{"statusCode":200,"value":[{"session_id":"s1","ihc":0.9}]}"#),
        ]);
        let client = client(transport.clone(), 3);

        let results = client
            .score(
                vec![vec![record("s1", "Direct")]],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(results[0].status, ScoreStatus::Ok);
    }

    #[tokio::test]
    async fn test_session_missing_from_response_becomes_error() {
        let transport = FakeTransport::new(vec![ok(
            200,
            r#"{"statusCode":200,"value":[{"session_id":"s1","ihc":0.5}]}"#,
        )]);
        let client = client(transport, 3);

        let mut results = client
            .score(
                vec![vec![record("s1", "Direct"), record("s2", "SEO")]],
                &CancellationToken::new(),
            )
            .await;
        results.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].status, ScoreStatus::Error);
        assert_eq!(
            results[1].error_detail.as_deref(),
            Some("session missing from scoring response")
        );
    }

    #[tokio::test]
    async fn test_conversion_level_failure_maps_to_its_sessions() {
        let mut r1 = record("s1", "Direct");
        r1.conversion_id = "conv-9".to_string();
        let transport = FakeTransport::new(vec![ok(
            206,
            r#"{"statusCode":206,
                "value":[{"session_id":"s2","ihc":0.3}],
                "partialFailureErrors":[{"conversion_id":"conv-9","error":"journey too long"}]}"#,
        )]);
        let client = client(transport, 3);

        let mut results = client
            .score(
                vec![vec![r1, record("s2", "SEO")]],
                &CancellationToken::new(),
            )
            .await;
        results.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        assert_eq!(results[0].status, ScoreStatus::Error);
        assert_eq!(results[0].error_detail.as_deref(), Some("journey too long"));
        assert_eq!(results[1].status, ScoreStatus::Ok);
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let transport = FakeTransport::new(vec![ok(
            200,
            r#"{"statusCode":200,"value":[{"session_id":"s1","ihc":0.5}]}"#,
        )]);
        let client = client(transport.clone(), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = client
            .score(vec![vec![record("s1", "Direct")]], &cancel)
            .await;

        assert!(results.is_empty());
        assert_eq!(transport.calls(), 0);
    }
}

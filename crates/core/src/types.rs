use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One recorded customer interaction event, read from the source store.
/// Immutable from the pipeline's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTouchpoint {
    pub session_id: String,
    pub user_id: String,
    /// Conversion this touchpoint belongs to, when the source has linked it.
    pub conversion_id: Option<String>,
    pub channel: String,
    /// Raw timestamp text as stored; parsed and validated by the transformer.
    pub timestamp: String,
    pub conversion: bool,
    pub holder_engagement: i64,
    pub closer_engagement: i64,
    pub impression_interaction: i64,
    /// Revenue of the linked conversion, 0.0 for non-converting sessions.
    #[serde(default)]
    pub revenue: f64,
}

/// One journey entry in the shape the scoring API expects. Field names
/// match the external schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformedRecord {
    pub conversion_id: String,
    pub session_id: String,
    /// `YYYY-MM-DD HH:MM:SS`, normalized by the transformer.
    pub timestamp: String,
    pub channel_label: String,
    pub holder_engagement: i64,
    pub closer_engagement: i64,
    pub conversion: i64,
    pub impression_interaction: i64,
}

/// A raw record that failed transform-time validation. Recorded, never
/// silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformError {
    pub session_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Ok,
    Error,
}

/// Outcome of scoring one session, persisted exactly once per session
/// (upsert keyed by `session_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    pub session_id: String,
    pub channel: String,
    /// Session event time, carried through so scored rows can be fetched
    /// by event date range.
    pub event_time: NaiveDateTime,
    pub ihc_score: f64,
    pub status: ScoreStatus,
    pub error_detail: Option<String>,
}

impl ScoredResult {
    pub fn is_ok(&self) -> bool {
        self.status == ScoreStatus::Ok
    }
}

/// One aggregated report row. Recomputed from the persisted scored set on
/// every reporting run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelReportRow {
    pub channel: String,
    pub date_range: String,
    pub total_ihc: f64,
    pub conversion_count: u64,
    pub average_score: f64,
}

/// Inclusive date window for one pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self { start, end })
    }

    /// ISO 8601 interval notation, safe to embed in a CSV cell.
    pub fn label(&self) -> String {
        format!("{}/{}", self.start, self.end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Run-level status returned by the coordinator. A run can complete with a
/// non-zero error count; consumers must check the counts, not just the
/// absence of an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub transformed_count: usize,
    pub transform_errors: usize,
    /// Bounded sample of transform failure reasons for diagnostics.
    pub error_samples: Vec<String>,
    pub scored_ok: usize,
    pub scored_error: usize,
    pub report_path: String,
}

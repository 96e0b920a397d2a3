use std::collections::{BTreeMap, HashSet};

use attribution_core::types::{ChannelReportRow, DateRange, RawTouchpoint, ScoredResult};
use tracing::debug;

/// Aggregates persisted scored results into one row per channel. Pure
/// function of its inputs: the same scored set always yields the same rows,
/// sorted by channel ascending, so report diffs between runs are
/// reproducible.
pub struct ReportingEngine;

impl ReportingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Build report rows for the window. Only `Ok` results contribute to
    /// the score metrics; `conversion_count` counts converting raw
    /// touchpoints on the channel whose session actually scored.
    pub fn aggregate(
        &self,
        scored: &[ScoredResult],
        raw: &[RawTouchpoint],
        range: DateRange,
    ) -> Vec<ChannelReportRow> {
        let mut totals: BTreeMap<&str, (f64, u64)> = BTreeMap::new();
        let mut ok_sessions: HashSet<&str> = HashSet::new();

        for result in scored.iter().filter(|r| r.is_ok()) {
            let entry = totals.entry(result.channel.as_str()).or_insert((0.0, 0));
            entry.0 += result.ihc_score;
            entry.1 += 1;
            ok_sessions.insert(result.session_id.as_str());
        }

        let date_range = range.label();
        let rows: Vec<ChannelReportRow> = totals
            .into_iter()
            .map(|(channel, (total_ihc, session_count))| {
                let conversion_count = raw
                    .iter()
                    .filter(|tp| {
                        tp.conversion
                            && tp.channel == channel
                            && ok_sessions.contains(tp.session_id.as_str())
                    })
                    .count() as u64;
                let average_score = if session_count == 0 {
                    0.0
                } else {
                    total_ihc / session_count as f64
                };
                ChannelReportRow {
                    channel: channel.to_string(),
                    date_range: date_range.clone(),
                    total_ihc,
                    conversion_count,
                    average_score,
                }
            })
            .collect();

        debug!(channels = rows.len(), range = %date_range, "Aggregated channel report");
        rows
    }
}

impl Default for ReportingEngine {
    fn default() -> Self {
        Self::new()
    }
}

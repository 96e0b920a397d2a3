use attribution_core::types::TransformedRecord;
use tracing::debug;

/// Pack transformed records into batches bounded by the scoring provider's
/// per-request limits: at most `max_sessions` distinct sessions and at most
/// `max_records` journey entries per batch. A batch boundary never splits
/// one session's records; a single session larger than `max_records`
/// becomes its own oversized batch rather than being dropped.
pub fn batch_by_session(
    records: Vec<TransformedRecord>,
    max_sessions: usize,
    max_records: usize,
) -> Vec<Vec<TransformedRecord>> {
    let max_sessions = max_sessions.max(1);
    let max_records = max_records.max(1);

    // Group by session, preserving first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<TransformedRecord>> =
        std::collections::HashMap::new();
    for record in records {
        let entry = groups.entry(record.session_id.clone()).or_default();
        if entry.is_empty() {
            order.push(record.session_id.clone());
        }
        entry.push(record);
    }

    let mut batches: Vec<Vec<TransformedRecord>> = Vec::new();
    let mut current: Vec<TransformedRecord> = Vec::new();
    let mut current_sessions = 0usize;

    for session_id in order {
        let group = groups.remove(&session_id).unwrap_or_default();
        let would_overflow = current_sessions + 1 > max_sessions
            || current.len() + group.len() > max_records;
        if would_overflow && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_sessions = 0;
        }
        current.extend(group);
        current_sessions += 1;
    }
    if !current.is_empty() {
        batches.push(current);
    }

    debug!(batches = batches.len(), "Packed records into batches");
    batches
}

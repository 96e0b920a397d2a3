use std::fs;
use std::path::Path;
use std::sync::Mutex;

use attribution_core::error::{AttributionError, AttributionResult};
use attribution_core::types::{ChannelReportRow, DateRange, RawTouchpoint, ScoreStatus, ScoredResult};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS touchpoints (
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    conversion_id TEXT,
    channel TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    conversion INTEGER NOT NULL DEFAULT 0,
    holder_engagement INTEGER NOT NULL DEFAULT 0,
    closer_engagement INTEGER NOT NULL DEFAULT 0,
    impression_interaction INTEGER NOT NULL DEFAULT 0,
    revenue REAL NOT NULL DEFAULT 0.0
);

CREATE TABLE IF NOT EXISTS scored_results (
    session_id TEXT PRIMARY KEY,
    channel TEXT NOT NULL,
    event_time TEXT NOT NULL,
    ihc_score REAL NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('ok', 'error')),
    error_detail TEXT
);

CREATE TABLE IF NOT EXISTS channel_reports (
    channel TEXT NOT NULL,
    date_range TEXT NOT NULL,
    total_ihc REAL NOT NULL,
    conversion_count INTEGER NOT NULL,
    average_score REAL NOT NULL,
    PRIMARY KEY (channel, date_range)
);
";

/// Typed read/write access to the attribution store. Owns the persistence
/// lifecycle: scored rows are created or idempotently re-written, never
/// deleted. Writes are serialized through the inner mutex so concurrent
/// batch completions cannot interleave a partial update.
pub struct StorageGateway {
    conn: Mutex<Connection>,
}

impl StorageGateway {
    /// Open the store at `path` and ensure the pipeline-owned tables exist.
    /// The `touchpoints` table belongs to the source dataset; its DDL here
    /// is a no-op on any provisioned database.
    pub fn open<P: AsRef<Path>>(path: P) -> AttributionResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> AttributionResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> AttributionResult<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        debug!("Storage schema verified");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch raw touchpoints whose event date falls inside the inclusive
    /// range. Fails when `start > end`.
    pub fn fetch_raw(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AttributionResult<Vec<RawTouchpoint>> {
        let range = validate_range(start, end)?;
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT session_id, user_id, conversion_id, channel, timestamp,
                        conversion, holder_engagement, closer_engagement,
                        impression_interaction, revenue
                 FROM touchpoints
                 WHERE date(timestamp) BETWEEN ?1 AND ?2
                 ORDER BY timestamp, session_id",
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(
                params![range.start.to_string(), range.end.to_string()],
                |row| {
                    Ok(RawTouchpoint {
                        session_id: row.get(0)?,
                        user_id: row.get(1)?,
                        conversion_id: row.get(2)?,
                        channel: row.get(3)?,
                        timestamp: row.get(4)?,
                        conversion: row.get::<_, i64>(5)? != 0,
                        holder_engagement: row.get(6)?,
                        closer_engagement: row.get(7)?,
                        impression_interaction: row.get(8)?,
                        revenue: row.get(9)?,
                    })
                },
            )
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;

        debug!(count = rows.len(), %start, %end, "Fetched raw touchpoints");
        Ok(rows)
    }

    /// Upsert scored results keyed by `session_id`. Re-running with the
    /// same input leaves the table unchanged; on conflict the later write
    /// wins. The whole call is one transaction.
    pub fn save_scored(&self, results: &[ScoredResult]) -> AttributionResult<()> {
        if results.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction().map_err(storage_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO scored_results
                     (session_id, channel, event_time, ihc_score, status, error_detail)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(storage_err)?;
            for result in results {
                let status = match result.status {
                    ScoreStatus::Ok => "ok",
                    ScoreStatus::Error => "error",
                };
                stmt.execute(params![
                    result.session_id,
                    result.channel,
                    result.event_time.format(TIME_FORMAT).to_string(),
                    result.ihc_score,
                    status,
                    result.error_detail,
                ])
                .map_err(storage_err)?;
            }
        }
        tx.commit().map_err(storage_err)?;
        debug!(count = results.len(), "Persisted scored results");
        Ok(())
    }

    /// Fetch scored results by event date, inclusive.
    pub fn fetch_scored(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AttributionResult<Vec<ScoredResult>> {
        let range = validate_range(start, end)?;
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT session_id, channel, event_time, ihc_score, status, error_detail
                 FROM scored_results
                 WHERE date(event_time) BETWEEN ?1 AND ?2
                 ORDER BY session_id",
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(
                params![range.start.to_string(), range.end.to_string()],
                |row| {
                    let event_time: String = row.get(2)?;
                    let status: String = row.get(4)?;
                    Ok((
                        ScoredResult {
                            session_id: row.get(0)?,
                            channel: row.get(1)?,
                            event_time: NaiveDateTime::MIN,
                            ihc_score: row.get(3)?,
                            status: if status == "ok" {
                                ScoreStatus::Ok
                            } else {
                                ScoreStatus::Error
                            },
                            error_detail: row.get(5)?,
                        },
                        event_time,
                    ))
                },
            )
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;

        rows.into_iter()
            .map(|(mut result, event_time)| {
                result.event_time = NaiveDateTime::parse_from_str(&event_time, TIME_FORMAT)
                    .map_err(|e| {
                        AttributionError::Storage(format!(
                            "unparseable event_time '{event_time}' for session {}: {e}",
                            result.session_id
                        ))
                    })?;
                Ok(result)
            })
            .collect()
    }

    /// Persist report rows and write the CSV artifact. The file is written
    /// to a temporary path in the destination directory and renamed into
    /// place, so a crash mid-write never leaves a truncated report.
    pub fn save_report<P: AsRef<Path>>(
        &self,
        rows: &[ChannelReportRow],
        destination: P,
    ) -> AttributionResult<()> {
        let destination = destination.as_ref();
        {
            let mut conn = self.conn.lock().expect("storage mutex poisoned");
            let tx = conn.transaction().map_err(storage_err)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO channel_reports
                         (channel, date_range, total_ihc, conversion_count, average_score)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(storage_err)?;
                for row in rows {
                    stmt.execute(params![
                        row.channel,
                        row.date_range,
                        row.total_ihc,
                        row.conversion_count,
                        row.average_score,
                    ])
                    .map_err(storage_err)?;
                }
            }
            tx.commit().map_err(storage_err)?;
        }

        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = NamedTempFile::new_in(if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        })?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            if rows.is_empty() {
                // serialize() emits headers lazily, so an empty report
                // still needs the header row written explicitly.
                writer
                    .write_record([
                        "channel",
                        "date_range",
                        "total_ihc",
                        "conversion_count",
                        "average_score",
                    ])
                    .map_err(|e| AttributionError::Report(e.to_string()))?;
            }
            for row in rows {
                writer
                    .serialize(row)
                    .map_err(|e| AttributionError::Report(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| AttributionError::Report(e.to_string()))?;
        }
        tmp.persist(destination)
            .map_err(|e| AttributionError::Report(e.to_string()))?;

        info!(
            rows = rows.len(),
            path = %destination.display(),
            "Channel report written"
        );
        Ok(())
    }
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> AttributionResult<DateRange> {
    DateRange::new(start, end).ok_or_else(|| {
        AttributionError::Storage(format!("invalid date range: {start} > {end}"))
    })
}

fn storage_err(e: rusqlite::Error) -> AttributionError {
    AttributionError::Storage(e.to_string())
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::db::AsyncDb;
use common::store::ts_to_sql;
use common::types::{ExtractionJob, JobStatus};
use rusqlite::{Connection, OptionalExtension, Row};

const JOB_COLUMNS: &str = "id, address, status, error_message, created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ExtractionJob> {
    let status: String = row.get(2)?;
    let parse_ts = |idx: usize| -> rusqlite::Result<DateTime<Utc>> {
        let s: String = row.get(idx)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    };
    Ok(ExtractionJob {
        id: row.get(0)?,
        address: row.get(1)?,
        status: JobStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown job status {status:?}").into(),
            )
        })?,
        error_message: row.get(3)?,
        created_at: parse_ts(4)?,
        updated_at: parse_ts(5)?,
    })
}

fn in_flight_for(conn: &Connection, address: &str) -> rusqlite::Result<Option<ExtractionJob>> {
    conn.query_row(
        &format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs
             WHERE address = ?1 AND status IN ('pending', 'processing')
             ORDER BY id DESC LIMIT 1"
        ),
        rusqlite::params![address],
        job_from_row,
    )
    .optional()
}

fn job_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<ExtractionJob>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM extraction_jobs WHERE id = ?1"),
        rusqlite::params![id],
        job_from_row,
    )
    .optional()
}

/// Lifecycle bookkeeping for asynchronous extraction requests.
///
/// Transitions only move forward: pending → processing → completed | failed.
/// A transition from the wrong state is a no-op and reports `false`.
#[derive(Clone)]
pub struct ExtractionJobs {
    db: AsyncDb,
}

impl ExtractionJobs {
    pub fn new(db: AsyncDb) -> Self {
        Self { db }
    }

    /// Return the in-flight job for `address`, or create a pending one.
    /// The bool is `true` when a new job was created.
    pub async fn create_or_get_inflight(&self, address: &str) -> Result<(ExtractionJob, bool)> {
        let address = address.to_lowercase();
        self.db
            .call_named("extraction_jobs.create_or_get", move |conn| {
                let tx = conn.transaction()?;
                if let Some(existing) = in_flight_for(&tx, &address)? {
                    tx.commit()?;
                    return Ok((existing, false));
                }
                let now = ts_to_sql(&Utc::now());
                tx.execute(
                    "INSERT INTO extraction_jobs (address, status, created_at, updated_at)
                     VALUES (?1, 'pending', ?2, ?2)",
                    rusqlite::params![address, now],
                )?;
                let id = tx.last_insert_rowid();
                let job = job_by_id(&tx, id)?
                    .ok_or_else(|| anyhow::anyhow!("job {id} vanished after insert"))?;
                tx.commit()?;
                Ok((job, true))
            })
            .await
    }

    async fn transition(
        &self,
        op: &'static str,
        id: i64,
        from: &'static [JobStatus],
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let from_sql = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let changed = self
            .db
            .call_named(op, move |conn| {
                let n = conn.execute(
                    &format!(
                        "UPDATE extraction_jobs
                         SET status = ?2, error_message = ?3, updated_at = ?4
                         WHERE id = ?1 AND status IN ({from_sql})"
                    ),
                    rusqlite::params![id, to.as_str(), error_message, ts_to_sql(&Utc::now())],
                )?;
                Ok(n == 1)
            })
            .await?;

        if changed {
            metrics::counter!("wallet_health_extraction_jobs_total", "status" => to.as_str())
                .increment(1);
        } else {
            tracing::warn!(job_id = id, to = to.as_str(), "ignored out-of-order job transition");
        }
        Ok(changed)
    }

    pub async fn mark_processing(&self, id: i64) -> Result<bool> {
        self.transition(
            "extraction_jobs.processing",
            id,
            &[JobStatus::Pending],
            JobStatus::Processing,
            None,
        )
        .await
    }

    pub async fn mark_completed(&self, id: i64) -> Result<bool> {
        self.transition(
            "extraction_jobs.completed",
            id,
            &[JobStatus::Processing],
            JobStatus::Completed,
            None,
        )
        .await
    }

    /// Allowed from pending too, so jobs that never reached a worker can be closed.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<bool> {
        self.transition(
            "extraction_jobs.failed",
            id,
            &[JobStatus::Pending, JobStatus::Processing],
            JobStatus::Failed,
            Some(error.to_string()),
        )
        .await
    }

    /// Fail every pending or processing job. Run once at startup, before any
    /// worker exists, so jobs orphaned by a previous process stop blocking
    /// new triggers for their address.
    pub async fn fail_orphaned(&self, reason: &str) -> Result<usize> {
        let reason = reason.to_string();
        let n = self
            .db
            .call_named("extraction_jobs.fail_orphaned", move |conn| {
                Ok(conn.execute(
                    "UPDATE extraction_jobs
                     SET status = 'failed', error_message = ?1, updated_at = ?2
                     WHERE status IN ('pending', 'processing')",
                    rusqlite::params![reason, ts_to_sql(&Utc::now())],
                )?)
            })
            .await?;
        if n > 0 {
            metrics::counter!("wallet_health_extraction_jobs_total", "status" => "failed")
                .increment(n as u64);
            tracing::warn!(jobs = n, "failed extraction jobs orphaned by a previous run");
        }
        Ok(n)
    }

    pub async fn get(&self, id: i64) -> Result<Option<ExtractionJob>> {
        self.db
            .call_named("extraction_jobs.get", move |conn| Ok(job_by_id(conn, id)?))
            .await
    }

    /// Newest first.
    pub async fn list_for_address(&self, address: &str, limit: u32) -> Result<Vec<ExtractionJob>> {
        let address = address.to_lowercase();
        self.db
            .call_named("extraction_jobs.list", move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM extraction_jobs
                     WHERE address = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let jobs = stmt
                    .query_map(rusqlite::params![address, limit], job_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await
    }
}

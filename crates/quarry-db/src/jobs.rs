//! Indexing job store and state machine.
//!
//! Jobs move `started → running → {completed, failed, timeout, cancelled}`.
//! Terminal rows are immutable: the WHERE clause of every update excludes
//! them, so the first terminal writer wins and later updates are no-ops.
//! Progress counters only ever grow (`GREATEST` on merge).

use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use quarry_core::{defaults, Error, Identity, IndexingJob, JobCounters, JobStatus, Result, Scope};

const JOB_COLUMNS: &str = "job_id, index_name, source_url, status, initiated_by_user, \
     initiated_by_team, scope, started_at, completed_at, duration_seconds, pages_discovered, \
     pages_processed, pages_indexed, total_chunks, error_message, error_details, metadata";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'timeout', 'cancelled')";

/// Request to create a new job row.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Workflow-supplied id; unique per job.
    pub job_id: String,
    pub index_name: String,
    pub source_url: String,
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub scope: Scope,
    pub metadata: JsonValue,
}

/// PostgreSQL job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a job in the `started` state.
    pub async fn create(&self, req: CreateJobRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO indexing_jobs
                 (job_id, index_name, source_url, status, initiated_by_user, initiated_by_team,
                  scope, started_at, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), $8)",
        )
        .bind(&req.job_id)
        .bind(&req.index_name)
        .bind(&req.source_url)
        .bind(JobStatus::Started.as_str())
        .bind(&req.user_id)
        .bind(&req.team_id)
        .bind(req.scope.as_str())
        .bind(&req.metadata)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "jobs",
            op = "create",
            job_id = %req.job_id,
            index_name = %req.index_name,
            "Indexing job created"
        );
        Ok(())
    }

    /// Transition a job's status, optionally merging counters and failure
    /// details.
    ///
    /// A terminal status also sets `completed_at` and `duration_seconds`.
    /// Updates against an already-terminal job are no-ops; the return value
    /// tells whether the row changed.
    pub async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        counters: Option<JobCounters>,
        error_message: Option<&str>,
        error_details: Option<&JsonValue>,
    ) -> Result<bool> {
        let query = format!(
            "UPDATE indexing_jobs SET
                 status = $2,
                 pages_discovered = GREATEST(pages_discovered, COALESCE($3, pages_discovered)),
                 pages_processed  = GREATEST(pages_processed,  COALESCE($4, pages_processed)),
                 pages_indexed    = GREATEST(pages_indexed,    COALESCE($5, pages_indexed)),
                 total_chunks     = GREATEST(total_chunks,     COALESCE($6, total_chunks)),
                 error_message = COALESCE($7, error_message),
                 error_details = COALESCE($8, error_details),
                 completed_at = CASE WHEN $2 IN {terminal} THEN now() ELSE completed_at END,
                 duration_seconds = CASE WHEN $2 IN {terminal}
                     THEN EXTRACT(EPOCH FROM (now() - started_at))::double precision
                     ELSE duration_seconds END
             WHERE job_id = $1 AND status NOT IN {terminal}",
            terminal = TERMINAL_STATUSES
        );

        let result = sqlx::query(&query)
            .bind(job_id)
            .bind(status.as_str())
            .bind(counters.map(|c| c.pages_discovered))
            .bind(counters.map(|c| c.pages_processed))
            .bind(counters.map(|c| c.pages_indexed))
            .bind(counters.map(|c| c.total_chunks))
            .bind(error_message)
            .bind(error_details)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        let updated = result.rows_affected() > 0;
        if updated {
            info!(
                subsystem = "db",
                component = "jobs",
                op = "update_status",
                job_id = %job_id,
                status = %status,
                "Job status updated"
            );
        } else {
            debug!(
                subsystem = "db",
                component = "jobs",
                job_id = %job_id,
                status = %status,
                "Status update ignored, job is terminal or unknown"
            );
        }
        Ok(updated)
    }

    /// Merge progress counters into a non-terminal job row.
    pub async fn update_progress(&self, job_id: &str, counters: JobCounters) -> Result<()> {
        let query = format!(
            "UPDATE indexing_jobs SET
                 pages_discovered = GREATEST(pages_discovered, $2),
                 pages_processed  = GREATEST(pages_processed,  $3),
                 pages_indexed    = GREATEST(pages_indexed,    $4),
                 total_chunks     = GREATEST(total_chunks,     $5)
             WHERE job_id = $1 AND status NOT IN {terminal}",
            terminal = TERMINAL_STATUSES
        );
        sqlx::query(&query)
            .bind(job_id)
            .bind(counters.pages_discovered)
            .bind(counters.pages_processed)
            .bind(counters.pages_indexed)
            .bind(counters.total_chunks)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Fetch one job by id.
    pub async fn get(&self, job_id: &str) -> Result<Option<IndexingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM indexing_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(parse_job_row).transpose()
    }

    /// List an identity's jobs, newest first. `limit` is clamped to
    /// `[1, 50]`.
    pub async fn list_by_identity(
        &self,
        identity: &Identity,
        limit: i64,
    ) -> Result<Vec<IndexingJob>> {
        let limit = limit.clamp(1, defaults::JOB_LIST_LIMIT);
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM indexing_jobs
             WHERE scope = $1
               AND ((scope = 'user' AND initiated_by_user = $2)
                 OR (scope = 'team' AND initiated_by_team = $2))
             ORDER BY started_at DESC
             LIMIT $3"
        ))
        .bind(identity.scope.as_str())
        .bind(&identity.id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(parse_job_row).collect()
    }

    /// Delete terminal jobs older than `retention_days`. Returns the number
    /// of pruned rows.
    pub async fn prune(&self, retention_days: i32) -> Result<i64> {
        let query = format!(
            "DELETE FROM indexing_jobs
             WHERE status IN {terminal}
               AND completed_at < now() - make_interval(days => $1)",
            terminal = TERMINAL_STATUSES
        );
        let result = sqlx::query(&query)
            .bind(retention_days)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() as i64)
    }
}

fn parse_job_row(row: PgRow) -> Result<IndexingJob> {
    let status: String = row.get("status");
    let scope: String = row.get("scope");
    Ok(IndexingJob {
        job_id: row.get("job_id"),
        index_name: row.get("index_name"),
        source_url: row.get("source_url"),
        status: status.parse()?,
        initiated_by_user: row.get("initiated_by_user"),
        initiated_by_team: row.get("initiated_by_team"),
        scope: scope.parse()?,
        started_at: row.get::<chrono::DateTime<Utc>, _>("started_at"),
        completed_at: row.get("completed_at"),
        duration_seconds: row.get("duration_seconds"),
        counters: JobCounters {
            pages_discovered: row.get("pages_discovered"),
            pages_processed: row.get("pages_processed"),
            pages_indexed: row.get("pages_indexed"),
            total_chunks: row.get("total_chunks"),
        },
        error_message: row.get("error_message"),
        error_details: row.get("error_details"),
        metadata: row.get("metadata"),
    })
}

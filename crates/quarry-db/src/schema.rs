//! Shared schema bootstrap.
//!
//! Per-index chunk tables are managed by the vector store; everything else
//! lives in fixed tables created here.

use sqlx::PgPool;
use tracing::debug;

use quarry_core::{Error, Result};

/// Create the shared tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS user_links (
             session_id TEXT PRIMARY KEY,
             user_id    TEXT,
             team_id    TEXT,
             scope      TEXT NOT NULL,
             linked_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
    )
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS doc_access (
             id           UUID PRIMARY KEY,
             user_id      TEXT,
             team_id      TEXT,
             scope        TEXT NOT NULL,
             index_name   TEXT NOT NULL,
             access_level TEXT NOT NULL,
             granted_by   TEXT NOT NULL,
             granted_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
             expires_at   TIMESTAMPTZ
         )",
    )
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    // NULL identifiers must not defeat the uniqueness of a grant tuple.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS doc_access_tuple_idx
         ON doc_access ((COALESCE(user_id, '')), (COALESCE(team_id, '')), scope, index_name)",
    )
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS indexing_jobs (
             job_id            TEXT PRIMARY KEY,
             index_name        TEXT NOT NULL,
             source_url        TEXT NOT NULL,
             status            TEXT NOT NULL,
             initiated_by_user TEXT,
             initiated_by_team TEXT,
             scope             TEXT NOT NULL,
             started_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
             completed_at      TIMESTAMPTZ,
             duration_seconds  DOUBLE PRECISION,
             pages_discovered  BIGINT NOT NULL DEFAULT 0,
             pages_processed   BIGINT NOT NULL DEFAULT 0,
             pages_indexed     BIGINT NOT NULL DEFAULT 0,
             total_chunks      BIGINT NOT NULL DEFAULT 0,
             error_message     TEXT,
             error_details     JSONB,
             metadata          JSONB NOT NULL DEFAULT '{}'::jsonb
         )",
    )
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS indexing_jobs_started_at_idx
         ON indexing_jobs (started_at DESC)",
    )
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    // Singleton counter row for the cross-process embedding limiter.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS docs_embed_rate_window (
             id              SMALLINT PRIMARY KEY CHECK (id = 1),
             minute_start    TIMESTAMPTZ NOT NULL,
             minute_requests BIGINT NOT NULL DEFAULT 0,
             minute_tokens   BIGINT NOT NULL DEFAULT 0,
             day_start       TIMESTAMPTZ NOT NULL,
             day_tokens      BIGINT NOT NULL DEFAULT 0
         )",
    )
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    debug!(
        subsystem = "db",
        component = "schema",
        op = "ensure",
        "Shared schema ensured"
    );
    Ok(())
}

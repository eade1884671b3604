//! Cross-process embedding admission via an advisory lock and a singleton
//! counter row.
//!
//! The lock is only held while the counter row is read and rolled; a caller
//! that must wait releases the lock first, sleeps, and retries, so admission
//! serializes across processes without the lock outliving a decision.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, trace};

use quarry_core::{defaults, Error, Result};

const MINUTE_SECS: i64 = 60;
const DAY_SECS: i64 = 86_400;

/// Distributed rate window sharing quotas across processes.
pub struct PgRateWindow {
    pool: PgPool,
    lock_key: i64,
    requests_per_minute: i64,
    tokens_per_minute: i64,
    tokens_per_day: i64,
}

#[derive(Debug)]
struct WindowRow {
    minute_start: DateTime<Utc>,
    minute_requests: i64,
    minute_tokens: i64,
    day_start: DateTime<Utc>,
    day_tokens: i64,
}

enum Admission {
    Admitted,
    WaitFor(Duration),
}

impl PgRateWindow {
    pub fn new(
        pool: PgPool,
        requests_per_minute: u64,
        tokens_per_minute: u64,
        tokens_per_day: u64,
    ) -> Self {
        Self {
            pool,
            lock_key: defaults::EMBED_RATE_LOCK_KEY,
            requests_per_minute: requests_per_minute as i64,
            tokens_per_minute: tokens_per_minute as i64,
            tokens_per_day: tokens_per_day as i64,
        }
    }

    /// Block until the shared windows admit `(requests, tokens)`.
    pub async fn acquire(&self, requests: u64, tokens: u64) -> Result<()> {
        let requests = requests as i64;
        let tokens = tokens as i64;
        loop {
            let admission = self.locked_attempt(requests, tokens).await?;
            match admission {
                Admission::Admitted => {
                    trace!(
                        subsystem = "db",
                        component = "rate_window",
                        op = "acquire",
                        requests,
                        tokens,
                        "Admitted across processes"
                    );
                    return Ok(());
                }
                Admission::WaitFor(wait) => {
                    debug!(
                        subsystem = "db",
                        component = "rate_window",
                        wait_ms = wait.as_millis() as u64,
                        "Shared window exhausted, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// One lock-read-decide-release cycle.
    ///
    /// Advisory locks are connection-scoped, so the lock and unlock must run
    /// on the same dedicated connection.
    async fn locked_attempt(&self, requests: i64, tokens: i64) -> Result<Admission> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(self.lock_key)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;

        let outcome = self.decide(&mut conn, requests, tokens).await;

        // Release even when the decision failed.
        let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_key)
            .execute(&mut *conn)
            .await;

        let admission = outcome?;
        unlock.map_err(Error::Database)?;
        Ok(admission)
    }

    async fn decide(
        &self,
        conn: &mut PoolConnection<Postgres>,
        requests: i64,
        tokens: i64,
    ) -> Result<Admission> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO docs_embed_rate_window
                 (id, minute_start, minute_requests, minute_tokens, day_start, day_tokens)
             VALUES (1, $1, 0, 0, $1, 0)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(now)
        .execute(&mut **conn)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query(
            "SELECT minute_start, minute_requests, minute_tokens, day_start, day_tokens
             FROM docs_embed_rate_window WHERE id = 1",
        )
        .fetch_one(&mut **conn)
        .await
        .map_err(Error::Database)?;

        let mut window = WindowRow {
            minute_start: row.get("minute_start"),
            minute_requests: row.get("minute_requests"),
            minute_tokens: row.get("minute_tokens"),
            day_start: row.get("day_start"),
            day_tokens: row.get("day_tokens"),
        };
        roll(&mut window, now);

        let admitted = admits(&window, requests, tokens, self);
        if admitted {
            window.minute_requests += requests;
            window.minute_tokens += tokens;
            window.day_tokens += tokens;
        }

        sqlx::query(
            "UPDATE docs_embed_rate_window SET
                 minute_start = $1, minute_requests = $2, minute_tokens = $3,
                 day_start = $4, day_tokens = $5
             WHERE id = 1",
        )
        .bind(window.minute_start)
        .bind(window.minute_requests)
        .bind(window.minute_tokens)
        .bind(window.day_start)
        .bind(window.day_tokens)
        .execute(&mut **conn)
        .await
        .map_err(Error::Database)?;

        if admitted {
            Ok(Admission::Admitted)
        } else {
            Ok(Admission::WaitFor(next_wait(&window, requests, tokens, self, now)))
        }
    }
}

/// Advance window starts by whole window lengths, resetting counters.
fn roll(window: &mut WindowRow, now: DateTime<Utc>) {
    let minute_elapsed = (now - window.minute_start).num_seconds();
    if minute_elapsed >= MINUTE_SECS {
        let windows = minute_elapsed / MINUTE_SECS;
        window.minute_start += chrono::Duration::seconds(windows * MINUTE_SECS);
        window.minute_requests = 0;
        window.minute_tokens = 0;
    }
    let day_elapsed = (now - window.day_start).num_seconds();
    if day_elapsed >= DAY_SECS {
        let windows = day_elapsed / DAY_SECS;
        window.day_start += chrono::Duration::seconds(windows * DAY_SECS);
        window.day_tokens = 0;
    }
}

/// Same admission rule as the in-process limiter: no window may overshoot,
/// except that an oversized cost is admitted alone into an empty window.
fn admits(window: &WindowRow, requests: i64, tokens: i64, limits: &PgRateWindow) -> bool {
    let requests_ok = window.minute_requests + requests <= limits.requests_per_minute
        || window.minute_requests == 0;
    let minute_tokens_ok =
        window.minute_tokens + tokens <= limits.tokens_per_minute || window.minute_tokens == 0;
    let day_tokens_ok =
        window.day_tokens + tokens <= limits.tokens_per_day || window.day_tokens == 0;
    requests_ok && minute_tokens_ok && day_tokens_ok
}

fn next_wait(
    window: &WindowRow,
    requests: i64,
    tokens: i64,
    limits: &PgRateWindow,
    now: DateTime<Utc>,
) -> Duration {
    let minute_blocked = (window.minute_requests + requests > limits.requests_per_minute
        && window.minute_requests > 0)
        || (window.minute_tokens + tokens > limits.tokens_per_minute && window.minute_tokens > 0);
    let day_blocked =
        window.day_tokens + tokens > limits.tokens_per_day && window.day_tokens > 0;

    let mut wake = window.minute_start + chrono::Duration::seconds(MINUTE_SECS);
    if day_blocked {
        let day_wake = window.day_start + chrono::Duration::seconds(DAY_SECS);
        if !minute_blocked || day_wake > wake {
            wake = day_wake;
        }
    }
    (wake - now).to_std().unwrap_or(Duration::from_millis(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(
        minute_ago_secs: i64,
        minute_requests: i64,
        minute_tokens: i64,
        day_tokens: i64,
    ) -> (WindowRow, DateTime<Utc>) {
        let now = Utc::now();
        (
            WindowRow {
                minute_start: now - chrono::Duration::seconds(minute_ago_secs),
                minute_requests,
                minute_tokens,
                day_start: now - chrono::Duration::seconds(minute_ago_secs),
                day_tokens,
            },
            now,
        )
    }

    fn limits(rpm: i64, tpm: i64, tpd: i64) -> PgRateWindow {
        PgRateWindow {
            pool: PgPool::connect_lazy("postgres://localhost/unused").unwrap(),
            lock_key: 1,
            requests_per_minute: rpm,
            tokens_per_minute: tpm,
            tokens_per_day: tpd,
        }
    }

    #[test]
    fn test_roll_resets_expired_minute() {
        let (mut w, now) = window(125, 5, 500, 500);
        let old_start = w.minute_start;
        roll(&mut w, now);
        assert_eq!(w.minute_requests, 0);
        assert_eq!(w.minute_tokens, 0);
        // Two whole windows elapsed.
        assert_eq!(w.minute_start, old_start + chrono::Duration::seconds(120));
        // Day window untouched.
        assert_eq!(w.day_tokens, 500);
    }

    #[test]
    fn test_roll_keeps_fresh_window() {
        let (mut w, now) = window(30, 5, 500, 500);
        roll(&mut w, now);
        assert_eq!(w.minute_requests, 5);
        assert_eq!(w.minute_tokens, 500);
    }

    #[tokio::test]
    async fn test_admits_within_quota() {
        let (w, _) = window(10, 1, 100, 100);
        let l = limits(10, 1_000, 100_000);
        assert!(admits(&w, 1, 100, &l));
    }

    #[tokio::test]
    async fn test_rejects_over_quota() {
        let (w, _) = window(10, 10, 100, 100);
        let l = limits(10, 1_000, 100_000);
        assert!(!admits(&w, 1, 1, &l));
    }

    #[tokio::test]
    async fn test_oversized_cost_admitted_into_empty_window() {
        let (w, _) = window(10, 0, 0, 0);
        let l = limits(10, 100, 1_000);
        assert!(admits(&w, 1, 5_000, &l));
    }

    #[tokio::test]
    async fn test_next_wait_targets_minute_rollover() {
        let (w, now) = window(10, 10, 0, 0);
        let l = limits(10, 1_000, 100_000);
        let wait = next_wait(&w, 1, 1, &l, now);
        assert!(wait <= Duration::from_secs(50));
        assert!(wait >= Duration::from_secs(49));
    }

    #[tokio::test]
    async fn test_next_wait_targets_day_rollover_when_day_blocked() {
        let (w, now) = window(10, 0, 0, 100_000);
        let l = limits(10, 1_000, 100_000);
        let wait = next_wait(&w, 1, 1, &l, now);
        assert!(wait > Duration::from_secs(86_000));
    }
}

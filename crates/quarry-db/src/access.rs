//! Session links and per-index access grants.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use quarry_core::{AccessLevel, Error, Identity, Result, Scope};

/// PostgreSQL access store.
pub struct PgAccessStore {
    pool: PgPool,
}

impl PgAccessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Link a session to an identity, replacing any previous link.
    ///
    /// The identifier matching `scope` must be present; a team-scoped link
    /// may carry the user id as well.
    pub async fn link_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        team_id: Option<&str>,
        scope: Scope,
    ) -> Result<()> {
        let valid = match scope {
            Scope::User => user_id.is_some(),
            Scope::Team => team_id.is_some(),
        };
        if !valid {
            return Err(Error::InvalidInput(format!(
                "Missing {} identifier for session link",
                scope
            )));
        }

        sqlx::query(
            "INSERT INTO user_links (session_id, user_id, team_id, scope, linked_at, updated_at)
             VALUES ($1, $2, $3, $4, now(), now())
             ON CONFLICT (session_id) DO UPDATE SET
                 user_id = EXCLUDED.user_id,
                 team_id = EXCLUDED.team_id,
                 scope = EXCLUDED.scope,
                 updated_at = now()",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(team_id)
        .bind(scope.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "access",
            op = "link_session",
            scope = %scope,
            "Session linked"
        );
        Ok(())
    }

    /// Resolve a session to its identity, refreshing the idle timer.
    pub async fn identity(&self, session_id: &str) -> Result<Identity> {
        let row = sqlx::query(
            "UPDATE user_links SET updated_at = now()
             WHERE session_id = $1
             RETURNING user_id, team_id, scope",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Err(Error::NotLinked(session_id.to_string()));
        };

        let scope: Scope = row.get::<String, _>("scope").parse()?;
        let id: Option<String> = match scope {
            Scope::User => row.get("user_id"),
            Scope::Team => row.get("team_id"),
        };
        id.map(|id| Identity { id, scope }).ok_or_else(|| {
            Error::Internal(format!(
                "Session link {} has no identifier for its scope",
                session_id
            ))
        })
    }

    /// Upsert a grant, unique by `(user_id, team_id, scope, index_name)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn grant(
        &self,
        user_id: Option<&str>,
        team_id: Option<&str>,
        scope: Scope,
        index_name: &str,
        access_level: AccessLevel,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO doc_access
                 (id, user_id, team_id, scope, index_name, access_level, granted_by, granted_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), $8)
             ON CONFLICT ((COALESCE(user_id, '')), (COALESCE(team_id, '')), scope, index_name)
             DO UPDATE SET
                 access_level = EXCLUDED.access_level,
                 granted_by = EXCLUDED.granted_by,
                 granted_at = now(),
                 expires_at = EXCLUDED.expires_at",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(team_id)
        .bind(scope.as_str())
        .bind(index_name)
        .bind(access_level.as_str())
        .bind(granted_by)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "access",
            op = "grant",
            index_name = %index_name,
            access_level = %access_level,
            "Grant recorded"
        );
        Ok(())
    }

    /// Distinct index names the identity can read: any non-expired grant
    /// matching the identity, or a universal grant.
    pub async fn accessible_indexes(&self, identity: &Identity) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT index_name FROM doc_access
             WHERE (expires_at IS NULL OR expires_at > now())
               AND ((user_id IS NULL AND team_id IS NULL)
                 OR (scope = $1 AND scope = 'user' AND user_id = $2)
                 OR (scope = $1 AND scope = 'team' AND team_id = $2))
             ORDER BY index_name",
        )
        .bind(identity.scope.as_str())
        .bind(&identity.id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows)
    }

    /// Whether the identity's best in-force grant satisfies `required`.
    pub async fn has_access(
        &self,
        identity: &Identity,
        index_name: &str,
        required: AccessLevel,
    ) -> Result<bool> {
        let levels = sqlx::query_scalar::<_, String>(
            "SELECT access_level FROM doc_access
             WHERE index_name = $3
               AND (expires_at IS NULL OR expires_at > now())
               AND ((user_id IS NULL AND team_id IS NULL)
                 OR (scope = $1 AND scope = 'user' AND user_id = $2)
                 OR (scope = $1 AND scope = 'team' AND team_id = $2))",
        )
        .bind(identity.scope.as_str())
        .bind(&identity.id)
        .bind(index_name)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let best = levels
            .iter()
            .filter_map(|level| level.parse::<AccessLevel>().ok())
            .max();
        Ok(best.map(|level| level.satisfies(required)).unwrap_or(false))
    }

    /// Garbage-collect session links idle for longer than `idle_days`.
    pub async fn prune_stale_links(&self, idle_days: i32) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM user_links
             WHERE updated_at < now() - make_interval(days => $1)",
        )
        .bind(idle_days)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let pruned = result.rows_affected() as i64;
        if pruned > 0 {
            debug!(
                subsystem = "db",
                component = "access",
                op = "prune_stale_links",
                pruned,
                "Stale session links removed"
            );
        }
        Ok(pruned)
    }
}

//! The operation surface consumed by transports.
//!
//! Transports (MCP, HTTP) resolve a session id and call these operations;
//! the service never manufactures identities and answers access failures
//! with `NotLinked`/`AccessDenied` rather than not-found, so callers cannot
//! probe for index existence.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use quarry_core::{
    defaults, derive_index_name, estimate_tokens, AccessLevel, Error, Identity, IndexingJob,
    Result, Scope, SearchResult, SourceType,
};
use quarry_db::{CreateJobRequest, Database};
use quarry_embed::{with_retry, Embedder};

use crate::config::IngestConfig;
use crate::orchestrator::Ingestor;

/// Embedding configuration as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingConfig {
    pub provider: quarry_embed::EmbeddingProvider,
    pub model: String,
    pub dimension: usize,
}

/// The documentation search service.
pub struct DocService {
    ingestor: Ingestor,
}

impl DocService {
    pub fn new(db: Database, embedder: Embedder, config: IngestConfig) -> Self {
        Self {
            ingestor: Ingestor::new(db, embedder, config),
        }
    }

    /// Connect to the store and build the embedder from a config.
    pub async fn connect(config: IngestConfig) -> Result<Self> {
        let db = Database::connect(&config.database_url).await?;
        let embedder = config.build_embedder()?;
        Ok(Self::new(db, embedder, config))
    }

    /// Build the whole service from the environment.
    pub async fn from_env() -> Result<Self> {
        Self::connect(IngestConfig::from_env()?).await
    }

    /// The orchestrator, for the durable-execution engine to drive.
    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    fn db(&self) -> &Database {
        &self.ingestor.db
    }

    // ── Identity ──────────────────────────────────────────────────────────

    /// Link a session to an identity.
    pub async fn link(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        team_id: Option<&str>,
        scope: Scope,
    ) -> Result<()> {
        self.db()
            .access
            .link_session(session_id, user_id, team_id, scope)
            .await
    }

    /// Record an access grant.
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
        self.db()
            .access
            .grant(
                user_id,
                team_id,
                scope,
                index_name,
                access_level,
                granted_by,
                expires_at,
            )
            .await
    }

    /// Index names the caller can read.
    pub async fn list_accessible_indexes(&self, session_id: &str) -> Result<Vec<String>> {
        let identity = self.db().access.identity(session_id).await?;
        self.db().access.accessible_indexes(&identity).await
    }

    // ── Jobs ──────────────────────────────────────────────────────────────

    /// Create an HTML ingest job row for the caller.
    ///
    /// Execution belongs to the durable engine, which picks up the returned
    /// job id and invokes the orchestrator.
    pub async fn start_html_ingest(&self, session_id: &str, url: &str) -> Result<IndexingJob> {
        self.start_ingest(session_id, url, SourceType::Html).await
    }

    /// Create a PDF ingest job row for the caller.
    pub async fn start_pdf_ingest(&self, session_id: &str, url: &str) -> Result<IndexingJob> {
        self.start_ingest(session_id, url, SourceType::Pdf).await
    }

    async fn start_ingest(
        &self,
        session_id: &str,
        url: &str,
        source_type: SourceType,
    ) -> Result<IndexingJob> {
        let identity = self.db().access.identity(session_id).await?;
        let index_name = derive_index_name(url)?;
        let job_id = format!("job-{}", Uuid::new_v4());

        let (user_id, team_id) = match identity.scope {
            Scope::User => (Some(identity.id.clone()), None),
            Scope::Team => (None, Some(identity.id.clone())),
        };

        self.db()
            .jobs
            .create(CreateJobRequest {
                job_id: job_id.clone(),
                index_name: index_name.clone(),
                source_url: url.to_string(),
                user_id: user_id.clone(),
                team_id: team_id.clone(),
                scope: identity.scope,
                metadata: json!({ "source_type": source_type }),
            })
            .await?;

        // The initiator administers the index they are creating.
        self.db()
            .access
            .grant(
                user_id.as_deref(),
                team_id.as_deref(),
                identity.scope,
                &index_name,
                AccessLevel::Admin,
                &identity.id,
                None,
            )
            .await?;

        info!(
            subsystem = "ingest",
            component = "service",
            op = "start_ingest",
            job_id = %job_id,
            index_name = %index_name,
            "Ingest job registered"
        );

        self.db()
            .jobs
            .get(&job_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Job {} vanished after create", job_id)))
    }

    /// Fetch a job's row, including any failure details, verbatim.
    pub async fn job_status(&self, session_id: &str, job_id: &str) -> Result<IndexingJob> {
        let identity = self.db().access.identity(session_id).await?;
        let Some(job) = self.db().jobs.get(job_id).await? else {
            // Unknown ids answer like forbidden ones.
            return Err(Error::AccessDenied(job_id.to_string()));
        };

        if !self.can_see_job(&identity, &job).await? {
            return Err(Error::AccessDenied(job_id.to_string()));
        }
        Ok(job)
    }

    /// The caller's jobs, newest first.
    pub async fn list_jobs(&self, session_id: &str, limit: i64) -> Result<Vec<IndexingJob>> {
        let identity = self.db().access.identity(session_id).await?;
        self.db().jobs.list_by_identity(&identity, limit).await
    }

    /// Transition a job to `cancelled`; a no-op when already terminal.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        self.db()
            .jobs
            .update_status(job_id, quarry_core::JobStatus::Cancelled, None, None, None)
            .await
    }

    async fn can_see_job(&self, identity: &Identity, job: &IndexingJob) -> Result<bool> {
        let owns = job.scope == identity.scope
            && match identity.scope {
                Scope::User => job.initiated_by_user.as_deref() == Some(identity.id.as_str()),
                Scope::Team => job.initiated_by_team.as_deref() == Some(identity.id.as_str()),
            };
        if owns {
            return Ok(true);
        }
        self.db()
            .access
            .has_access(identity, &job.index_name, AccessLevel::Read)
            .await
    }

    // ── Search ────────────────────────────────────────────────────────────

    /// Semantic query against one index. Requires a `read` grant.
    pub async fn search(
        &self,
        session_id: &str,
        index_name: &str,
        query: &str,
        k: i64,
    ) -> Result<Vec<SearchResult>> {
        let identity = self.db().access.identity(session_id).await?;
        if !self
            .db()
            .access
            .has_access(&identity, index_name, AccessLevel::Read)
            .await?
        {
            return Err(Error::AccessDenied(index_name.to_string()));
        }
        // A granted-but-never-ingested index answers the same way, so a
        // caller cannot distinguish absent indexes from forbidden ones.
        if !self.db().store.store_exists(index_name).await? {
            return Err(Error::AccessDenied(index_name.to_string()));
        }

        let k = k.clamp(defaults::SEARCH_K_MIN, defaults::SEARCH_K_MAX);

        let texts = vec![query.to_string()];
        self.ingestor.limiter.acquire(1, estimate_tokens(query)).await;
        let ingestor = &self.ingestor;
        let mut vectors = with_retry(&ingestor.retry, || {
            let texts = &texts;
            async move { ingestor.embedder.embed_batch(texts).await }
        })
        .await?;
        let vector = match vectors.pop() {
            Some(vector) if vectors.is_empty() => vector,
            _ => {
                return Err(Error::Embedding(
                    "Provider returned no vector for the query".to_string(),
                ))
            }
        };

        let hits = self
            .db()
            .store
            .ann_search(index_name, &Vector::from(vector), k)
            .await?;

        info!(
            subsystem = "ingest",
            component = "service",
            op = "search",
            index_name = %index_name,
            result_count = hits.len(),
            "Search complete"
        );

        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                url: hit.url,
                title: hit.title,
                snippet: truncate_snippet(&hit.content, defaults::SNIPPET_LENGTH),
                score: hit.score,
            })
            .collect())
    }

    /// Report the active embedding configuration.
    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: self.ingestor.embedder.provider(),
            model: self.ingestor.embedder.model().to_string(),
            dimension: self.ingestor.embedder.dimension(),
        }
    }

    // ── Maintenance ───────────────────────────────────────────────────────

    /// Prune old terminal jobs and stale session links.
    pub async fn run_maintenance(&self) -> Result<()> {
        let jobs = self.db().jobs.prune(defaults::JOB_RETENTION_DAYS).await?;
        let links = self
            .db()
            .access
            .prune_stale_links(defaults::SESSION_IDLE_DAYS as i32)
            .await?;
        info!(
            subsystem = "ingest",
            component = "service",
            op = "maintenance",
            pruned_jobs = jobs,
            pruned_links = links,
            "Maintenance pass complete"
        );
        Ok(())
    }
}

/// Truncate content to at most `max` characters on a character boundary.
fn truncate_snippet(content: &str, max: usize) -> String {
    if content.chars().count() <= max {
        content.to_string()
    } else {
        content.chars().take(max).collect()
    }
}

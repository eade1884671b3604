//! The ingest orchestrator.
//!
//! Wires sitemap discovery, the crawler, the chunker, the rate-limited
//! embedding client, and the vector store together, and drives the durable
//! job row through its state machine. The orchestrator is safe to re-run
//! against the same `(index, url)`: chunk addresses are content hashes and
//! upserts are idempotent.

use std::time::Instant as StdInstant;

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};
use url::Url;

use quarry_core::{
    chunk_text, defaults, derive_index_name, estimate_batch_tokens, ChunkMetadata, ChunkerConfig,
    Error, JobCounters, JobStatus, Result, SourceType,
};
use quarry_crawl::{CrawledPage, Crawler, PageSink, SitemapDiscoverer};
use quarry_db::{Database, PgRateWindow};
use quarry_embed::{with_retry, Embedder, RateLimiter, RetryPolicy};

use crate::config::IngestConfig;
use crate::pdf::{extract_pdf, fetch_pdf_bytes};

/// Drives one ingest job end to end.
pub struct Ingestor {
    pub(crate) db: Database,
    pub(crate) embedder: Embedder,
    pub(crate) limiter: RateLimiter,
    pub(crate) rate_window: Option<PgRateWindow>,
    pub(crate) retry: RetryPolicy,
    pub(crate) config: IngestConfig,
}

impl Ingestor {
    pub fn new(db: Database, embedder: Embedder, config: IngestConfig) -> Self {
        let limiter = RateLimiter::new(config.limiter_config());
        let rate_window = config.distributed.then(|| {
            db.rate_window(
                config.requests_per_minute,
                config.tokens_per_minute,
                config.tokens_per_day,
            )
        });
        let retry = config.retry_policy();
        Self {
            db,
            embedder,
            limiter,
            rate_window,
            retry,
            config,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Crawl a documentation site and index its pages.
    ///
    /// Invoked by the durable-execution engine with the engine's workflow id
    /// as `job_id`; retries and per-attempt timeouts belong to the engine.
    pub async fn run_html_ingest(&self, source_url: &str, job_id: &str) -> Result<JobCounters> {
        let (counters, err) = self.html_attempt(source_url, job_id).await;
        self.finalize(job_id, counters, err).await
    }

    /// Fetch and index a single PDF.
    pub async fn run_pdf_ingest(&self, pdf_url: &str, job_id: &str) -> Result<JobCounters> {
        let (counters, err) = self.pdf_attempt(pdf_url, job_id).await;
        self.finalize(job_id, counters, err).await
    }

    async fn html_attempt(&self, source_url: &str, job_id: &str) -> (JobCounters, Option<Error>) {
        let zero = JobCounters::default();

        let index_name = match derive_index_name(source_url) {
            Ok(name) => name,
            Err(e) => return (zero, Some(e)),
        };
        if let Err(e) = self.mark_running(job_id).await {
            return (zero, Some(e));
        }
        if let Err(e) = self
            .db
            .store
            .ensure_store(&index_name, self.embedder.dimension())
            .await
        {
            return (zero, Some(e));
        }

        let seed_url = match Url::parse(source_url) {
            Ok(url) => url,
            Err(e) => {
                return (
                    zero,
                    Some(Error::InvalidInput(format!(
                        "Invalid source URL {}: {}",
                        source_url, e
                    ))),
                )
            }
        };

        let seeds = match SitemapDiscoverer::new(&self.config.user_agent, self.config.timeout) {
            Ok(discoverer) => discoverer.discover(&seed_url).await,
            Err(e) => {
                warn!(
                    subsystem = "ingest",
                    component = "orchestrator",
                    error = %e,
                    "Sitemap discovery unavailable, crawling from the seed alone"
                );
                Vec::new()
            }
        };

        let options = match self.config.crawl_options(&seed_url) {
            Ok(options) => options,
            Err(e) => return (zero, Some(e)),
        };
        let crawler = match Crawler::new(options) {
            Ok(crawler) => crawler,
            Err(e) => return (zero, Some(e)),
        };

        info!(
            subsystem = "ingest",
            component = "orchestrator",
            op = "html_ingest",
            job_id = %job_id,
            index_name = %index_name,
            seed_count = seeds.len(),
            "Starting HTML ingest"
        );

        let mut sink = IngestSink {
            flusher: Flusher::new(self, index_name, job_id, source_url, SourceType::Html, None),
            deadline: Instant::now() + self.config.job_deadline,
        };

        let crawl_err = crawler.crawl(source_url, &seeds, &mut sink).await.err();
        // Drain whatever is buffered even when the crawl stopped early, so
        // pages already embedded are not lost.
        let finish_err = sink.flusher.finish().await.err();
        (sink.flusher.counters, crawl_err.or(finish_err))
    }

    async fn pdf_attempt(&self, pdf_url: &str, job_id: &str) -> (JobCounters, Option<Error>) {
        let zero = JobCounters::default();

        let index_name = match derive_index_name(pdf_url) {
            Ok(name) => name,
            Err(e) => return (zero, Some(e)),
        };
        if let Err(e) = self.mark_running(job_id).await {
            return (zero, Some(e));
        }
        if let Err(e) = self
            .db
            .store
            .ensure_store(&index_name, self.embedder.dimension())
            .await
        {
            return (zero, Some(e));
        }

        let bytes =
            match fetch_pdf_bytes(pdf_url, &self.config.user_agent, self.config.timeout).await {
                Ok(bytes) => bytes,
                Err(e) => return (zero, Some(e)),
            };
        let document = match extract_pdf(&bytes, pdf_url).await {
            Ok(document) => document,
            Err(e) => return (zero, Some(e)),
        };

        info!(
            subsystem = "ingest",
            component = "orchestrator",
            op = "pdf_ingest",
            job_id = %job_id,
            index_name = %index_name,
            page_count = document.page_count,
            "Starting PDF ingest"
        );

        // The whole PDF counts as one logical page.
        let mut flusher = Flusher::new(
            self,
            index_name,
            job_id,
            pdf_url,
            SourceType::Pdf,
            Some(document.page_count),
        );
        let add_err = flusher
            .add_page(pdf_url, &document.title, &document.text)
            .await
            .err();
        let finish_err = flusher.finish().await.err();
        (flusher.counters, add_err.or(finish_err))
    }

    async fn mark_running(&self, job_id: &str) -> Result<()> {
        let updated = self
            .db
            .jobs
            .update_status(job_id, JobStatus::Running, None, None, None)
            .await?;
        if !updated {
            return Err(Error::Job(format!(
                "Job {} is unknown or already terminal",
                job_id
            )));
        }
        Ok(())
    }

    /// Record the terminal outcome on the job row and surface the error.
    async fn finalize(
        &self,
        job_id: &str,
        counters: JobCounters,
        err: Option<Error>,
    ) -> Result<JobCounters> {
        let (status, message, details) = match &err {
            None => (JobStatus::Completed, None, None),
            Some(e @ Error::Deadline(_)) => (JobStatus::Timeout, Some(e.to_string()), None),
            Some(e) => (
                JobStatus::Failed,
                Some(e.to_string()),
                Some(json!({ "kind": error_kind(e), "detail": e.to_string() })),
            ),
        };

        let update = self
            .db
            .jobs
            .update_status(
                job_id,
                status,
                Some(counters),
                message.as_deref(),
                details.as_ref(),
            )
            .await;
        if let Err(update_err) = update {
            error!(
                subsystem = "ingest",
                component = "orchestrator",
                job_id = %job_id,
                error = %update_err,
                "Failed to record job outcome"
            );
            return Err(err.unwrap_or(update_err));
        }

        info!(
            subsystem = "ingest",
            component = "orchestrator",
            op = "finalize",
            job_id = %job_id,
            status = %status,
            page_count = counters.pages_processed,
            chunk_count = counters.total_chunks,
            success = err.is_none(),
            "Ingest finished"
        );

        match err {
            None => Ok(counters),
            Some(e) => Err(e),
        }
    }
}

fn error_kind(e: &Error) -> &'static str {
    match e {
        Error::Database(_) => "database",
        Error::Request(_) => "request",
        Error::Provider { .. } => "provider",
        Error::Crawl(_) => "crawl",
        Error::Extract(_) => "extract",
        Error::Embedding(_) => "embedding",
        Error::Job(_) => "job",
        Error::Deadline(_) => "deadline",
        Error::Config(_) => "config",
        Error::InvalidInput(_) => "invalid_input",
        Error::NotLinked(_) => "not_linked",
        Error::AccessDenied(_) => "access_denied",
        Error::Serialization(_) => "serialization",
        Error::Internal(_) => "internal",
        Error::Io(_) => "io",
    }
}

struct PendingChunk {
    url: String,
    title: String,
    content: String,
}

/// Accumulates chunks from delivered pages and flushes them in batches
/// through the limiter, the embedder, and the vector store.
pub(crate) struct Flusher<'a> {
    ingestor: &'a Ingestor,
    index_name: String,
    job_id: String,
    source_url: String,
    source_type: SourceType,
    page_count: Option<u64>,
    chunker: ChunkerConfig,
    pending: Vec<PendingChunk>,
    pub(crate) counters: JobCounters,
    last_persist: StdInstant,
}

impl<'a> Flusher<'a> {
    fn new(
        ingestor: &'a Ingestor,
        index_name: String,
        job_id: &str,
        source_url: &str,
        source_type: SourceType,
        page_count: Option<u64>,
    ) -> Self {
        Self {
            ingestor,
            index_name,
            job_id: job_id.to_string(),
            source_url: source_url.to_string(),
            source_type,
            page_count,
            chunker: ChunkerConfig::default(),
            pending: Vec::new(),
            counters: JobCounters::default(),
            last_persist: StdInstant::now(),
        }
    }

    /// Chunk a delivered page into the pending buffer, flushing full
    /// batches as they form. Blocking here is the crawl's back-pressure.
    async fn add_page(&mut self, url: &str, title: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.counters.pages_discovered += 1;
        self.counters.pages_processed += 1;

        let chunks = chunk_text(text, &self.chunker);
        if chunks.is_empty() {
            return Ok(());
        }
        self.counters.pages_indexed += 1;

        for content in chunks {
            self.pending.push(PendingChunk {
                url: url.to_string(),
                title: title.to_string(),
                content,
            });
        }
        while self.pending.len() >= self.ingestor.config.batch_size {
            self.flush_batch().await?;
        }
        Ok(())
    }

    /// Embed and upsert one batch from the front of the buffer.
    async fn flush_batch(&mut self) -> Result<()> {
        let take = self.pending.len().min(self.ingestor.config.batch_size);
        if take == 0 {
            return Ok(());
        }
        let batch: Vec<PendingChunk> = self.pending.drain(..take).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let tokens = estimate_batch_tokens(&texts);

        let ingestor = self.ingestor;
        if let Some(window) = &ingestor.rate_window {
            window.acquire(1, tokens).await?;
        }
        ingestor.limiter.acquire(1, tokens).await;

        let vectors = with_retry(&ingestor.retry, || {
            let texts = &texts;
            async move { ingestor.embedder.embed_batch(texts).await }
        })
        .await?;

        // All upserts must land before the job is credited with the batch.
        for (chunk, vector) in batch.iter().zip(vectors) {
            let chunk_url = format!("{}#{:x}", chunk.url, md5::compute(chunk.content.as_bytes()));
            let metadata = serde_json::to_value(ChunkMetadata {
                source: self.source_url.clone(),
                source_type: self.source_type,
                title: chunk.title.clone(),
                size: chunk.content.chars().count(),
                page_count: self.page_count,
            })?;
            ingestor
                .db
                .store
                .upsert(
                    &self.index_name,
                    &chunk_url,
                    &chunk.title,
                    &chunk.content,
                    &Vector::from(vector),
                    &metadata,
                )
                .await?;
            self.counters.total_chunks += 1;
        }

        self.maybe_persist().await
    }

    /// Flush the residual buffer and persist final counters.
    pub(crate) async fn finish(&mut self) -> Result<()> {
        while !self.pending.is_empty() {
            self.flush_batch().await?;
        }
        self.ingestor
            .db
            .jobs
            .update_progress(&self.job_id, self.counters)
            .await
    }

    async fn maybe_persist(&mut self) -> Result<()> {
        if self.last_persist.elapsed().as_secs() >= defaults::PROGRESS_PERSIST_SECS {
            self.ingestor
                .db
                .jobs
                .update_progress(&self.job_id, self.counters)
                .await?;
            self.last_persist = StdInstant::now();
        }
        Ok(())
    }
}

/// Page sink feeding the flusher, with the job deadline enforced at each
/// delivery.
struct IngestSink<'a> {
    flusher: Flusher<'a>,
    deadline: Instant,
}

#[async_trait]
impl PageSink for IngestSink<'_> {
    async fn page(&mut self, page: CrawledPage) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(Error::Deadline(
                "Ingest deadline reached, stopping the crawl".to_string(),
            ));
        }
        self.flusher
            .add_page(&page.url, &page.title, &page.text)
            .await
    }
}

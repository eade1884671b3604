//! Service configuration from environment variables.

use std::time::Duration;

use regex::Regex;
use url::Url;

use quarry_core::{defaults, Error, Result};
use quarry_crawl::{default_concurrency, default_exclude_patterns, CrawlOptions};
use quarry_embed::{
    Embedder, EmbeddingProvider, GeminiEmbedder, OpenAiEmbedder, RateLimitConfig, RetryPolicy,
};

/// Resolved ingest configuration.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `DATABASE_URL` | required | Vector store connection string |
/// | `DOCS_MAX_PAGES` | `10000` | Crawl page cap |
/// | `DOCS_CONCURRENCY` | `min(16, max(4, cpus))` | Crawler worker count |
/// | `DOCS_TIMEOUT_MS` | `30000` | Per-HTTP-request timeout |
/// | `DOCS_USER_AGENT` | built-in | Crawler UA header |
/// | `DOCS_INCLUDE_REGEX` | unset | URL include filter |
/// | `DOCS_EXCLUDE_REGEX` | unset | URL exclude filter (adds to built-ins) |
/// | `DOCS_EMBED_BATCH_SIZE` | `32` | Chunks per embedding call |
/// | `DOCS_EMBED_RPM` | `3000` | Requests/minute window |
/// | `DOCS_EMBED_TPM` | `1000000` | Tokens/minute window |
/// | `DOCS_EMBED_TPD` | `50000000` | Tokens/day window |
/// | `DOCS_EMBED_MAX_RETRIES` | `5` | Transient-failure retries |
/// | `DOCS_EMBED_INITIAL_BACKOFF_MS` | `1000` | First retry backoff |
/// | `DOCS_EMBED_DISTRIBUTED` | `false` | Cross-process limiter coordination |
/// | `EMBEDDING_PROVIDER` | `openai` | `openai` or `gemini` |
/// | `OPENAI_API_KEY` / `GEMINI_API_KEY` | required | Provider credential |
/// | `EMBEDDING_MODEL` | provider default | Embedding model name |
/// | `EMBEDDING_DIMENSIONS` | provider default | Requested vector dimension |
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: String,
    pub max_pages: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub user_agent: String,
    pub include_regex: Option<String>,
    pub exclude_regex: Option<String>,
    pub batch_size: usize,
    pub requests_per_minute: u64,
    pub tokens_per_minute: u64,
    pub tokens_per_day: u64,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub distributed: bool,
    pub provider: EmbeddingProvider,
    pub api_key: String,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    /// Overall deadline for one ingest attempt.
    pub job_deadline: Duration,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl IngestConfig {
    /// Read configuration from the environment.
    ///
    /// Missing store DSN or provider key fails fast, before any job reaches
    /// `running`.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL is not set".to_string()))?;

        let provider: EmbeddingProvider = std::env::var("EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .parse()
            .map_err(Error::Config)?;

        let key_var = match provider {
            EmbeddingProvider::OpenAi => "OPENAI_API_KEY",
            EmbeddingProvider::Gemini => "GEMINI_API_KEY",
        };
        let api_key = std::env::var(key_var)
            .map_err(|_| Error::Config(format!("{} is not set", key_var)))?;

        Ok(Self {
            database_url,
            max_pages: env_parse("DOCS_MAX_PAGES", defaults::MAX_PAGES),
            concurrency: env_parse("DOCS_CONCURRENCY", default_concurrency()).max(1),
            timeout: Duration::from_millis(env_parse(
                "DOCS_TIMEOUT_MS",
                defaults::HTTP_TIMEOUT_MS,
            )),
            user_agent: std::env::var("DOCS_USER_AGENT")
                .unwrap_or_else(|_| defaults::USER_AGENT.to_string()),
            include_regex: std::env::var("DOCS_INCLUDE_REGEX").ok(),
            exclude_regex: std::env::var("DOCS_EXCLUDE_REGEX").ok(),
            batch_size: env_parse("DOCS_EMBED_BATCH_SIZE", defaults::EMBED_BATCH_SIZE).max(1),
            requests_per_minute: env_parse("DOCS_EMBED_RPM", defaults::EMBED_RPM),
            tokens_per_minute: env_parse("DOCS_EMBED_TPM", defaults::EMBED_TPM),
            tokens_per_day: env_parse("DOCS_EMBED_TPD", defaults::EMBED_TPD),
            max_retries: env_parse("DOCS_EMBED_MAX_RETRIES", defaults::EMBED_MAX_RETRIES),
            initial_backoff: Duration::from_millis(env_parse(
                "DOCS_EMBED_INITIAL_BACKOFF_MS",
                defaults::EMBED_INITIAL_BACKOFF_MS,
            )),
            distributed: env_bool("DOCS_EMBED_DISTRIBUTED"),
            provider,
            api_key,
            model: std::env::var("EMBEDDING_MODEL").ok(),
            dimensions: std::env::var("EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|v| v.parse().ok()),
            job_deadline: Duration::from_secs(defaults::JOB_DEADLINE_SECS),
        })
    }

    /// Crawl options for a given seed URL.
    ///
    /// The path prefix equals the seed's path when it is not the site root,
    /// keeping the crawl inside the documentation subtree.
    pub fn crawl_options(&self, seed: &Url) -> Result<CrawlOptions> {
        let mut include = Vec::new();
        if let Some(pattern) = &self.include_regex {
            include.push(compile(pattern)?);
        }
        let mut exclude = default_exclude_patterns();
        if let Some(pattern) = &self.exclude_regex {
            exclude.push(compile(pattern)?);
        }

        let path = seed.path();
        let path_prefix = (path != "/" && !path.is_empty()).then(|| path.to_string());

        Ok(CrawlOptions {
            max_pages: self.max_pages,
            concurrency: self.concurrency,
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            include,
            exclude,
            path_prefix,
        })
    }

    pub fn limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: self.requests_per_minute,
            tokens_per_minute: self.tokens_per_minute,
            tokens_per_day: self.tokens_per_day,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: self.initial_backoff,
        }
    }

    /// Build the configured embedding client.
    pub fn build_embedder(&self) -> Result<Embedder> {
        match self.provider {
            EmbeddingProvider::OpenAi => {
                let embedder = OpenAiEmbedder::with_config(
                    std::env::var("OPENAI_BASE_URL")
                        .unwrap_or_else(|_| defaults::OPENAI_BASE_URL.to_string()),
                    self.api_key.clone(),
                    self.model
                        .clone()
                        .unwrap_or_else(|| defaults::OPENAI_EMBED_MODEL.to_string()),
                    self.dimensions.unwrap_or(defaults::OPENAI_EMBED_DIMENSION),
                )?;
                Ok(Embedder::OpenAi(embedder))
            }
            EmbeddingProvider::Gemini => {
                let embedder = GeminiEmbedder::with_config(
                    std::env::var("GEMINI_BASE_URL")
                        .unwrap_or_else(|_| defaults::GEMINI_BASE_URL.to_string()),
                    self.api_key.clone(),
                    self.model
                        .clone()
                        .unwrap_or_else(|| defaults::GEMINI_EMBED_MODEL.to_string()),
                    self.dimensions.unwrap_or(defaults::GEMINI_EMBED_DIMENSION),
                )?;
                Ok(Embedder::Gemini(embedder))
            }
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("Invalid URL pattern {}: {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> IngestConfig {
        IngestConfig {
            database_url: "postgres://localhost/test".to_string(),
            max_pages: 100,
            concurrency: 4,
            timeout: Duration::from_secs(10),
            user_agent: "test-agent".to_string(),
            include_regex: None,
            exclude_regex: None,
            batch_size: 8,
            requests_per_minute: 10,
            tokens_per_minute: 1_000,
            tokens_per_day: 10_000,
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            distributed: false,
            provider: EmbeddingProvider::OpenAi,
            api_key: "test-key".to_string(),
            model: None,
            dimensions: Some(3),
            job_deadline: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_crawl_options_sets_path_prefix_for_non_root_seed() {
        let config = test_config();
        let seed = Url::parse("https://example.com/docs/guide").unwrap();
        let options = config.crawl_options(&seed).unwrap();
        assert_eq!(options.path_prefix.as_deref(), Some("/docs/guide"));
        assert_eq!(options.max_pages, 100);
    }

    #[test]
    fn test_crawl_options_no_prefix_for_root_seed() {
        let config = test_config();
        let seed = Url::parse("https://example.com/").unwrap();
        let options = config.crawl_options(&seed).unwrap();
        assert!(options.path_prefix.is_none());
    }

    #[test]
    fn test_extra_exclude_is_appended() {
        let config = IngestConfig {
            exclude_regex: Some(r"/changelog/".to_string()),
            ..test_config()
        };
        let seed = Url::parse("https://example.com/").unwrap();
        let options = config.crawl_options(&seed).unwrap();
        assert!(options
            .exclude
            .iter()
            .any(|re| re.is_match("https://example.com/changelog/v1")));
        // Built-ins are still present.
        assert!(options
            .exclude
            .iter()
            .any(|re| re.is_match("https://example.com/login")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = IngestConfig {
            include_regex: Some("([".to_string()),
            ..test_config()
        };
        let seed = Url::parse("https://example.com/").unwrap();
        assert!(matches!(
            config.crawl_options(&seed),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_limiter_and_retry_mapping() {
        let config = test_config();
        let limits = config.limiter_config();
        assert_eq!(limits.requests_per_minute, 10);
        assert_eq!(limits.tokens_per_minute, 1_000);
        assert_eq!(limits.tokens_per_day, 10_000);

        let retry = config.retry_policy();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.initial_backoff, Duration::from_millis(100));
    }
}

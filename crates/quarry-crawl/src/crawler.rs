//! Bounded breadth-first crawler over same-host documentation URLs.
//!
//! A single coordinator owns the visited set and queue; fetches run as
//! spawned tasks capped at the configured concurrency. Each successfully
//! fetched page is delivered to the sink exactly once, in completion order.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header, redirect, Client};
use tokio::task::JoinSet;
use tracing::{debug, info};
use url::Url;

use quarry_core::{defaults, Error, Result};

use crate::canonical::{canonicalize_url, is_asset_url};
use crate::extract::extract_content;

/// Options for one crawl.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Stop after this many URLs have been claimed for fetching.
    pub max_pages: usize,
    /// Maximum in-flight fetches.
    pub concurrency: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// When non-empty, a URL must match at least one pattern to be enqueued.
    pub include: Vec<Regex>,
    /// A URL matching any pattern is never enqueued.
    pub exclude: Vec<Regex>,
    /// When set, enqueued URL paths must start with this prefix.
    pub path_prefix: Option<String>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: defaults::MAX_PAGES,
            concurrency: default_concurrency(),
            timeout: Duration::from_millis(defaults::HTTP_TIMEOUT_MS),
            user_agent: defaults::USER_AGENT.to_string(),
            include: Vec::new(),
            exclude: default_exclude_patterns(),
            path_prefix: None,
        }
    }
}

/// Default worker count: `min(16, max(4, cpus))`.
pub fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(defaults::FALLBACK_CPU_COUNT);
    cpus.clamp(4, 16)
}

/// The built-in exclude set: authentication, category/tag/feed pages, and
/// non-HTML media descriptors.
pub fn default_exclude_patterns() -> Vec<Regex> {
    defaults::DEFAULT_EXCLUDE_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

/// A page delivered to the sink.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// Receiver for crawled pages. Blocking in `page` is the crawl's
/// back-pressure point: no new fetches are claimed while it waits.
#[async_trait]
pub trait PageSink: Send {
    async fn page(&mut self, page: CrawledPage) -> Result<()>;
}

/// Totals for one finished crawl.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlStats {
    /// Pages delivered to the sink.
    pub pages_delivered: usize,
    /// Fetches that failed and were skipped.
    pub pages_failed: usize,
}

/// Bounded breadth-first crawler.
pub struct Crawler {
    client: Client,
    options: CrawlOptions,
}

struct FetchedPage {
    title: String,
    text: String,
    links: Vec<String>,
}

impl Crawler {
    pub fn new(options: CrawlOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&options.user_agent)
            .timeout(options.timeout)
            .redirect(redirect::Policy::limited(defaults::MAX_REDIRECTS))
            .gzip(true)
            .build()
            .map_err(|e| Error::Crawl(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, options })
    }

    /// Crawl breadth-first from `seed` plus `extra_seeds`.
    ///
    /// Individual fetch and parse failures are swallowed; a sink error stops
    /// the crawl, drains in-flight fetches, and is returned to the caller.
    pub async fn crawl(
        &self,
        seed: &str,
        extra_seeds: &[String],
        sink: &mut dyn PageSink,
    ) -> Result<CrawlStats> {
        let seed_url =
            Url::parse(seed).map_err(|e| Error::Crawl(format!("Invalid seed {}: {}", seed, e)))?;
        let host = seed_url
            .host_str()
            .ok_or_else(|| Error::Crawl(format!("Seed URL has no host: {}", seed)))?
            .to_string();

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        // The seed is always admitted; extra seeds go through the filters.
        queue.push_back(canonicalize_url(seed)?);
        for extra in extra_seeds {
            if let Some(url) = self.admissible(extra, &host) {
                queue.push_back(url);
            }
        }

        let mut tasks: JoinSet<(String, Result<FetchedPage>)> = JoinSet::new();
        let mut stats = CrawlStats::default();
        let mut sink_error: Option<Error> = None;

        loop {
            while sink_error.is_none()
                && tasks.len() < self.options.concurrency
                && visited.len() < self.options.max_pages
            {
                let Some(url) = queue.pop_front() else { break };
                if !visited.insert(url.clone()) {
                    continue;
                }
                let client = self.client.clone();
                tasks.spawn(async move {
                    let result = fetch_page(&client, &url).await;
                    (url, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let Ok((url, result)) = joined else { continue };

            match result {
                Ok(fetched) => {
                    for link in &fetched.links {
                        if let Some(next) = self.admissible(link, &host) {
                            if !visited.contains(&next) {
                                queue.push_back(next);
                            }
                        }
                    }
                    if sink_error.is_none() {
                        let page = CrawledPage {
                            url,
                            title: fetched.title,
                            text: fetched.text,
                        };
                        match sink.page(page).await {
                            Ok(()) => stats.pages_delivered += 1,
                            Err(e) => sink_error = Some(e),
                        }
                    }
                }
                Err(e) => {
                    stats.pages_failed += 1;
                    debug!(
                        subsystem = "crawl",
                        component = "crawler",
                        url = %url,
                        error = %e,
                        "Fetch skipped"
                    );
                }
            }
        }

        if let Some(e) = sink_error {
            return Err(e);
        }

        info!(
            subsystem = "crawl",
            component = "crawler",
            op = "crawl",
            page_count = stats.pages_delivered,
            failed = stats.pages_failed,
            visited = visited.len(),
            "Crawl finished"
        );
        Ok(stats)
    }

    /// Canonical form of a link when it passes every enqueue filter.
    fn admissible(&self, raw: &str, host: &str) -> Option<String> {
        let url = Url::parse(raw).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if url.host_str()? != host {
            return None;
        }
        if is_asset_url(&url) {
            return None;
        }

        let canonical = canonicalize_url(raw).ok()?;
        if let Some(prefix) = &self.options.path_prefix {
            let parsed = Url::parse(&canonical).ok()?;
            if !parsed.path().starts_with(prefix.as_str()) {
                return None;
            }
        }
        if !self.options.include.is_empty()
            && !self.options.include.iter().any(|re| re.is_match(&canonical))
        {
            return None;
        }
        if self.options.exclude.iter().any(|re| re.is_match(&canonical)) {
            return None;
        }
        Some(canonical)
    }
}

async fn fetch_page(client: &Client, url: &str) -> Result<FetchedPage> {
    let response = client.get(url).send().await?;

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(Error::Crawl(format!("HTTP {} for {}", status, url)));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.contains("text/html") {
        return Err(Error::Crawl(format!(
            "Non-HTML content type {:?} at {}",
            content_type, url
        )));
    }

    let body = response.text().await?;
    let page = extract_content(&body, url);
    Ok(FetchedPage {
        title: page.title,
        text: page.text,
        links: page.links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CollectingSink {
        pages: Vec<CrawledPage>,
    }

    #[async_trait]
    impl PageSink for CollectingSink {
        async fn page(&mut self, page: CrawledPage) -> Result<()> {
            self.pages.push(page);
            Ok(())
        }
    }

    fn options(max_pages: usize) -> CrawlOptions {
        CrawlOptions {
            max_pages,
            concurrency: 2,
            timeout: Duration::from_secs(5),
            ..CrawlOptions::default()
        }
    }

    fn html_mock(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/html")
    }

    #[tokio::test]
    async fn test_max_pages_bound_is_exact() {
        let server = MockServer::start().await;
        let origin = server.uri();

        let links: String = (0..10)
            .map(|i| format!("<a href=\"/page/{}\">p{}</a>", i, i))
            .collect();
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_mock(format!("<body><main>seed {}</main></body>", links)))
            .mount(&server)
            .await;
        for i in 0..10 {
            Mock::given(method("GET"))
                .and(path(format!("/page/{}", i)))
                .respond_with(html_mock(format!("<body><main>content {}</main></body>", i)))
                .mount(&server)
                .await;
        }

        let crawler = Crawler::new(options(3)).unwrap();
        let mut sink = CollectingSink { pages: Vec::new() };
        let stats = crawler
            .crawl(&format!("{}/", origin), &[], &mut sink)
            .await
            .unwrap();

        assert_eq!(stats.pages_delivered, 3);
        assert_eq!(sink.pages.len(), 3);
    }

    #[tokio::test]
    async fn test_non_html_and_errors_are_swallowed() {
        let server = MockServer::start().await;
        let origin = server.uri();

        let body = r#"<body><main>
            seed
            <a href="/data.json">json</a>
            <a href="/broken">broken</a>
            <a href="/ok">ok</a>
        </main></body>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_mock(body.to_string()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"{}".to_vec(), "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(html_mock("<body><main>fine</main></body>".to_string()))
            .mount(&server)
            .await;

        let crawler = Crawler::new(options(10)).unwrap();
        let mut sink = CollectingSink { pages: Vec::new() };
        let stats = crawler
            .crawl(&format!("{}/", origin), &[], &mut sink)
            .await
            .unwrap();

        assert_eq!(stats.pages_delivered, 2);
        assert_eq!(stats.pages_failed, 2);
        let urls: Vec<&str> = sink.pages.iter().map(|p| p.url.as_str()).collect();
        assert!(urls.contains(&format!("{}/", origin).as_str()));
        assert!(urls.contains(&format!("{}/ok", origin).as_str()));
    }

    #[tokio::test]
    async fn test_each_page_delivered_once() {
        let server = MockServer::start().await;
        let origin = server.uri();

        // a and b link to each other and back to the seed.
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_mock(
                r#"<body><main><a href="/a">a</a><a href="/b">b</a></main></body>"#.to_string(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(html_mock(
                r#"<body><main><a href="/b">b</a><a href="/">home</a></main></body>"#.to_string(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(html_mock(
                r#"<body><main><a href="/a">a</a><a href="/">home</a></main></body>"#.to_string(),
            ))
            .mount(&server)
            .await;

        let crawler = Crawler::new(options(10)).unwrap();
        let mut sink = CollectingSink { pages: Vec::new() };
        crawler
            .crawl(&format!("{}/", origin), &[], &mut sink)
            .await
            .unwrap();

        let mut urls: Vec<&str> = sink.pages.iter().map(|p| p.url.as_str()).collect();
        urls.sort_unstable();
        let mut deduped = urls.clone();
        deduped.dedup();
        assert_eq!(urls, deduped, "a page was delivered more than once");
        assert_eq!(urls.len(), 3);
    }

    #[test]
    fn test_admissible_filters() {
        let crawler = Crawler::new(CrawlOptions {
            path_prefix: Some("/docs".to_string()),
            ..options(10)
        })
        .unwrap();

        // Off-host and non-HTTP are rejected.
        assert!(crawler.admissible("https://other.test/docs/a", "x.test").is_none());
        assert!(crawler.admissible("ftp://x.test/docs/a", "x.test").is_none());
        // Assets are rejected.
        assert!(crawler.admissible("https://x.test/docs/a.png", "x.test").is_none());
        // Outside the path prefix.
        assert!(crawler.admissible("https://x.test/blog/a", "x.test").is_none());
        // Default excludes: auth and feed pages.
        assert!(crawler.admissible("https://x.test/docs/login", "x.test").is_none());
        assert!(crawler.admissible("https://x.test/docs/feed", "x.test").is_none());
        // A plain docs page passes and is canonicalized.
        assert_eq!(
            crawler
                .admissible("https://x.test/docs/guide/?utm_source=x", "x.test")
                .unwrap(),
            "https://x.test/docs/guide"
        );
    }

    #[test]
    fn test_include_patterns_restrict() {
        let crawler = Crawler::new(CrawlOptions {
            include: vec![Regex::new(r"/reference/").unwrap()],
            ..options(10)
        })
        .unwrap();

        assert!(crawler.admissible("https://x.test/guide/a", "x.test").is_none());
        assert!(crawler
            .admissible("https://x.test/reference/a", "x.test")
            .is_some());
    }

    #[test]
    fn test_default_concurrency_bounds() {
        let c = default_concurrency();
        assert!((4..=16).contains(&c));
    }
}

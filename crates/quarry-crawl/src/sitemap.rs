//! Sitemap discovery.
//!
//! Probes robots.txt and the well-known sitemap locations, expands sitemap
//! indexes recursively, and returns canonicalized same-host page URLs.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use quarry_core::{defaults, Error, Result};

use crate::canonical::canonicalize_url;

/// Well-known sitemap paths probed after robots.txt.
const SITEMAP_PATHS: &[&str] = &["/sitemap.xml", "/docs/sitemap.xml", "/sitemap_index.xml"];

/// Sitemap discoverer bound to one HTTP client.
pub struct SitemapDiscoverer {
    client: Client,
    max_files: usize,
}

impl SitemapDiscoverer {
    /// Create a discoverer with the given user agent and per-request timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| Error::Crawl(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_files: defaults::SITEMAP_MAX_FILES,
        })
    }

    /// Discover page URLs for a seed.
    ///
    /// Fetch and parse failures are logged and swallowed; discovery is
    /// best-effort and an empty result just means the crawler starts from
    /// the seed alone.
    pub async fn discover(&self, seed: &Url) -> Vec<String> {
        let origin = seed.origin().ascii_serialization();
        let Some(host) = seed.host_str().map(str::to_string) else {
            return Vec::new();
        };

        let mut sitemap_queue: Vec<String> = Vec::new();
        let mut seen_sitemaps: HashSet<String> = HashSet::new();

        // robots.txt first: every `Sitemap:` directive counts.
        if let Some(body) = self.fetch(&format!("{}/robots.txt", origin)).await {
            for sitemap in parse_robots_sitemaps(&body) {
                if seen_sitemaps.insert(sitemap.clone()) {
                    sitemap_queue.push(sitemap);
                }
            }
        }
        for path in SITEMAP_PATHS {
            let url = format!("{}{}", origin, path);
            if seen_sitemaps.insert(url.clone()) {
                sitemap_queue.push(url);
            }
        }

        let mut pages: Vec<String> = Vec::new();
        let mut page_set: HashSet<String> = HashSet::new();
        let mut processed = 0usize;

        while let Some(sitemap_url) = sitemap_queue.pop() {
            if processed >= self.max_files {
                warn!(
                    subsystem = "crawl",
                    component = "sitemap",
                    max_files = self.max_files,
                    "Reached sitemap expansion limit"
                );
                break;
            }
            processed += 1;

            let Some(body) = self.fetch(&sitemap_url).await else {
                continue;
            };

            match parse_sitemap(&body) {
                SitemapContent::Index(children) => {
                    debug!(
                        subsystem = "crawl",
                        component = "sitemap",
                        url = %sitemap_url,
                        child_count = children.len(),
                        "Expanding sitemap index"
                    );
                    for child in children {
                        if same_host(&child, &host) && seen_sitemaps.insert(child.clone()) {
                            sitemap_queue.push(child);
                        }
                    }
                }
                SitemapContent::Pages(urls) => {
                    for url in urls {
                        if !same_host(&url, &host) {
                            continue;
                        }
                        if let Ok(canonical) = canonicalize_url(&url) {
                            if page_set.insert(canonical.clone()) {
                                pages.push(canonical);
                            }
                        }
                    }
                }
            }
        }

        debug!(
            subsystem = "crawl",
            component = "sitemap",
            op = "discover",
            page_count = pages.len(),
            sitemap_count = processed,
            "Sitemap discovery finished"
        );
        pages
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                debug!(
                    subsystem = "crawl",
                    component = "sitemap",
                    url = %url,
                    status = response.status().as_u16(),
                    "Sitemap probe miss"
                );
                None
            }
            Err(e) => {
                debug!(
                    subsystem = "crawl",
                    component = "sitemap",
                    url = %url,
                    error = %e,
                    "Sitemap probe failed"
                );
                None
            }
        }
    }
}

/// Parsed shape of one sitemap document.
enum SitemapContent {
    /// A sitemap index whose entries are further sitemap files.
    Index(Vec<String>),
    /// A url set (or plain-text list) of page URLs.
    Pages(Vec<String>),
}

fn parse_sitemap(body: &str) -> SitemapContent {
    if body.contains("<sitemapindex") {
        SitemapContent::Index(extract_locs(body))
    } else if body.contains("<urlset") || body.contains("<loc") {
        SitemapContent::Pages(extract_locs(body))
    } else {
        // Plain-text sitemap: one URL per line.
        SitemapContent::Pages(
            body.lines()
                .map(str::trim)
                .filter(|line| line.starts_with("http"))
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Every `Sitemap:` directive target in a robots.txt body.
fn parse_robots_sitemaps(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            if !key.trim().eq_ignore_ascii_case("sitemap") {
                return None;
            }
            let value = value.trim();
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        })
        .collect()
}

/// All `<loc>` values in an XML body, in document order.
fn extract_locs(body: &str) -> Vec<String> {
    let mut locs = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<loc>") {
        rest = &rest[start + "<loc>".len()..];
        let Some(end) = rest.find("</loc>") else {
            break;
        };
        let value = rest[..end].trim();
        if Url::parse(value).is_ok() {
            locs.push(value.to_string());
        }
        rest = &rest[end + "</loc>".len()..];
    }
    locs
}

fn same_host(url: &str, host: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == host))
        .unwrap_or(false)
}

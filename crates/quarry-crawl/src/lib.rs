//! # quarry-crawl
//!
//! Documentation site crawling for quarry:
//!
//! - URL canonicalization and asset filtering
//! - HTML main-content extraction
//! - Sitemap discovery (robots.txt directives plus well-known paths)
//! - Bounded breadth-first crawling with a concurrency cap

pub mod canonical;
pub mod crawler;
pub mod extract;
pub mod sitemap;

pub use canonical::{canonicalize_url, is_asset_url};
pub use crawler::{
    default_concurrency, default_exclude_patterns, CrawlOptions, CrawlStats, CrawledPage, Crawler,
    PageSink,
};
pub use extract::{extract_content, ExtractedPage};
pub use sitemap::SitemapDiscoverer;

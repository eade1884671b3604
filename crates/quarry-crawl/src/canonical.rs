//! URL canonicalization for crawl deduplication.

use url::Url;

use quarry_core::{Error, Result};

/// Query parameter names stripped during canonicalization.
const TRACKING_PARAMS: &[&str] = &["icid", "gclid", "fbclid", "ref", "source"];

/// File extensions the HTML crawler never enqueues.
const ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "pdf", "zip", "tar", "gz", "tgz", "mp4", "mp3", "wav",
    "webm", "ico",
];

/// True for query parameters that only carry tracking state.
fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Canonicalize an absolute URL.
///
/// Drops the fragment, strips tracking query parameters, replaces a trailing
/// `/index.html` with `/`, and removes the trailing slash. Idempotent.
pub fn canonicalize_url(raw: &str) -> Result<String> {
    let mut url =
        Url::parse(raw).map_err(|e| Error::Crawl(format!("Invalid URL {}: {}", raw, e)))?;

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        url.set_query(Some(&query));
    }

    let mut path = url.path().to_string();
    if let Some(stripped) = path.strip_suffix("/index.html") {
        path = format!("{}/", stripped);
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    Ok(url.to_string())
}

/// True when the URL path ends in an asset extension the crawler skips.
pub fn is_asset_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) => ASSET_EXTENSIONS.contains(&ext),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tracking_and_fragment() {
        assert_eq!(
            canonicalize_url("https://x.test/a/?utm_source=b&keep=1#frag").unwrap(),
            "https://x.test/a?keep=1"
        );
    }

    #[test]
    fn test_index_html_collapsed() {
        assert_eq!(
            canonicalize_url("https://x.test/a/index.html").unwrap(),
            "https://x.test/a"
        );
    }

    #[test]
    fn test_trailing_slash_removed() {
        assert_eq!(
            canonicalize_url("https://x.test/docs/").unwrap(),
            "https://x.test/docs"
        );
    }

    #[test]
    fn test_root_path_kept() {
        assert_eq!(
            canonicalize_url("https://x.test/").unwrap(),
            "https://x.test/"
        );
    }

    #[test]
    fn test_named_tracking_params() {
        assert_eq!(
            canonicalize_url("https://x.test/p?gclid=1&fbclid=2&icid=3&ref=4&source=5&q=ok")
                .unwrap(),
            "https://x.test/p?q=ok"
        );
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://x.test/a/?utm_source=b&keep=1#frag",
            "https://x.test/a/index.html",
            "https://x.test/",
            "https://x.test/docs/guide?page=2",
        ];
        for input in inputs {
            let once = canonicalize_url(input).unwrap();
            let twice = canonicalize_url(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(canonicalize_url("not a url").is_err());
    }

    #[test]
    fn test_asset_urls_detected() {
        for asset in [
            "https://x.test/logo.png",
            "https://x.test/v.MP4",
            "https://x.test/archive.tar.gz",
            "https://x.test/manual.pdf",
        ] {
            assert!(is_asset_url(&Url::parse(asset).unwrap()), "{}", asset);
        }
        for page in ["https://x.test/docs", "https://x.test/v2.0/guide"] {
            assert!(!is_asset_url(&Url::parse(page).unwrap()), "{}", page);
        }
    }
}

//! Deterministic index-name derivation from a source URL.
//!
//! The derived name is safe to embed in a table identifier: lowercase
//! alphanumerics and single dashes only.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Error, Result};

/// Derive the index name for a source URL.
///
/// The name is the lowercase host with a leading `www.` removed and all
/// non-alphanumeric runs collapsed to a single `-`. When the path ends in a
/// filename with an extension (a PDF, typically), the sanitized filename
/// stem is appended after another `-`.
pub fn derive_index_name(source_url: &str) -> Result<String> {
    let url = Url::parse(source_url)
        .map_err(|e| Error::InvalidInput(format!("Invalid source URL {}: {}", source_url, e)))?;

    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidInput(format!("URL has no host: {}", source_url)))?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    let mut name = sanitize(host);
    if name.is_empty() {
        return Err(Error::InvalidInput(format!(
            "URL host yields an empty index name: {}",
            source_url
        )));
    }

    if let Some(stem) = filename_stem(&url) {
        let stem = sanitize(&stem);
        if !stem.is_empty() {
            name.push('-');
            name.push_str(&stem);
        }
    }

    Ok(name)
}

/// Collapse a string to lowercase alphanumerics with single dashes.
fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            out.push(ch);
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    out
}

/// The decoded filename stem of the URL path, when the last segment looks
/// like a file (non-empty stem plus a short alphanumeric extension).
fn filename_stem(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    let (stem, ext) = decoded.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(stem.to_string())
}

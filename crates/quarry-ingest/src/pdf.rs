//! PDF fetching and text extraction using `pdftotext`/`pdfinfo`
//! (poppler-utils).

use std::io::Write;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use reqwest::{header, redirect, Client};
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use quarry_core::{defaults, Error, Result};

/// Per-command timeout for the poppler tools.
const EXTRACTION_CMD_TIMEOUT_SECS: u64 = 120;

/// A PDF reduced to its indexable parts.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub text: String,
    pub title: String,
    pub page_count: u64,
}

/// Fetch the raw bytes of a PDF.
pub async fn fetch_pdf_bytes(url: &str, user_agent: &str, timeout: Duration) -> Result<Vec<u8>> {
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(redirect::Policy::limited(defaults::MAX_REDIRECTS))
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .header(header::ACCEPT, "application/pdf, application/octet-stream")
        .send()
        .await?;

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(Error::Request(format!("HTTP {} for {}", status, url)));
    }

    let bytes = response.bytes().await?;
    debug!(
        subsystem = "ingest",
        component = "pdf",
        op = "fetch",
        url = %url,
        byte_count = bytes.len(),
        "PDF downloaded"
    );
    Ok(bytes.to_vec())
}

/// Extract text and metadata from PDF bytes.
///
/// The title falls back from PDF metadata to the URL's filename stem to the
/// URL itself.
pub async fn extract_pdf(data: &[u8], source_url: &str) -> Result<PdfDocument> {
    let mut file = NamedTempFile::new()?;
    file.write_all(data)?;
    let path = file
        .path()
        .to_str()
        .ok_or_else(|| Error::Internal("Temp file path is not valid UTF-8".to_string()))?
        .to_string();

    let metadata = match run_cmd_with_timeout(
        Command::new("pdfinfo").arg(&path),
        EXTRACTION_CMD_TIMEOUT_SECS,
    )
    .await
    {
        Ok(output) => parse_pdfinfo(&output),
        Err(e) => {
            warn!(
                subsystem = "ingest",
                component = "pdf",
                error = %e,
                "pdfinfo failed, continuing without metadata"
            );
            JsonValue::Object(serde_json::Map::new())
        }
    };

    let text = run_cmd_with_timeout(
        Command::new("pdftotext").args(["-enc", "UTF-8", &path, "-"]),
        EXTRACTION_CMD_TIMEOUT_SECS,
    )
    .await
    .map_err(|e| Error::Extract(format!("pdftotext failed: {}", e)))?;

    let title = metadata
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| title_from_url(source_url));

    Ok(PdfDocument {
        text,
        title,
        page_count: page_count(&metadata) as u64,
    })
}

/// Parse `pdfinfo` output into a JSON metadata object.
fn parse_pdfinfo(output: &str) -> JsonValue {
    let mut metadata = serde_json::Map::new();

    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase().replace(' ', "_");
            let value = value.trim();
            if !value.is_empty() {
                if key == "pages" {
                    if let Ok(pages) = value.parse::<u64>() {
                        metadata.insert(key, JsonValue::Number(pages.into()));
                        continue;
                    }
                }
                metadata.insert(key, JsonValue::String(value.to_string()));
            }
        }
    }

    JsonValue::Object(metadata)
}

/// Get page count from pdfinfo metadata, defaulting to 0.
fn page_count(metadata: &JsonValue) -> usize {
    metadata.get("pages").and_then(|v| v.as_u64()).unwrap_or(0) as usize
}

/// The URL's decoded filename stem, or the URL itself.
fn title_from_url(source_url: &str) -> String {
    Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.path_segments()?
                .next_back()
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    let decoded = percent_decode_str(segment).decode_utf8_lossy();
                    decoded
                        .rsplit_once('.')
                        .map(|(stem, _)| stem.to_string())
                        .unwrap_or_else(|| decoded.into_owned())
                })
        })
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| source_url.to_string())
}

/// Run a command with a timeout, returning stdout as a string.
async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::Extract(format!(
                "External command timed out after {}s",
                timeout_secs
            ))
        })?
        .map_err(|e| Error::Extract(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Extract(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

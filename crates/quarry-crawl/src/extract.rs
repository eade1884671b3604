//! HTML main-content extraction.
//!
//! Strips page chrome and picks the best content container, yielding a title
//! and whitespace-collapsed prose suitable for chunking.

use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

/// Content container selectors, in priority order.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "#content",
    ".content",
    ".docs-content",
    ".site-content",
    ".slds-container",
];

/// Tags whose subtrees never contribute text.
const EXCLUDED_TAGS: &[&str] = &["script", "style", "noscript"];

/// Class names marking sidebars and screen-reader-only nodes.
const EXCLUDED_CLASSES: &[&str] = &[
    "sidebar",
    "sr-only",
    "screen-reader-text",
    "visually-hidden",
];

/// Tags that imply a word break between their text and what follows.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "li", "ul", "ol", "br", "h1", "h2", "h3", "h4", "h5", "h6",
    "table", "tr", "td", "th", "blockquote", "pre", "header", "footer", "nav", "aside",
];

/// A page reduced to its indexable parts.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: String,
    pub text: String,
    /// Absolute outbound link targets, resolved against the page URL.
    pub links: Vec<String>,
}

/// Extract title, main text, and outbound links from an HTML document.
pub fn extract_content(html: &str, page_url: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let text = select_container_text(&document);
    let title = extract_title(&document, page_url);
    let links = extract_links(&document, page_url);

    ExtractedPage { title, text, links }
}

/// Text of the first non-empty priority container, falling back to `body`.
fn select_container_text(document: &Html) -> String {
    for selector in CONTENT_SELECTORS {
        if let Ok(sel) = Selector::parse(selector) {
            for element in document.select(&sel) {
                let text = collapse_whitespace(&collect_text(element));
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }

    if let Ok(sel) = Selector::parse("body") {
        if let Some(body) = document.select(&sel).next() {
            return collapse_whitespace(&collect_text(body));
        }
    }
    String::new()
}

/// First non-empty of `<title>`, `<h1>`, then the page URL.
fn extract_title(document: &Html, page_url: &str) -> String {
    for selector in ["title", "h1"] {
        if let Ok(sel) = Selector::parse(selector) {
            for element in document.select(&sel) {
                let text = collapse_whitespace(&element.text().collect::<String>());
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }
    page_url.to_string()
}

fn extract_links(document: &Html, page_url: &str) -> Vec<String> {
    let base = Url::parse(page_url).ok();
    let mut links = Vec::new();
    if let Ok(sel) = Selector::parse("a[href]") {
        for element in document.select(&sel) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let resolved = match &base {
                Some(base) => base.join(href).map(|u| u.to_string()),
                None => Url::parse(href).map(|u| u.to_string()),
            };
            if let Ok(url) = resolved {
                if url.starts_with("http://") || url.starts_with("https://") {
                    links.push(url);
                }
            }
        }
    }
    links
}

/// Depth-first text collection, skipping excluded subtrees.
fn collect_text(element: ElementRef) -> String {
    let mut out = String::new();
    push_text(element, &mut out);
    out
}

fn push_text(element: ElementRef, out: &mut String) {
    for node in element.children() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(node) {
                    if !is_excluded(&child) {
                        push_text(child, out);
                        if BLOCK_TAGS.contains(&child.value().name()) {
                            out.push(' ');
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn is_excluded(element: &ElementRef) -> bool {
    let value = element.value();
    if EXCLUDED_TAGS.contains(&value.name()) {
        return true;
    }
    if value
        .classes()
        .any(|class| EXCLUDED_CLASSES.contains(&class))
    {
        return true;
    }
    matches!(value.id(), Some("sidebar"))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

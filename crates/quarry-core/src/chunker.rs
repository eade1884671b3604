//! Paragraph-aware text chunking for embedding.
//!
//! Text is split into paragraphs at blank lines or at a sentence end
//! followed by two or more spaces, then paragraphs are greedily packed into
//! chunks of at most `chunk_size` characters. A paragraph that alone exceeds
//! `chunk_size` is sliced into fixed windows that share `overlap` characters
//! with their predecessor.

use regex::Regex;
use std::sync::OnceLock;

use crate::defaults;

/// Configuration for the paragraph chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum size of a chunk in characters.
    pub chunk_size: usize,
    /// Characters shared between adjacent windows of an oversized paragraph.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            overlap: defaults::CHUNK_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    /// Create a config, clamping `overlap` below `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }
}

fn boundary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Blank-line boundary, or a sentence end followed by two or more spaces.
    RE.get_or_init(|| Regex::new(r"\n\s*\n|[.!?] {2,}").unwrap())
}

/// Split text into non-empty trimmed paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for m in boundary_regex().find_iter(text) {
        // A sentence-end boundary keeps its punctuation in the left part.
        let cut = if text[m.start()..].starts_with(['.', '!', '?']) {
            m.start() + 1
        } else {
            m.start()
        };
        let part = text[last..cut].trim();
        if !part.is_empty() {
            parts.push(part);
        }
        last = m.end();
    }
    let tail = text[last..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Chunk text into pieces of at most `chunk_size` characters, preserving
/// source order. Every returned chunk is non-empty.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0usize;

    for para in split_paragraphs(text) {
        let para_chars = para.chars().count();

        if para_chars > config.chunk_size {
            if !buffer.is_empty() {
                chunks.push(std::mem::take(&mut buffer));
                buffer_chars = 0;
            }
            chunks.extend(slice_windows(para, config.chunk_size, config.overlap));
            continue;
        }

        // +2 accounts for the paragraph separator.
        if !buffer.is_empty() && buffer_chars + 2 + para_chars > config.chunk_size {
            chunks.push(std::mem::take(&mut buffer));
            buffer_chars = 0;
        }

        if buffer.is_empty() {
            buffer.push_str(para);
            buffer_chars = para_chars;
        } else {
            buffer.push_str("\n\n");
            buffer.push_str(para);
            buffer_chars += 2 + para_chars;
        }
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }
    chunks
}

/// Slice an oversized paragraph into fixed windows. Each window after the
/// first starts `overlap` characters before a `chunk_size` stride.
fn slice_windows(para: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = para.chars().collect();
    let len = chars.len();
    let mut windows = Vec::new();
    let mut i = 0usize;
    while i * chunk_size < len {
        let start = if i == 0 { 0 } else { i * chunk_size - overlap };
        let end = (start + chunk_size).min(len);
        windows.push(chars[start..end].iter().collect());
        i += 1;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig::new(chunk_size, overlap)
    }

    #[test]
    fn test_three_paragraphs_pack_into_two_chunks() {
        let p1 = "a".repeat(600);
        let p2 = "b".repeat(600);
        let p3 = "c".repeat(600);
        let text = format!("{}\n\n{}\n\n{}", p1, p2, p3);

        let chunks = chunk_text(&text, &config(1500, 150));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains(&p1));
        assert!(chunks[0].contains(&p2));
        assert!(!chunks[0].contains(&p3));
        assert_eq!(chunks[1], p3);
    }

    #[test]
    fn test_oversized_paragraph_sliced_with_overlap() {
        let text: String = (0..3200).map(|i| char::from(b'a' + (i % 26) as u8)).collect();

        let chunks = chunk_text(&text, &config(1500, 150));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 1500);
        assert_eq!(chunks[1].chars().count(), 1500);
        assert_eq!(chunks[2].chars().count(), 350);

        // Last window starts at offset 2850.
        let expected_tail: String = text.chars().skip(2850).collect();
        assert_eq!(chunks[2], expected_tail);

        // Window 2 starts 150 characters before the 1500 stride.
        let expected_mid: String = text.chars().skip(1350).take(1500).collect();
        assert_eq!(chunks[1], expected_mid);
    }

    #[test]
    fn test_sentence_end_with_double_space_splits() {
        let text = "First sentence.  Second paragraph starts here";
        let paras = split_paragraphs(text);
        assert_eq!(paras, vec!["First sentence.", "Second paragraph starts here"]);
    }

    #[test]
    fn test_single_space_does_not_split() {
        let text = "First sentence. Still the same paragraph";
        let paras = split_paragraphs(text);
        assert_eq!(paras, vec![text]);
    }

    #[test]
    fn test_blank_lines_split() {
        let text = "one\n\ntwo\n\n\n\nthree";
        assert_eq!(split_paragraphs(text), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_text("", &config(1500, 150)).is_empty());
        assert!(chunk_text("   \n\n  \n ", &config(1500, 150)).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("hello world", &config(1500, 150));
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_chunks_never_exceed_max_size() {
        let text = format!(
            "{}\n\n{}.  {}\n\n{}",
            "x".repeat(4000),
            "y".repeat(900),
            "z".repeat(800),
            "w".repeat(100)
        );
        let cfg = config(1500, 150);
        for chunk in chunk_text(&text, &cfg) {
            assert!(!chunk.is_empty());
            assert!(chunk.chars().count() <= cfg.chunk_size + cfg.overlap);
        }
    }

    #[test]
    fn test_non_whitespace_coverage_preserved() {
        let text = "Alpha beta.  Gamma delta\n\nepsilon zeta\n\nEta theta.";
        let chunks = chunk_text(&text, &config(20, 5));

        let mut original: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        let mut emitted: Vec<char> = chunks
            .join("")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        original.sort_unstable();
        emitted.sort_unstable();
        // Overlap may duplicate characters but must never lose any.
        for ch in original {
            let pos = emitted.iter().position(|&c| c == ch);
            assert!(pos.is_some(), "lost character {:?}", ch);
            emitted.remove(pos.unwrap());
        }
    }

    #[test]
    fn test_order_preserved() {
        let text = "first block\n\nsecond block\n\nthird block";
        let chunks = chunk_text(&text, &config(15, 3));
        let joined = chunks.join("|");
        let first = joined.find("first").unwrap();
        let second = joined.find("second").unwrap();
        let third = joined.find("third").unwrap();
        assert!(first < second && second < third);
    }
}

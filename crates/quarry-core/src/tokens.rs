//! Token cost estimation for embedding rate limiting.

/// Estimated token cost of one text: `⌈len/4⌉`, floor 1.
pub fn estimate_tokens(text: &str) -> u64 {
    let len = text.chars().count() as u64;
    len.div_ceil(4).max(1)
}

/// Summed token cost of a batch.
pub fn estimate_batch_tokens<S: AsRef<str>>(texts: &[S]) -> u64 {
    texts.iter().map(|t| estimate_tokens(t.as_ref())).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(100)), 25);
    }

    #[test]
    fn test_estimate_floor_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("a"), 1);
    }

    #[test]
    fn test_batch_sum() {
        let texts = ["abcd", "abcde", ""];
        assert_eq!(estimate_batch_tokens(&texts), 1 + 2 + 1);
        let empty: [&str; 0] = [];
        assert_eq!(estimate_batch_tokens(&empty), 0);
    }
}

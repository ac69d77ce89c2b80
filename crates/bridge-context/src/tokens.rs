// SPDX-License-Identifier: Apache-2.0
//! Token estimate and budget truncation. A "word" is any
//! maximal run of non-whitespace bytes — `split_whitespace` gives exactly
//! that split.

/// `ceil(wordCount(text) * 1.3)`.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64) * 1.3).ceil() as usize
}

/// Drops whole words from the tail of `text` until it fits `budget`
/// estimated tokens.
pub fn truncate_to_budget(text: &str, budget: usize) -> String {
    if estimate_tokens(text) <= budget {
        return text.to_string();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let max_words = ((budget as f64) / 1.3).floor() as usize;
    words[..max_words.min(words.len())].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("one two three"), 4); // ceil(3 * 1.3) = 4
    }

    #[test]
    fn truncate_drops_whole_words_only() {
        let text = "alpha beta gamma delta epsilon";
        let truncated = truncate_to_budget(text, 3);
        assert!(text.starts_with(&truncated));
        assert!(estimate_tokens(&truncated) <= 3);
    }

    #[test]
    fn truncate_is_a_no_op_when_already_within_budget() {
        let text = "short text";
        assert_eq!(truncate_to_budget(text, 100), text);
    }
}

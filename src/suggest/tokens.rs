//! A dependency-free token estimate for pre-flight prompt budgeting.
//!
//! No tokenizer crate appears anywhere in the retrieved corpus, and the
//! teacher only ever learns token counts after the fact, from a provider's
//! `usage` field (see `crate::llm::TokenUsage`). Budgeting has to happen
//! before the call, so this is a deliberately conservative estimate, not a
//! provider-exact count: a blend of whitespace-word count and a
//! chars-per-token ratio, consistent with the common rule of thumb that one
//! token is roughly four characters of English text.

/// Estimate the number of tokens `text` will consume.
pub fn estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let word_count = text.split_whitespace().count();
    let char_estimate = text.chars().count().div_ceil(4);
    // Whichever signal is larger tends to win for the input it's suited to:
    // word count underestimates dense non-whitespace text (URLs, IDs), and
    // the char ratio underestimates long-word-heavy prose.
    word_count.max(char_estimate)
}

/// Keep only as much of `text` as fits in `budget` estimated tokens, cutting
/// at the nearest preceding `char` boundary (head-truncation per §4.2).
pub fn head_truncate(text: &str, budget: usize) -> &str {
    if estimate(text) <= budget {
        return text;
    }
    // Roughly 4 chars/token, then walk back to a char boundary.
    let approx_chars = budget.saturating_mul(4);
    let mut end = approx_chars.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = &text[..end];
    while estimate(truncated) > budget && !truncated.is_empty() {
        let mut new_end = truncated.len().saturating_sub(1);
        while new_end > 0 && !truncated.is_char_boundary(new_end) {
            new_end -= 1;
        }
        truncated = &truncated[..new_end];
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_nonzero_for_text() {
        assert_eq!(estimate(""), 0);
        assert!(estimate("hello world") >= 2);
    }

    #[test]
    fn head_truncate_is_noop_under_budget() {
        assert_eq!(head_truncate("short text", 100), "short text");
    }

    #[test]
    fn head_truncate_shrinks_to_fit_budget() {
        let long = "word ".repeat(1000);
        let truncated = head_truncate(&long, 10);
        assert!(estimate(truncated) <= 10);
        assert!(truncated.len() < long.len());
    }

    #[test]
    fn head_truncate_respects_utf8_boundaries() {
        let text = "日本語のテキストをたくさん書きます ".repeat(50);
        let truncated = head_truncate(&text, 5);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}

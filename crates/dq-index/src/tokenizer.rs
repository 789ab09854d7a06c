//! Default tokenizer for the sparse index.

use dq_core::Tokenizer;

/// Lowercases, strips punctuation and splits on whitespace.
///
/// Punctuation is removed rather than treated as a separator, so
/// `"don't"` becomes `"dont"` and `"e-mail"` becomes `"email"`.
/// No stemming or stop word removal is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let cleaned: String = text
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();

        cleaned.split_whitespace().map(str::to_string).collect()
    }
}

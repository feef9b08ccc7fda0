//! Token-class tokenizer for mixed Korean / Latin / numeric text, used by the
//! local reranker's transient BM25 model.

use std::sync::LazyLock;

use bm25::Tokenizer;
use regex::Regex;

/// Hangul runs of at least 2 syllables, Latin runs of at least 3 letters,
/// digit runs. Applied to lower-cased text.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[가-힣]{2,}|[a-z]{3,}|[0-9]+").expect("token pattern is valid"));

#[derive(Debug, Default, Clone, Copy)]
pub struct TokenClassTokenizer;

impl Tokenizer for TokenClassTokenizer {
    fn tokenize(&self, input_text: &str) -> Vec<String> {
        tokenize(input_text)
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE.find_iter(&lowered).map(|m| m.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_classes() {
        // "mm" is a two-letter Latin run and falls below the minimum.
        assert_eq!(
            tokenize("10mm 이상 뇌동맥류, LAD 협착 a 가 12"),
            vec!["10", "이상", "뇌동맥류", "lad", "협착", "12"]
        );
        assert_eq!(TokenClassTokenizer.tokenize("Flow-diverter"), vec!["flow", "diverter"]);
        assert!(tokenize("a b 가 .").is_empty());
    }
}

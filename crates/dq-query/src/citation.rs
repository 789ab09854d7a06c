//! Citation records for the final candidates.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dq_core::{ScoreScale, ScoredCandidate, Source, Tokenizer};
use dq_index::SimpleTokenizer;

/// Maximum snippet length in characters.
pub const SNIPPET_MAX_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

/// Builds [`Source`] records from ranked candidates.
pub struct CitationExtractor {
    tokenizer: Arc<dyn Tokenizer>,
}

impl CitationExtractor {
    pub fn new() -> Self {
        Self::with_tokenizer(Arc::new(SimpleTokenizer))
    }

    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// One source per candidate, ranked from 1 in input order.
    ///
    /// `names` maps document ids to display names; unknown ids fall back to
    /// the id itself. `scale` is the reranking service's declared scale and
    /// is only consulted for candidates carrying a rerank score.
    pub fn extract(
        &self,
        query: &str,
        candidates: &[ScoredCandidate],
        scale: Option<ScoreScale>,
        names: &HashMap<String, String>,
    ) -> Vec<Source> {
        let terms: HashSet<String> = self.tokenizer.tokenize(query).into_iter().collect();
        let relevance = relevance_scores(candidates, scale);

        candidates
            .iter()
            .zip(relevance)
            .enumerate()
            .map(|(i, (candidate, relevance_score))| {
                let chunk = &candidate.chunk;
                let document_id = chunk.document_id().to_string();
                let document_name = names
                    .get(&document_id)
                    .cloned()
                    .unwrap_or_else(|| document_id.clone());

                Source {
                    rank: i as u32 + 1,
                    chunk: chunk.clone(),
                    final_score: candidate.final_score(),
                    relevance_score,
                    document_id,
                    document_name,
                    page_number: chunk.page_number,
                    span: chunk.span(),
                    snippet: self.snippet(&chunk.text, &terms, SNIPPET_MAX_CHARS),
                    sparse_score: candidate.sparse_score,
                    dense_score: candidate.dense_score,
                    rerank_score: candidate.rerank_score,
                }
            })
            .collect()
    }

    /// Short excerpt of at most `max_chars` characters.
    ///
    /// Short texts are returned whole. Longer ones are rebuilt from whole
    /// sentences, those containing more query terms first, and end with an
    /// ellipsis.
    pub fn snippet(&self, text: &str, terms: &HashSet<String>, max_chars: usize) -> String {
        let text = text.trim();
        if text.chars().count() <= max_chars {
            return text.to_string();
        }

        let budget = max_chars.saturating_sub(ELLIPSIS.len());
        let mut sentences: Vec<(usize, &str)> = split_sentences(text)
            .into_iter()
            .map(|s| {
                let hits = self
                    .tokenizer
                    .tokenize(s)
                    .into_iter()
                    .filter(|t| terms.contains(t))
                    .collect::<HashSet<_>>()
                    .len();
                (hits, s)
            })
            .collect();
        sentences.sort_by_key(|(hits, _)| Reverse(*hits));

        let mut summary = String::new();
        let mut used = 0;
        for (_, sentence) in sentences {
            let len = sentence.chars().count();
            let extra = if summary.is_empty() { len } else { len + 1 };
            if used + extra > budget {
                break;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(sentence);
            used += extra;
        }

        if summary.is_empty() {
            summary = text.chars().take(budget).collect();
        }
        summary.push_str(ELLIPSIS);
        summary
    }
}

impl Default for CitationExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Split on `.`, `!` or `?` runs followed by whitespace. Terminators stay
/// with their sentence; blank pieces are dropped.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let next_is_terminator = chars
            .peek()
            .is_some_and(|(_, n)| matches!(n, '.' | '!' | '?'));
        if next_is_terminator {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |(_, n)| n.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            sentences.push(text[start..end].trim());
            start = end;
        }
    }
    sentences.push(text[start..].trim());

    sentences.retain(|s| !s.is_empty());
    sentences
}

/// User-facing relevance in [0, 1], rounded to 4 decimals.
///
/// Rerank scores are mapped by `scale`: unit interval is clamped, logits go
/// through a sigmoid, unbounded scores are min-max normalized over the
/// reranked members of the set (a zero range maps to 1.0). Candidates
/// without a rerank score use their fused score, clamped.
pub fn relevance_scores(candidates: &[ScoredCandidate], scale: Option<ScoreScale>) -> Vec<f32> {
    let reranked = candidates.iter().filter_map(|c| c.rerank_score);
    let (min, max) = reranked.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s), hi.max(s))
    });

    candidates
        .iter()
        .map(|candidate| {
            let score = match (candidate.rerank_score, scale) {
                (Some(s), Some(ScoreScale::Logit)) => sigmoid(s),
                (Some(s), Some(ScoreScale::Unbounded)) => {
                    let range = max - min;
                    if range > 0.0 {
                        (s - min) / range
                    } else {
                        1.0
                    }
                }
                (Some(s), _) => s,
                (None, _) => candidate.fused_score,
            };
            round4(score.clamp(0.0, 1.0))
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn round4(x: f32) -> f32 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use dq_core::{Chunk, ChunkId};

    fn candidate(seq: u32, page: Option<u32>, fused: f32, rerank: Option<f32>) -> ScoredCandidate {
        ScoredCandidate {
            chunk: Arc::new(Chunk::new(
                ChunkId::new("handbook", seq),
                "Refunds are issued within 30 days.",
                seq as usize * 10,
                seq as usize * 10 + 34,
                page,
                6,
            )),
            sparse_score: Some(1.2),
            dense_score: None,
            fused_score: fused,
            rerank_score: rerank,
        }
    }

    fn terms(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_extract_fields() {
        let extractor = CitationExtractor::new();
        let names = HashMap::from([("handbook".to_string(), "Employee Handbook.pdf".to_string())]);
        let sources = extractor.extract(
            "refunds",
            &[candidate(2, Some(1), 0.8, None), candidate(0, None, 0.4, None)],
            None,
            &names,
        );

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].rank, 1);
        assert_eq!(sources[0].document_name, "Employee Handbook.pdf");
        assert_eq!(sources[0].document_id, "handbook");
        assert_eq!(sources[0].page_number, Some(1));
        assert_eq!(sources[0].span.start, 20);
        assert_eq!(sources[0].relevance_score, 0.8);
        assert_eq!(sources[0].text(), "Refunds are issued within 30 days.");
        assert_eq!(sources[0].snippet, sources[0].text());
        assert_eq!(sources[1].rank, 2);
        assert_eq!(sources[1].page_number, None);
    }

    #[test]
    fn test_unknown_document_name_falls_back_to_id() {
        let sources = CitationExtractor::new().extract(
            "q",
            &[candidate(0, None, 0.5, None)],
            None,
            &HashMap::new(),
        );
        assert_eq!(sources[0].document_name, "handbook");
    }

    #[test]
    fn test_relevance_by_scale() {
        let set = [candidate(0, None, 0.2, Some(1.7)), candidate(1, None, 0.1, Some(-0.4))];

        let unit = relevance_scores(&set, Some(ScoreScale::UnitInterval));
        assert_eq!(unit, vec![1.0, 0.0]);

        let logit = relevance_scores(&set, Some(ScoreScale::Logit));
        assert!((logit[0] - 0.8455).abs() < 1e-4);
        assert!((logit[1] - 0.4013).abs() < 1e-4);

        let unbounded = relevance_scores(&set, Some(ScoreScale::Unbounded));
        assert_eq!(unbounded, vec![1.0, 0.0]);
    }

    #[test]
    fn test_relevance_unbounded_zero_range() {
        let set = [candidate(0, None, 0.2, Some(4.0)), candidate(1, None, 0.1, Some(4.0))];
        assert_eq!(relevance_scores(&set, Some(ScoreScale::Unbounded)), vec![1.0, 1.0]);
    }

    #[test]
    fn test_relevance_rounded() {
        let set = [candidate(0, None, 0.123456, None)];
        assert_eq!(relevance_scores(&set, None), vec![0.1235]);
    }

    #[test]
    fn test_split_sentences() {
        let text = "First one. Second?! Third v2.0 release\nstill third... End";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec!["First one.", "Second?!", "Third v2.0 release\nstill third...", "End"]
        );
    }

    #[test]
    fn test_snippet_prefers_query_sentences() {
        let extractor = CitationExtractor::new();
        let filler = "This sentence talks about office hours and parking rules in detail. ";
        let key = "Refund requests must be filed within thirty days. ";
        let text = format!("{}{}{}{}", filler, filler, key, filler);

        let snippet = extractor.snippet(&text, &terms(&["refund", "requests"]), 200);
        assert!(snippet.starts_with("Refund requests must be filed within thirty days."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.chars().count() <= 200);
    }

    #[test]
    fn test_snippet_long_single_sentence_truncated() {
        let extractor = CitationExtractor::new();
        let text = "word ".repeat(100);
        let snippet = extractor.snippet(&text, &terms(&["word"]), 200);

        assert_eq!(snippet.chars().count(), 200);
        assert!(snippet.ends_with("..."));
    }
}

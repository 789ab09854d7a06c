//! Overlapping window chunker.
//!
//! Walks the text in windows of at most `max_chars` characters. Each window
//! ends at the best boundary found inside the tolerance window before the
//! hard budget, trying in order:
//! 1. Paragraph breaks (blank line)
//! 2. Line breaks
//! 3. Sentence ends (`.`, `!`, `?` followed by whitespace)
//!
//! and falls back to the hard budget. The next window starts exactly
//! `overlap_chars` before the previous end, so windows cover the text with
//! no gaps.

use dq_core::{ChunkConfig, ChunkData, Chunker, CharSpan, RagError, Result};

/// Chunker producing overlapping, boundary-aligned windows.
pub struct WindowChunker {
    /// Function to count tokens in text.
    /// Uses whitespace word count if None.
    token_counter: Option<Box<dyn Fn(&str) -> usize + Send + Sync>>,
}

impl WindowChunker {
    /// Create a new window chunker with whitespace token counting.
    pub fn new() -> Self {
        Self {
            token_counter: None,
        }
    }

    /// Create a chunker with a custom token counter.
    pub fn with_token_counter<F>(counter: F) -> Self
    where
        F: Fn(&str) -> usize + Send + Sync + 'static,
    {
        Self {
            token_counter: Some(Box::new(counter)),
        }
    }

    fn count_tokens(&self, text: &str) -> usize {
        match &self.token_counter {
            Some(counter) => counter(text),
            None => text.split_whitespace().count(),
        }
    }
}

impl Default for WindowChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>> {
        validate(config)?;

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chars: Vec<char> = content.chars().collect();
        let chunks = Windows::new(&chars, config)
            .map(|span| {
                let text: String = chars[span.start..span.end].iter().collect();
                ChunkData {
                    token_count: self.count_tokens(&text),
                    content: text,
                    start_offset: span.start,
                    end_offset: span.end,
                }
            })
            .collect();

        Ok(chunks)
    }
}

/// Reject configurations the window walk cannot honour.
pub fn validate(config: &ChunkConfig) -> Result<()> {
    if config.max_chars == 0 {
        return Err(RagError::config("chunk size must be greater than 0"));
    }
    if config.overlap_chars >= config.max_chars {
        return Err(RagError::config(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            config.overlap_chars, config.max_chars
        )));
    }
    Ok(())
}

/// Iterator over window spans of a character buffer.
///
/// The walk is deterministic, so a fresh [`Windows::new`] over the same
/// text restarts the sequence and yields identical spans.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    chars: &'a [char],
    max_chars: usize,
    overlap_chars: usize,
    boundary_tolerance: usize,
    next_start: Option<usize>,
}

impl<'a> Windows<'a> {
    /// Walk `chars` with the given configuration. The configuration must have
    /// passed [`validate`].
    pub fn new(chars: &'a [char], config: &ChunkConfig) -> Self {
        Self {
            chars,
            max_chars: config.max_chars,
            overlap_chars: config.overlap_chars,
            boundary_tolerance: config.boundary_tolerance,
            next_start: if chars.is_empty() { None } else { Some(0) },
        }
    }

    /// Pick a split point in `(start + overlap, hard_end]`.
    fn split_point(&self, start: usize, hard_end: usize) -> usize {
        // Splitting at or before start + overlap would stall the walk.
        let lower = hard_end
            .saturating_sub(self.boundary_tolerance)
            .max(start + self.overlap_chars + 1);
        if lower > hard_end {
            return hard_end;
        }

        let candidates = (lower..=hard_end).rev();
        for kind in [Boundary::Paragraph, Boundary::Line, Boundary::Sentence] {
            if let Some(pos) = candidates.clone().find(|&p| kind.ends_at(self.chars, start, p)) {
                return pos;
            }
        }

        hard_end
    }
}

impl Iterator for Windows<'_> {
    type Item = CharSpan;

    fn next(&mut self) -> Option<CharSpan> {
        let start = self.next_start?;
        let len = self.chars.len();
        let hard_end = (start + self.max_chars).min(len);

        if hard_end == len {
            self.next_start = None;
            return Some(CharSpan { start, end: len });
        }

        let end = self.split_point(start, hard_end);
        self.next_start = Some(end - self.overlap_chars);
        Some(CharSpan { start, end })
    }
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
}

impl Boundary {
    /// Whether a chunk spanning `[start, pos)` ends right after this boundary.
    fn ends_at(self, chars: &[char], start: usize, pos: usize) -> bool {
        if pos < start + 2 {
            return false;
        }
        let last = chars[pos - 1];
        let before = chars[pos - 2];
        match self {
            Self::Paragraph => last == '\n' && before == '\n',
            Self::Line => last == '\n',
            Self::Sentence => last.is_whitespace() && matches!(before, '.' | '!' | '?'),
        }
    }
}

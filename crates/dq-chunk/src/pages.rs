//! Page attribution and document-to-chunk assembly.

use tracing::debug;

use dq_core::{Chunk, ChunkConfig, ChunkId, Chunker, DocumentInput, RagError, Result};

/// Check that page start offsets are usable for a text of `len` characters.
///
/// The first page must start at offset 0, offsets must be non-decreasing
/// (empty pages are allowed) and none may exceed the text length.
pub fn validate_page_breaks(page_breaks: &[usize], len: usize) -> Result<()> {
    match page_breaks.first() {
        None => return Err(RagError::invalid_argument("page_breaks must not be empty")),
        Some(&first) if first != 0 => {
            return Err(RagError::invalid_argument(format!(
                "first page must start at offset 0, got {}",
                first
            )))
        }
        _ => {}
    }

    if page_breaks.windows(2).any(|w| w[1] < w[0]) {
        return Err(RagError::invalid_argument(
            "page_breaks must be in ascending order",
        ));
    }

    if let Some(&last) = page_breaks.last() {
        if last > len {
            return Err(RagError::invalid_argument(format!(
                "page break {} is past the end of the text ({} chars)",
                last, len
            )));
        }
    }

    Ok(())
}

/// Attribute the span `[start, end)` to the page holding most of its
/// characters. Ties go to the page containing the chunk's middle character.
///
/// Returns a 1-based page number.
pub fn assign_page(start: usize, end: usize, page_breaks: &[usize]) -> Option<u32> {
    if page_breaks.is_empty() || end <= start {
        return None;
    }

    // Index of the page containing `start`.
    let first = page_breaks.partition_point(|&b| b <= start).saturating_sub(1);
    let middle = start + (end - start - 1) / 2;

    let mut best: Option<(usize, usize, bool)> = None;
    for page in first..page_breaks.len() {
        let page_start = page_breaks[page];
        if page_start >= end {
            break;
        }
        let page_end = page_breaks.get(page + 1).copied().unwrap_or(usize::MAX);
        let overlap = end.min(page_end).saturating_sub(start.max(page_start));
        let holds_middle = page_start <= middle && middle < page_end;

        let better = match best {
            None => true,
            Some((_, best_overlap, best_middle)) => {
                overlap > best_overlap || (overlap == best_overlap && holds_middle && !best_middle)
            }
        };
        if better {
            best = Some((page, overlap, holds_middle));
        }
    }

    best.map(|(page, _, _)| page as u32 + 1)
}

/// Chunk a document and wrap the pieces as [`Chunk`]s with ids and pages.
pub fn build_chunks(
    chunker: &dyn Chunker,
    document: &DocumentInput,
    config: &ChunkConfig,
) -> Result<Vec<Chunk>> {
    if let Some(breaks) = &document.page_breaks {
        validate_page_breaks(breaks, document.text.chars().count())?;
    }

    let pieces = chunker.chunk(&document.text, config)?;
    let chunks: Vec<Chunk> = pieces
        .into_iter()
        .enumerate()
        .map(|(seq, data)| {
            let page = document
                .page_breaks
                .as_deref()
                .and_then(|breaks| assign_page(data.start_offset, data.end_offset, breaks));
            Chunk::new(
                ChunkId::new(document.id.clone(), seq as u32),
                data.content,
                data.start_offset,
                data.end_offset,
                page,
                data.token_count as u32,
            )
        })
        .collect();

    debug!("Document {} split into {} chunks", document.id, chunks.len());

    Ok(chunks)
}

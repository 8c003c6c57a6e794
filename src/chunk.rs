//! Text chunking with bounded, optionally overlapping segments.
//!
//! Splits raw source text into [`TextChunk`]s under a configurable
//! `max_chunk_size` (characters). Three strategies:
//!
//! - **fixed-length** — cuts at `max_chunk_size` boundaries; each
//!   subsequent chunk starts `max_chunk_size - overlap_size` bytes after
//!   the previous chunk's start, so consecutive chunks overlap by exactly
//!   `overlap_size`.
//! - **sentence-aware / paragraph-aware** — accumulates whole units into
//!   a chunk until adding the next unit would exceed `max_chunk_size`. A
//!   single unit longer than `max_chunk_size` is hard-split using the
//!   fixed-length rule (never dropped).
//!
//! Unit boundaries include their trailing separator, so the units tile
//! the source exactly: every chunk is an exact slice of the source and
//! concatenating chunk texts (minus declared overlap) reconstructs it.
//!
//! All cut points are snapped to UTF-8 character boundaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::TextChunk;

/// Approximate characters-per-token ratio.
///
/// A rough heuristic (4 chars ≈ 1 token) used for progress and limit
/// estimation only.
const CHARS_PER_TOKEN: usize = 4;

/// How source text is divided into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    /// Cut every `max_chunk_size` bytes with `overlap_size` overlap.
    FixedLength,
    /// Accumulate whole sentences up to `max_chunk_size`.
    SentenceAware,
    /// Accumulate whole paragraphs (separated by `\n\n`) up to
    /// `max_chunk_size`.
    #[default]
    ParagraphAware,
}

/// Chunking parameters.
///
/// Precondition: `overlap_size < max_chunk_size` and `max_chunk_size > 0`;
/// violating either is a configuration error surfaced before any chunking
/// is attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingOptions {
    pub strategy: ChunkStrategy,
    /// Maximum chunk length in bytes.
    pub max_chunk_size: usize,
    /// Overlap between consecutive fixed-length chunks, in bytes.
    pub overlap_size: usize,
    /// Chunks shorter than this are coalesced into a neighbor by
    /// [`merge_small_chunks`]. `0` disables merging.
    pub min_chunk_size: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::ParagraphAware,
            max_chunk_size: 2000,
            overlap_size: 0,
            min_chunk_size: 0,
        }
    }
}

impl ChunkingOptions {
    /// Validate the option invariants. Called before any chunking work.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(Error::Config("max_chunk_size must be > 0".to_string()));
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(Error::Config(format!(
                "overlap_size ({}) must be smaller than max_chunk_size ({})",
                self.overlap_size, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

/// Split `text` into chunks according to `options`.
///
/// Returns chunks with contiguous indices starting at 0 and strictly
/// increasing `start_offset`. Empty text yields an empty vector (not an
/// error). When `options.min_chunk_size > 0`, the small-chunk merge pass
/// runs afterwards.
///
/// # Errors
///
/// [`Error::Config`] if `max_chunk_size == 0` or
/// `overlap_size >= max_chunk_size`.
pub fn chunk_text(source_id: &str, text: &str, options: &ChunkingOptions) -> Result<Vec<TextChunk>> {
    options.validate()?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    match options.strategy {
        ChunkStrategy::FixedLength => {
            for (start, end) in fixed_ranges(text, options.max_chunk_size, options.overlap_size) {
                push_chunk(&mut chunks, source_id, text, start, end);
            }
        }
        ChunkStrategy::SentenceAware => {
            chunk_units(&mut chunks, source_id, text, sentence_ranges(text), options);
        }
        ChunkStrategy::ParagraphAware => {
            chunk_units(&mut chunks, source_id, text, paragraph_ranges(text), options);
        }
    }

    if options.min_chunk_size > 0 {
        chunks = merge_small_chunks(chunks, options.min_chunk_size);
    }

    Ok(chunks)
}

/// Coalesce adjacent chunks shorter than `min_chunk_size` into their
/// predecessor, preserving order. Never merges across source boundaries.
/// Indices, ids, and token estimates are recomputed afterwards.
///
/// Overlapping neighbors (fixed-length chunking with `overlap_size > 0`)
/// share their overlap region; only the suffix past the predecessor's end
/// is appended, so the merged text stays an exact slice of the source.
pub fn merge_small_chunks(chunks: Vec<TextChunk>, min_chunk_size: usize) -> Vec<TextChunk> {
    if min_chunk_size == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut merged: Vec<TextChunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if let Some(last) = merged.last_mut() {
            if last.source_id == chunk.source_id
                && (last.text.len() < min_chunk_size || chunk.text.len() < min_chunk_size)
            {
                let skip = last.end_offset.saturating_sub(chunk.start_offset);
                last.text.push_str(&chunk.text[skip.min(chunk.text.len())..]);
                last.end_offset = last.end_offset.max(chunk.end_offset);
                continue;
            }
        }
        merged.push(chunk);
    }

    // Re-index per source and refresh derived fields.
    let mut counters: HashMap<String, usize> = HashMap::new();
    for chunk in merged.iter_mut() {
        let counter = counters.entry(chunk.source_id.clone()).or_insert(0);
        chunk.index = *counter;
        chunk.id = chunk_id(&chunk.source_id, *counter);
        chunk.token_estimate = estimate_token_count(&chunk.text);
        *counter += 1;
    }

    merged
}

/// Cheap deterministic token-count approximation (`len / 4`, rounded up).
pub fn estimate_token_count(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Deterministic chunk UUID (v5 over `source_id` and index).
pub(crate) fn chunk_id(source_id: &str, index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{source_id}:{index}").as_bytes(),
    )
    .to_string()
}

fn push_chunk(chunks: &mut Vec<TextChunk>, source_id: &str, text: &str, start: usize, end: usize) {
    debug_assert!(start < end);
    let slice = &text[start..end];
    let index = chunks.len();
    chunks.push(TextChunk {
        id: chunk_id(source_id, index),
        source_id: source_id.to_string(),
        text: slice.to_string(),
        start_offset: start,
        end_offset: end,
        token_estimate: estimate_token_count(slice),
        index,
    });
}

/// Byte ranges for fixed-length chunking with overlap.
fn fixed_ranges(text: &str, max_chunk_size: usize, overlap_size: usize) -> Vec<(usize, usize)> {
    let stride = max_chunk_size - overlap_size;
    let len = text.len();
    let mut ranges = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = snap_to_char_boundary(text, (start + max_chunk_size).min(len));
        if end <= start {
            end = next_char_boundary(text, start);
        }
        ranges.push((start, end));
        if end >= len {
            break;
        }
        let mut next = snap_to_char_boundary(text, start + stride);
        if next <= start {
            next = next_char_boundary(text, start);
        }
        start = next;
    }

    ranges
}

/// Accumulate unit ranges into chunks of at most `max_chunk_size` bytes,
/// hard-splitting single units that exceed the limit.
fn chunk_units(
    chunks: &mut Vec<TextChunk>,
    source_id: &str,
    text: &str,
    units: Vec<(usize, usize)>,
    options: &ChunkingOptions,
) {
    let max = options.max_chunk_size;
    let mut current: Option<(usize, usize)> = None;

    for (unit_start, unit_end) in units {
        if unit_end - unit_start > max {
            if let Some((start, end)) = current.take() {
                push_chunk(chunks, source_id, text, start, end);
            }
            // Oversized single unit: fall back to the fixed-length rule.
            for (s, e) in fixed_ranges(&text[unit_start..unit_end], max, options.overlap_size) {
                push_chunk(chunks, source_id, text, unit_start + s, unit_start + e);
            }
            continue;
        }

        current = match current {
            None => Some((unit_start, unit_end)),
            Some((start, end)) => {
                if unit_end - start > max {
                    push_chunk(chunks, source_id, text, start, end);
                    Some((unit_start, unit_end))
                } else {
                    Some((start, unit_end))
                }
            }
        };
    }

    if let Some((start, end)) = current {
        push_chunk(chunks, source_id, text, start, end);
    }
}

/// Sentence ranges including trailing whitespace, tiling the text exactly.
///
/// A sentence ends after `.`, `!`, or `?` plus any following whitespace.
/// Trailing text without a terminator forms a final unit.
fn sentence_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if matches!(ch, '.' | '!' | '?') {
            let mut end = i + ch.len_utf8();
            while let Some(&(j, next)) = iter.peek() {
                if next.is_whitespace() {
                    end = j + next.len_utf8();
                    iter.next();
                } else {
                    break;
                }
            }
            ranges.push((start, end));
            start = end;
        }
    }

    if start < text.len() {
        ranges.push((start, text.len()));
    }

    ranges
}

/// Paragraph ranges including the trailing `\n\n` separator.
fn paragraph_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    for part in text.split_inclusive("\n\n") {
        let end = offset + part.len();
        ranges.push((offset, end));
        offset = end;
    }
    ranges
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary strictly after `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    let mut i = (index + 1).min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

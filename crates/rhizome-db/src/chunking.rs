//! Built-in paragraph chunking backend.
//!
//! Splits text at blank lines, breaks paragraphs longer than
//! `max_chunk_size` at the last whitespace before the limit, and merges runs
//! of short paragraphs until they reach `min_chunk_size`. Offsets are
//! character offsets into the input; indices are dense from 0.
//!
//! # Example
//!
//! ```rust,ignore
//! use rhizome_db::chunking::{ChunkerConfig, ParagraphChunker};
//! use rhizome_core::ChunkingBackend;
//!
//! let chunker = ParagraphChunker::new(ChunkerConfig::default());
//! let chunks = chunker.chunk("First paragraph.\n\nSecond paragraph.").await?;
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use rhizome_core::{defaults, ChunkingBackend, NewChunk, Result};
use rhizome_recovery::CharText;

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("paragraph break pattern is valid"));

/// Configuration for the paragraph chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum size of a chunk in characters.
    pub max_chunk_size: usize,
    /// Chunks smaller than this are merged with the following paragraph.
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: defaults::CHUNK_SIZE,
            min_chunk_size: defaults::CHUNK_MIN_SIZE,
        }
    }
}

/// Splits text at paragraph boundaries.
#[derive(Debug, Clone, Default)]
pub struct ParagraphChunker {
    config: ChunkerConfig,
}

impl ParagraphChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Character spans of trimmed, non-empty paragraphs.
    fn paragraphs(&self, text: &CharText<'_>) -> Vec<(usize, usize)> {
        let s = text.as_str();
        let mut spans = Vec::new();
        let mut last_end = 0;
        let breaks = PARAGRAPH_BREAK
            .find_iter(s)
            .map(|m| (m.start(), m.end()))
            .chain(std::iter::once((s.len(), s.len())));

        for (brk_start, brk_end) in breaks {
            let piece = &s[last_end..brk_start];
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                let lead = piece.len() - piece.trim_start().len();
                let start_b = last_end + lead;
                let end_b = start_b + trimmed.len();
                spans.push((text.char_at_byte(start_b), text.char_at_byte(end_b)));
            }
            last_end = brk_end;
        }
        spans
    }

    /// Break a span longer than the maximum at whitespace where possible.
    fn split_long(&self, chars: &[char], start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
        let max = self.config.max_chunk_size.max(1);
        let min = self.config.min_chunk_size.min(max);
        let mut s = start;
        while end - s > max {
            let limit = s + max;
            let cut = (s + min.max(1)..limit)
                .rev()
                .find(|&i| chars[i].is_whitespace())
                .unwrap_or(limit);
            out.push((s, cut));
            s = cut;
            while s < end && chars[s].is_whitespace() {
                s += 1;
            }
        }
        if s < end {
            out.push((s, end));
        }
    }

    /// Merge short neighbours while the merged span stays within the maximum.
    fn merge_short(&self, spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        let max = self.config.max_chunk_size;
        let min = self.config.min_chunk_size;
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (s, e) in spans {
            match merged.last_mut() {
                Some(last) if last.1 - last.0 < min && e - last.0 <= max => last.1 = e,
                _ => merged.push((s, e)),
            }
        }
        // a short tail joins its predecessor
        if merged.len() > 1 {
            let n = merged.len();
            let (ts, te) = merged[n - 1];
            let (ps, _) = merged[n - 2];
            if te - ts < min && te - ps <= max {
                merged.pop();
                merged[n - 2].1 = te;
            }
        }
        merged
    }

    /// Chunk synchronously.
    pub fn split(&self, text: &str) -> Vec<NewChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let indexed = CharText::new(text);
        let chars: Vec<char> = text.chars().collect();

        let mut spans = Vec::new();
        for (s, e) in self.paragraphs(&indexed) {
            self.split_long(&chars, s, e, &mut spans);
        }

        self.merge_short(spans)
            .into_iter()
            .enumerate()
            .map(|(i, (s, e))| {
                let mut chunk = NewChunk::new(i, s, e, indexed.slice(s, e).to_string());
                chunk.metadata = Some(json!({ "type": "paragraph" }));
                chunk
            })
            .collect()
    }
}

#[async_trait]
impl ChunkingBackend for ParagraphChunker {
    async fn chunk(&self, text: &str) -> Result<Vec<NewChunk>> {
        Ok(self.split(text))
    }

    fn name(&self) -> &str {
        "paragraph"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhizome_core::validate_chunk_sequence;

    fn small() -> ParagraphChunker {
        ParagraphChunker::new(ChunkerConfig {
            max_chunk_size: 60,
            min_chunk_size: 20,
        })
    }

    fn assert_valid(text: &str, chunks: &[NewChunk]) {
        validate_chunk_sequence(chunks.iter().map(|c| (c.chunk_index, c.start_offset, c.end_offset)))
            .unwrap();
        let t = CharText::new(text);
        for c in chunks {
            assert_eq!(c.content, t.slice(c.start_offset, c.end_offset));
        }
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(small().split("").is_empty());
        assert!(small().split("  \n\n  ").is_empty());
    }

    #[test]
    fn test_paragraphs_become_chunks() {
        let text = "The first paragraph is long enough.\n\nThe second paragraph is long too.";
        let chunks = small().split(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "The first paragraph is long enough.");
        assert_eq!(chunks[1].content, "The second paragraph is long too.");
        assert_valid(text, &chunks);
    }

    #[test]
    fn test_short_paragraphs_merge() {
        let text = "Tiny.\n\nAlso tiny.\n\nA longer closing paragraph here.";
        let chunks = small().split(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].content, text);
        assert_valid(text, &chunks);
    }

    #[test]
    fn test_long_paragraph_splits_at_whitespace() {
        let text = "word ".repeat(40);
        let chunks = small().split(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.end_offset - c.start_offset <= 60);
            assert!(!c.content.starts_with(' '));
        }
        assert_valid(&text, &chunks);
    }

    #[test]
    fn test_offsets_count_characters() {
        let text = "Ünïcödé paragraph with accents.\n\nSecond paragraph after the break.";
        let chunks = small().split(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].start_offset, 33);
        assert_valid(text, &chunks);
    }

    #[tokio::test]
    async fn test_backend_trait() {
        let chunker = ParagraphChunker::default();
        assert_eq!(chunker.name(), "paragraph");
        let chunks = chunker.chunk("Hello.\n\nWorld.").await.unwrap();
        assert_eq!(chunks.len(), 1);
    }
}

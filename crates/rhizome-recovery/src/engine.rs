//! Position recovery engine.
//!
//! Relocates an annotation anchored in an old version of a document onto
//! the new text and chunk layout. Layers run cheapest first and stop at the
//! first one whose confidence reaches the success threshold:
//!
//! | Layer | Search space | Method |
//! |-------|--------------|--------|
//! | 1 | literal search over the whole new text | `exact` |
//! | 2 | proportionally estimated chunk ± neighbours | `chunk_bounded` |
//! | 3 | ± `context_window_chars` around the estimated offset | `context` |
//! | 4 | whole document, fuzzy | `trigram` |
//!
//! Layer 2 assumes an edit rarely moves text by more than one chunk's worth
//! of position, so `new_index ≈ round(old_index / old_count * new_count)`.
//! That trades precision for a search bounded by chunk size instead of
//! document size; layers 3 and 4 are the correctness backstop when the
//! estimate is wrong.
//!
//! When no layer reaches the threshold, the best candidate seen (earlier
//! layer on equal confidence) is classified as needs-review or lost.

use rhizome_core::{
    Annotation, AnnotationAnchor, Chunk, RecoveryConfig, RecoveryMethod, RecoveryOutcome,
    RecoveryResult, RecoveryTier,
};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::similarity::{MatchCandidate, SimilarityMatcher, TextWithContext};
use crate::text::{char_count, CharText};

/// Bucket a confidence score.
///
/// `confidence >= threshold` without forced review is success, any other
/// positive confidence needs review, zero (or NaN) is lost.
pub fn classify(confidence: f64, threshold: f64, force_review: bool) -> RecoveryTier {
    if confidence >= threshold && !force_review {
        RecoveryTier::Success
    } else if confidence > 0.0 {
        RecoveryTier::NeedsReview
    } else {
        RecoveryTier::Lost
    }
}

/// The new document as seen by the engine: indexed text, new chunks in
/// order, and the size of the old layout.
pub struct DocumentView<'a> {
    text: CharText<'a>,
    chunks: Vec<&'a Chunk>,
    old_chunks: Vec<&'a Chunk>,
    old_len: Option<usize>,
}

impl<'a> DocumentView<'a> {
    pub fn new(new_text: &'a str, new_chunks: &'a [Chunk], old_chunks: &'a [Chunk]) -> Self {
        let mut chunks: Vec<&Chunk> = new_chunks.iter().collect();
        chunks.sort_by_key(|c| c.chunk_index);
        let mut old: Vec<&Chunk> = old_chunks.iter().collect();
        old.sort_by_key(|c| c.chunk_index);
        let old_len = old.iter().map(|c| c.end_offset).max();
        Self {
            text: CharText::new(new_text),
            chunks,
            old_chunks: old,
            old_len,
        }
    }

    pub fn text(&self) -> &CharText<'a> {
        &self.text
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Map an old chunk index onto the new layout by the count ratio.
    pub fn proportional_index(&self, old_index: usize) -> Option<usize> {
        let new_count = self.chunks.len();
        let old_count = self.old_chunks.len();
        if new_count == 0 || old_count == 0 {
            return None;
        }
        let scaled = (old_index as f64 / old_count as f64 * new_count as f64).round() as usize;
        Some(scaled.min(new_count - 1))
    }

    /// Scale an old offset by the ratio of new to old document length.
    pub fn estimate_offset(&self, old_offset: usize) -> usize {
        let new_len = self.text.char_len();
        let estimate = match self.old_len {
            Some(old_len) if old_len > 0 => {
                (old_offset as f64 / old_len as f64 * new_len as f64).round() as usize
            }
            _ => old_offset,
        };
        estimate.min(new_len)
    }

    /// The old chunk index the anchor belongs to: the cached index, else
    /// the position of its first chunk id, else the old chunk containing
    /// its start offset.
    fn old_index_for(&self, anchor: &AnnotationAnchor) -> Option<usize> {
        if anchor.original_chunk_index.is_some() {
            return anchor.original_chunk_index;
        }
        if let Some(first) = anchor.chunk_ids.first() {
            if let Some(c) = self.old_chunks.iter().find(|c| c.id == *first) {
                return Some(c.chunk_index);
            }
        }
        self.old_chunks
            .iter()
            .find(|c| c.touches(anchor.start_offset, anchor.start_offset))
            .map(|c| c.chunk_index)
    }

    /// Character range covered by new chunks `[index - radius, index + radius]`.
    fn chunk_window(&self, index: usize, radius: usize) -> Option<(usize, usize)> {
        let lo = index.saturating_sub(radius);
        let hi = (index + radius).min(self.chunks.len().checked_sub(1)?);
        let start = self.chunks[lo..=hi].iter().map(|c| c.start_offset).min()?;
        let end = self.chunks[lo..=hi].iter().map(|c| c.end_offset).max()?;
        Some((start, end))
    }

    /// New chunks touching `[start, end)`, in order.
    fn chunks_covering(&self, start: usize, end: usize) -> Vec<&'a Chunk> {
        self.chunks
            .iter()
            .copied()
            .filter(|c| c.touches(start, end))
            .collect()
    }
}

/// Layered annotation position recovery.
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    config: RecoveryConfig,
    matcher: SimilarityMatcher,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        let matcher = SimilarityMatcher::new(&config);
        Self { config, matcher }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Recover one annotation against the new text and chunk layout.
    pub fn recover(
        &self,
        annotation: &Annotation,
        new_text: &str,
        new_chunks: &[Chunk],
        old_chunks: &[Chunk],
    ) -> RecoveryResult {
        let view = DocumentView::new(new_text, new_chunks, old_chunks);
        self.recover_anchor(&annotation.anchor, &view)
    }

    /// Recover many annotations, indexing the document once.
    pub fn recover_all(
        &self,
        annotations: &[Annotation],
        new_text: &str,
        new_chunks: &[Chunk],
        old_chunks: &[Chunk],
    ) -> Vec<(Uuid, RecoveryResult)> {
        let view = DocumentView::new(new_text, new_chunks, old_chunks);
        annotations
            .iter()
            .map(|a| {
                let result = self.recover_anchor(&a.anchor, &view);
                trace!(annotation_id = %a.id, tier = ?result.tier(), confidence = result.confidence(), "Recovered annotation");
                (a.id, result)
            })
            .collect()
    }

    /// Recover an anchor against a prepared view of the new document.
    pub fn recover_anchor(&self, anchor: &AnnotationAnchor, view: &DocumentView<'_>) -> RecoveryResult {
        let needle_text = anchor.original_text.as_str();
        if needle_text.trim().is_empty() || view.text.is_empty() {
            return RecoveryResult::Lost;
        }

        let text = &view.text;
        let len = text.char_len();
        let needle_len = char_count(needle_text);
        let estimate = view.estimate_offset(anchor.start_offset);
        let needle = TextWithContext::new(needle_text)
            .with_context(&anchor.text_context.before, &anchor.text_context.after)
            .with_hint(estimate);

        let threshold = self.config.success_threshold;
        let mut best: Option<(MatchCandidate, RecoveryMethod)> = None;
        let mut keep = |candidate: Option<MatchCandidate>, method: RecoveryMethod| -> bool {
            let Some(c) = candidate else {
                return false;
            };
            let reached = c.confidence >= threshold;
            let better = best
                .as_ref()
                .map(|(b, _)| c.confidence > b.confidence)
                .unwrap_or(true);
            if better {
                best = Some((c, method));
            }
            reached
        };

        // Layer 1: literal search over the whole text.
        let mut done = keep(
            self.matcher.exact_in(&needle, text, 0, len),
            RecoveryMethod::Exact,
        );

        // Layer 2: estimated chunk and its neighbours.
        let mut searched: Option<(usize, usize)> = None;
        if !done {
            let window = view
                .old_index_for(anchor)
                .and_then(|old| view.proportional_index(old))
                .and_then(|idx| view.chunk_window(idx, self.config.chunk_neighbor_radius));
            if let Some((ws, we)) = window {
                searched = Some((ws, we));
                done = keep(
                    self.matcher.find_in(&needle, text, ws, we),
                    RecoveryMethod::ChunkBounded,
                );
            }
        }

        // Layer 3: character window around the estimated offset.
        let radius = self.config.context_window_chars;
        let ws = estimate.saturating_sub(radius);
        let we = (estimate + radius + needle_len).min(len);
        if !done && !covers(searched, ws, we) {
            searched = Some(widen(searched, ws, we));
            done = keep(
                self.matcher.find_in(&needle, text, ws, we),
                RecoveryMethod::Context,
            );
        }

        // Layer 4: whole document.
        if !done && self.config.global_trigram_enabled && !covers(searched, 0, len) {
            keep(
                self.matcher.find_in(&needle, text, 0, len),
                RecoveryMethod::Trigram,
            );
        }

        let Some((candidate, method)) = best else {
            debug!(estimate, "No candidate found, annotation lost");
            return RecoveryResult::Lost;
        };

        let outcome = self.build_outcome(&candidate, method, view);
        match classify(outcome.confidence, threshold, self.config.force_review) {
            RecoveryTier::Success => RecoveryResult::Success(outcome),
            RecoveryTier::NeedsReview => RecoveryResult::NeedsReview(outcome),
            RecoveryTier::Lost => RecoveryResult::Lost,
        }
    }

    fn build_outcome(
        &self,
        candidate: &MatchCandidate,
        method: RecoveryMethod,
        view: &DocumentView<'_>,
    ) -> RecoveryOutcome {
        let covering = view.chunks_covering(candidate.start, candidate.end);
        RecoveryOutcome {
            confidence: candidate.confidence,
            method,
            new_start_offset: candidate.start,
            new_end_offset: candidate.end,
            new_chunk_id: covering.first().map(|c| c.id),
            chunk_ids: covering.iter().map(|c| c.id).collect(),
            new_chunk_index: covering.first().map(|c| c.chunk_index),
            context: view.text.context_around(
                candidate.start,
                candidate.end,
                self.config.context_snippet_chars,
            ),
        }
    }
}

/// Apply a successful outcome to an anchor in place.
pub fn apply_outcome(anchor: &mut AnnotationAnchor, outcome: &RecoveryOutcome) {
    anchor.start_offset = outcome.new_start_offset;
    anchor.end_offset = outcome.new_end_offset;
    anchor.chunk_ids = outcome.chunk_ids.clone();
    anchor.original_chunk_index = outcome.new_chunk_index;
    anchor.text_context = outcome.context.clone();
}

fn covers(searched: Option<(usize, usize)>, start: usize, end: usize) -> bool {
    searched
        .map(|(s, e)| s <= start && end <= e)
        .unwrap_or(false)
}

fn widen(searched: Option<(usize, usize)>, start: usize, end: usize) -> (usize, usize) {
    match searched {
        // only a contiguous union can stand in for the searched area
        Some((s, e)) if s <= end && start <= e => (s.min(start), e.max(end)),
        _ => (start, end),
    }
}

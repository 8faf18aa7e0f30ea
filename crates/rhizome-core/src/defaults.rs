//! Centralized default constants for the rhizome reprocessing pipeline.
//!
//! **This module is the single source of truth** for thresholds and tuning
//! values. Classification boundaries here are compared exactly; changing
//! them changes which annotations are auto-applied.

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Minimum confidence for an automatically applied recovery.
///
/// `confidence >= RECOVERY_SUCCESS_THRESHOLD` is success, anything above
/// zero and below it needs review.
pub const RECOVERY_SUCCESS_THRESHOLD: f64 = 0.85;

// =============================================================================
// SIMILARITY MATCHER
// =============================================================================

/// Confidence of a literal match.
pub const EXACT_CONFIDENCE: f64 = 1.0;

/// Confidence of a match located through its surrounding context.
pub const CONTEXT_CONFIDENCE: f64 = 0.9;

/// Upper bound for a fuzzy (trigram) match. Kept below the success
/// threshold so fuzzy matches always go to review.
pub const TRIGRAM_MAX_CONFIDENCE: f64 = 0.84;

/// Fuzzy scores below this are discarded as "no candidate".
pub const SIMILARITY_FLOOR: f64 = 0.3;

/// Shingle length for fuzzy similarity.
pub const NGRAM_SIZE: usize = 3;

/// Sliding window step as a fraction of the needle length (coarse pass).
pub const SLIDE_STEP_DIVISOR: usize = 4;

/// Allowed relative drift in length when a changed span is bracketed by
/// both context anchors.
pub const CONTEXT_SPAN_TOLERANCE: f64 = 0.5;

/// Characters of stored context used as an anchor (nearest to the span).
pub const CONTEXT_ANCHOR_CHARS: usize = 32;

/// Anchors shorter than this (after trimming) are too weak to bracket a span.
pub const CONTEXT_ANCHOR_MIN_CHARS: usize = 8;

// =============================================================================
// RECOVERY ENGINE
// =============================================================================

/// Half-width, in characters, of the context-window fallback search.
pub const CONTEXT_WINDOW_CHARS: usize = 2000;

/// Neighbouring chunks searched on each side of the estimated chunk.
pub const CHUNK_NEIGHBOR_RADIUS: usize = 1;

/// Characters of surrounding text stored as `before`/`after` context.
pub const CONTEXT_SNIPPET_CHARS: usize = 100;

// =============================================================================
// CONNECTION REMAP
// =============================================================================

/// Minimum fraction of an old chunk's span a new chunk must cover to
/// inherit its connections.
pub const CONNECTION_OVERLAP_THRESHOLD: f64 = 0.5;

/// Two candidates whose overlap fractions differ by no more than this are
/// considered equally good and the remap is flagged ambiguous.
pub const CONNECTION_AMBIGUITY_EPSILON: f64 = 0.05;

// =============================================================================
// CHUNKING (built-in paragraph chunker)
// =============================================================================

/// Maximum characters per chunk.
pub const CHUNK_SIZE: usize = 1000;

/// Minimum characters per chunk (smaller paragraphs are merged forward).
pub const CHUNK_MIN_SIZE: usize = 100;

// =============================================================================
// PROGRESS
// =============================================================================

/// Progress percentage after old chunks are deactivated.
pub const PROGRESS_MARKED_STALE: i32 = 10;

/// Progress percentage once the new chunk batch is inserted.
pub const PROGRESS_CHUNKS_INSERTED: i32 = 40;

/// Progress percentage after connection detection.
pub const PROGRESS_CONNECTIONS_DETECTED: i32 = 55;

/// Progress percentage after annotation recovery.
pub const PROGRESS_ANNOTATIONS_RECOVERED: i32 = 80;

/// Progress percentage after connection remap.
pub const PROGRESS_POST_PROCESSED: i32 = 90;

/// Progress percentage when the run has been committed.
pub const PROGRESS_COMPLETE: i32 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigram_cap_below_success() {
        assert!(TRIGRAM_MAX_CONFIDENCE < RECOVERY_SUCCESS_THRESHOLD);
        assert!(CONTEXT_CONFIDENCE >= RECOVERY_SUCCESS_THRESHOLD);
    }

    #[test]
    fn test_floor_below_cap() {
        assert!(SIMILARITY_FLOOR < TRIGRAM_MAX_CONFIDENCE);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let steps = [
            PROGRESS_MARKED_STALE,
            PROGRESS_CHUNKS_INSERTED,
            PROGRESS_CONNECTIONS_DETECTED,
            PROGRESS_ANNOTATIONS_RECOVERED,
            PROGRESS_POST_PROCESSED,
            PROGRESS_COMPLETE,
        ];
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
    }
}

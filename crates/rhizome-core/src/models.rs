//! Core data models for documents, chunks, annotations and connections.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// Processing status of a document as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Reprocessing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Reprocessing => "reprocessing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "reprocessing" => Ok(Self::Reprocessing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!(
                "Unknown document status: {}",
                other
            ))),
        }
    }
}

/// A document whose text is split into chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub status: DocumentStatus,
    /// Label of the last reported pipeline stage.
    pub processing_stage: Option<String>,
    /// Last reported progress percentage (0-100).
    pub progress: i32,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// CHUNK TYPES
// =============================================================================

/// Correlation tag shared by every chunk inserted in one reprocessing run.
///
/// An RFC 3339 UTC timestamp with microsecond precision, so tags from later
/// runs sort after tags from earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchTag(String);

impl BatchTag {
    /// Generate a tag for a run starting now.
    pub fn generate() -> Self {
        Self::from_timestamp(Utc::now())
    }

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BatchTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for BatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored contiguous text span of a document.
///
/// Offsets are character (Unicode scalar) offsets into the document's
/// canonical text, half-open: `[start_offset, end_offset)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub content: String,
    pub is_current: bool,
    /// Batch tag for chunks created by reprocessing, `None` for initial processing.
    pub reprocessing_batch: Option<BatchTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl Chunk {
    /// Length of the span in characters.
    pub fn span_len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    /// Number of characters shared with `[start, end)`.
    pub fn overlap_with(&self, start: usize, end: usize) -> usize {
        let lo = self.start_offset.max(start);
        let hi = self.end_offset.min(end);
        hi.saturating_sub(lo)
    }

    /// Whether the chunk contains any of `[start, end)`. Zero-width ranges
    /// count when they sit inside the chunk.
    pub fn touches(&self, start: usize, end: usize) -> bool {
        if start == end {
            return start >= self.start_offset && start < self.end_offset;
        }
        self.overlap_with(start, end) > 0
    }
}

/// A chunk produced by the chunking pipeline, not yet stored.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub content: String,
    pub metadata: Option<JsonValue>,
    pub embedding: Option<pgvector::Vector>,
}

impl NewChunk {
    pub fn new(chunk_index: usize, start_offset: usize, end_offset: usize, content: String) -> Self {
        Self {
            chunk_index,
            start_offset,
            end_offset,
            content,
            metadata: None,
            embedding: None,
        }
    }
}

/// Check that chunks are ordered by a dense index starting at 0, that every
/// span is non-empty, and that offsets never move backwards.
pub fn validate_chunk_sequence<I>(spans: I) -> Result<(), Error>
where
    I: IntoIterator<Item = (usize, usize, usize)>,
{
    let mut prev_start = 0usize;
    for (expected, (index, start, end)) in spans.into_iter().enumerate() {
        if index != expected {
            return Err(Error::ChunkBatch(format!(
                "chunk index {} found where {} was expected",
                index, expected
            )));
        }
        if end <= start {
            return Err(Error::ChunkBatch(format!(
                "chunk {} has empty or inverted span [{}, {})",
                index, start, end
            )));
        }
        if start < prev_start {
            return Err(Error::ChunkBatch(format!(
                "chunk {} starts at {} before previous chunk start {}",
                index, start, prev_start
            )));
        }
        prev_start = start;
    }
    Ok(())
}

// =============================================================================
// ANNOTATION TYPES
// =============================================================================

/// Text immediately surrounding an annotated span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContext {
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
}

impl TextContext {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// The position-bearing part of an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationAnchor {
    /// Chunks the span lies in, in order. Empty for gap annotations.
    #[serde(default)]
    pub chunk_ids: Vec<Uuid>,
    pub start_offset: usize,
    pub end_offset: usize,
    pub original_text: String,
    #[serde(default)]
    pub text_context: TextContext,
    /// Index of the chunk the annotation was created in.
    #[serde(default)]
    pub original_chunk_index: Option<usize>,
}

/// A user annotation on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub anchor: AnnotationAnchor,
    /// Confidence of the last applied recovery.
    pub recovery_confidence: Option<f64>,
    /// Method of the last applied recovery.
    pub recovery_method: Option<RecoveryMethod>,
    pub needs_review: bool,
    pub suggested_match: Option<SuggestedMatch>,
    /// Set when no credible location was found.
    pub unresolved: bool,
}

impl Annotation {
    pub fn new(document_id: Uuid, anchor: AnnotationAnchor) -> Self {
        Self {
            id: Uuid::now_v7(),
            document_id,
            anchor,
            recovery_confidence: None,
            recovery_method: None,
            needs_review: false,
            suggested_match: None,
            unresolved: false,
        }
    }
}

// =============================================================================
// RECOVERY TYPES
// =============================================================================

/// Which recovery layer located the annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    /// Literal match anywhere in the new text.
    Exact,
    /// Match inside the proportionally estimated chunk and its neighbours.
    ChunkBounded,
    /// Match inside the context window around the estimated offset.
    Context,
    /// Fuzzy match over the whole document.
    Trigram,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::ChunkBounded => "chunk_bounded",
            Self::Context => "context",
            Self::Trigram => "trigram",
        }
    }
}

impl fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "chunk_bounded" => Ok(Self::ChunkBounded),
            "context" => Ok(Self::Context),
            "trigram" => Ok(Self::Trigram),
            other => Err(Error::InvalidInput(format!(
                "Unknown recovery method: {}",
                other
            ))),
        }
    }
}

/// Confidence bucket of a recovery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    Success,
    NeedsReview,
    Lost,
}

/// A located position for an annotation in the new text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub confidence: f64,
    pub method: RecoveryMethod,
    pub new_start_offset: usize,
    pub new_end_offset: usize,
    /// First new chunk covering the span, if any.
    pub new_chunk_id: Option<Uuid>,
    /// Every new chunk covering the span, in order.
    pub chunk_ids: Vec<Uuid>,
    pub new_chunk_index: Option<usize>,
    /// Context snippets taken from the new text around the span.
    pub context: TextContext,
}

/// Result of recovering one annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum RecoveryResult {
    Success(RecoveryOutcome),
    NeedsReview(RecoveryOutcome),
    Lost,
}

impl RecoveryResult {
    pub fn tier(&self) -> RecoveryTier {
        match self {
            Self::Success(_) => RecoveryTier::Success,
            Self::NeedsReview(_) => RecoveryTier::NeedsReview,
            Self::Lost => RecoveryTier::Lost,
        }
    }

    pub fn outcome(&self) -> Option<&RecoveryOutcome> {
        match self {
            Self::Success(o) | Self::NeedsReview(o) => Some(o),
            Self::Lost => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.outcome().map(|o| o.confidence).unwrap_or(0.0)
    }
}

/// Candidate location stored on an annotation awaiting manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedMatch {
    pub start_offset: usize,
    pub end_offset: usize,
    pub confidence: f64,
    pub method: RecoveryMethod,
    pub context_before: String,
    pub context_after: String,
    #[serde(default)]
    pub chunk_ids: Vec<Uuid>,
    #[serde(default)]
    pub chunk_index: Option<usize>,
}

impl From<&RecoveryOutcome> for SuggestedMatch {
    fn from(o: &RecoveryOutcome) -> Self {
        Self {
            start_offset: o.new_start_offset,
            end_offset: o.new_end_offset,
            confidence: o.confidence,
            method: o.method,
            context_before: o.context.before.clone(),
            context_after: o.context.after.clone(),
            chunk_ids: o.chunk_ids.clone(),
            chunk_index: o.new_chunk_index,
        }
    }
}

impl From<&SuggestedMatch> for RecoveryOutcome {
    fn from(s: &SuggestedMatch) -> Self {
        Self {
            confidence: s.confidence,
            method: s.method,
            new_start_offset: s.start_offset,
            new_end_offset: s.end_offset,
            new_chunk_id: s.chunk_ids.first().copied(),
            chunk_ids: s.chunk_ids.clone(),
            new_chunk_index: s.chunk_index,
            context: TextContext::new(s.context_before.clone(), s.context_after.clone()),
        }
    }
}

/// An annotation queued for manual confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub annotation: Annotation,
    pub suggested_match: SuggestedMatch,
}

/// Per-run summary of annotation recovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub success: Vec<Annotation>,
    pub needs_review: Vec<ReviewItem>,
    pub lost: Vec<Annotation>,
    pub execution_time_ms: u64,
    /// `(success + needs_review) / total`, 1.0 when there were no annotations.
    pub recovery_rate: f64,
    /// Annotations whose result could not be written back.
    #[serde(default)]
    pub persist_failures: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.success.len() + self.needs_review.len() + self.lost.len()
    }

    /// Recompute `recovery_rate` from the bucket sizes.
    pub fn finalize_rate(&mut self) {
        let total = self.total();
        self.recovery_rate = if total == 0 {
            1.0
        } else {
            (self.success.len() + self.needs_review.len()) as f64 / total as f64
        };
    }
}

// =============================================================================
// CONNECTION TYPES
// =============================================================================

/// A detected relationship between two chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub source_chunk_id: Uuid,
    pub target_chunk_id: Uuid,
    pub connection_type: String,
    pub strength: f64,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Summary of a connection remap pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemapResult {
    /// Connections with at least one endpoint rewritten and none flagged.
    pub remapped: usize,
    /// Connections left pointing at a stale chunk because candidates tied.
    pub ambiguous: usize,
    /// Connections left pointing at a stale chunk because overlap was too small.
    pub unmapped: usize,
    /// Ids of every flagged connection.
    pub flagged: Vec<Uuid>,
    /// Set when the pass itself failed and the counts are incomplete.
    pub error: Option<String>,
    /// State of every connection this pass wrote to, as read before the write.
    #[serde(skip)]
    pub previous: Vec<Connection>,
}

impl RemapResult {
    /// Result for a pass that could not run.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

// =============================================================================
// REPROCESSING TYPES
// =============================================================================

/// Stage of a reprocessing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprocessingStage {
    Idle,
    MarkedStale,
    ChunksInserted,
    PostProcessed,
    Committed,
    RolledBack,
}

impl ReprocessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MarkedStale => "marked_stale",
            Self::ChunksInserted => "chunks_inserted",
            Self::PostProcessed => "post_processed",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for ReprocessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final report of a reprocessing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessOutcome {
    pub document_id: Uuid,
    pub batch_tag: Option<BatchTag>,
    pub stage: ReprocessingStage,
    pub recovery: RecoveryReport,
    pub remap: RemapResult,
    /// Number of connections created by detection, `None` when it failed.
    pub connections_detected: Option<usize>,
    pub chunk_count: usize,
    /// Error that caused a rollback, if any.
    pub error: Option<String>,
    /// Non-fatal problems encountered along the way.
    pub warnings: Vec<String>,
}

impl ReprocessOutcome {
    pub fn is_committed(&self) -> bool {
        self.stage == ReprocessingStage::Committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, start: usize, end: usize) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::nil(),
            chunk_index: index,
            start_offset: start,
            end_offset: end,
            content: String::new(),
            is_current: true,
            reprocessing_batch: None,
            metadata: None,
        }
    }

    #[test]
    fn test_chunk_overlap() {
        let c = chunk(0, 280, 400);
        assert_eq!(c.overlap_with(300, 490), 100);
        assert_eq!(c.overlap_with(400, 500), 0);
        assert_eq!(c.overlap_with(0, 1000), 120);
    }

    #[test]
    fn test_chunk_touches_zero_width() {
        let c = chunk(0, 10, 20);
        assert!(c.touches(10, 10));
        assert!(!c.touches(20, 20));
        assert!(c.touches(15, 30));
    }

    #[test]
    fn test_batch_tags_sort_by_time() {
        let early = BatchTag::from_timestamp(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let late = BatchTag::from_timestamp(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:01Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        assert!(early < late);
        assert_eq!(early.as_str(), "2026-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_validate_chunk_sequence_ok() {
        let spans = vec![(0, 0, 10), (1, 8, 20), (2, 20, 30)];
        assert!(validate_chunk_sequence(spans).is_ok());
    }

    #[test]
    fn test_validate_chunk_sequence_rejects_gap() {
        let spans = vec![(0, 0, 10), (2, 10, 20)];
        assert!(matches!(
            validate_chunk_sequence(spans),
            Err(Error::ChunkBatch(_))
        ));
    }

    #[test]
    fn test_validate_chunk_sequence_rejects_backwards() {
        let spans = vec![(0, 10, 20), (1, 5, 30)];
        assert!(validate_chunk_sequence(spans).is_err());
        assert!(validate_chunk_sequence(vec![(0, 5, 5)]).is_err());
    }

    #[test]
    fn test_recovery_method_round_trip() {
        for m in [
            RecoveryMethod::Exact,
            RecoveryMethod::ChunkBounded,
            RecoveryMethod::Context,
            RecoveryMethod::Trigram,
        ] {
            assert_eq!(m.as_str().parse::<RecoveryMethod>().unwrap(), m);
        }
        assert!("fuzzy".parse::<RecoveryMethod>().is_err());
    }

    #[test]
    fn test_recovery_rate_empty_is_one() {
        let mut report = RecoveryReport::default();
        report.finalize_rate();
        assert_eq!(report.recovery_rate, 1.0);
    }

    #[test]
    fn test_recovery_rate_counts_review_as_recovered() {
        let anchor = AnnotationAnchor {
            chunk_ids: vec![],
            start_offset: 0,
            end_offset: 1,
            original_text: "a".into(),
            text_context: TextContext::default(),
            original_chunk_index: None,
        };
        let a = Annotation::new(Uuid::nil(), anchor);
        let suggestion = SuggestedMatch {
            start_offset: 0,
            end_offset: 1,
            confidence: 0.5,
            method: RecoveryMethod::Trigram,
            context_before: String::new(),
            context_after: String::new(),
            chunk_ids: vec![],
            chunk_index: None,
        };
        let mut report = RecoveryReport {
            success: vec![a.clone()],
            needs_review: vec![ReviewItem {
                annotation: a.clone(),
                suggested_match: suggestion,
            }],
            lost: vec![a.clone(), a],
            ..Default::default()
        };
        report.finalize_rate();
        assert_eq!(report.recovery_rate, 0.5);
    }

    #[test]
    fn test_recovery_result_serializes_tier() {
        let json = serde_json::to_value(RecoveryResult::Lost).unwrap();
        assert_eq!(json["tier"], "lost");
    }

    #[test]
    fn test_document_status_parse() {
        assert_eq!(
            "reprocessing".parse::<DocumentStatus>().unwrap(),
            DocumentStatus::Reprocessing
        );
        assert!("unknown".parse::<DocumentStatus>().is_err());
    }
}

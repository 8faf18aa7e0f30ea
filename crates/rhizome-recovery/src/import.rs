//! Placing externally created highlights onto a document.
//!
//! An imported highlight has text and an approximate location instead of a
//! stored anchor. It is run through the same [`RecoveryEngine`] as
//! reprocessing, with the current chunk layout on both sides, and sorted
//! into auto-import, review queue, or failed.

use rhizome_core::{
    Annotation, AnnotationAnchor, Chunk, RecoveryResult, SuggestedMatch, TextContext,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::engine::{apply_outcome, DocumentView, RecoveryEngine};

/// Approximate location supplied with a highlight.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LocationHint {
    /// Character offset in the current text.
    Offset(usize),
    /// Index of the chunk the highlight came from.
    ChunkIndex(usize),
    /// Relative position in the document, 0.0 to 1.0 (e.g. a reader's
    /// percentage).
    Fraction(f64),
    #[default]
    None,
}

/// A highlight from an external reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightInput {
    pub text: String,
    #[serde(default)]
    pub hint: LocationHint,
    #[serde(default)]
    pub context: Option<TextContext>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportTier {
    AutoImport,
    ReviewQueue,
    Failed,
}

/// Result of placing one highlight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub input: HighlightInput,
    pub tier: ImportTier,
    /// Annotation ready to store, for auto-import and review queue.
    pub annotation: Option<Annotation>,
    pub confidence: f64,
}

/// Summary of a highlight import batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: Vec<ImportResult>,
    pub review_queue: Vec<ImportResult>,
    pub failed: Vec<ImportResult>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.imported.len() + self.review_queue.len() + self.failed.len()
    }

    /// Annotations to persist, auto-imported first.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.imported
            .iter()
            .chain(self.review_queue.iter())
            .filter_map(|r| r.annotation.as_ref())
    }
}

/// Build the provisional anchor for a highlight from its location hint.
pub fn to_annotation(
    document_id: Uuid,
    input: &HighlightInput,
    text_len: usize,
    chunks: &[Chunk],
) -> Annotation {
    let len = input.text.chars().count();
    let (start, chunk_index) = match input.hint {
        LocationHint::Offset(o) => (o.min(text_len), None),
        LocationHint::ChunkIndex(i) => {
            let start = chunks
                .iter()
                .find(|c| c.chunk_index == i)
                .map(|c| c.start_offset)
                .unwrap_or(0);
            (start, Some(i))
        }
        LocationHint::Fraction(f) => {
            let f = if f.is_finite() { f.clamp(0.0, 1.0) } else { 0.0 };
            ((f * text_len as f64).round() as usize, None)
        }
        LocationHint::None => (0, None),
    };

    Annotation::new(
        document_id,
        AnnotationAnchor {
            chunk_ids: Vec::new(),
            start_offset: start,
            end_offset: start + len,
            original_text: input.text.clone(),
            text_context: input.context.clone().unwrap_or_default(),
            original_chunk_index: chunk_index,
        },
    )
}

/// Place a batch of highlights on the current text.
///
/// `chunks` is the document's current layout; it serves as both the old and
/// new layout, so hints are taken at face value.
pub fn import_highlights(
    engine: &RecoveryEngine,
    document_id: Uuid,
    highlights: Vec<HighlightInput>,
    text: &str,
    chunks: &[Chunk],
) -> ImportReport {
    let view = DocumentView::new(text, chunks, chunks);
    let text_len = view.text().char_len();
    let mut report = ImportReport::default();

    for input in highlights {
        let mut annotation = to_annotation(document_id, &input, text_len, chunks);
        let result = engine.recover_anchor(&annotation.anchor, &view);
        let confidence = result.confidence();

        let tier = match &result {
            RecoveryResult::Success(outcome) => {
                apply_outcome(&mut annotation.anchor, outcome);
                annotation.recovery_confidence = Some(outcome.confidence);
                annotation.recovery_method = Some(outcome.method);
                ImportTier::AutoImport
            }
            RecoveryResult::NeedsReview(outcome) => {
                annotation.needs_review = true;
                annotation.suggested_match = Some(SuggestedMatch::from(outcome));
                ImportTier::ReviewQueue
            }
            RecoveryResult::Lost => ImportTier::Failed,
        };
        debug!(tier = ?tier, confidence, "Placed highlight");

        let placed = ImportResult {
            annotation: (tier != ImportTier::Failed).then_some(annotation),
            input,
            tier,
            confidence,
        };
        match tier {
            ImportTier::AutoImport => report.imported.push(placed),
            ImportTier::ReviewQueue => report.review_queue.push(placed),
            ImportTier::Failed => report.failed.push(placed),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Rivers carve valleys over long periods. \
        Glaciers carve them faster and leave moraines behind. \
        Wind shapes deserts into dunes.";

    fn chunks(text: &str) -> Vec<Chunk> {
        let len = text.chars().count();
        let mid = len / 2;
        [(0usize, 0usize, mid), (1, mid, len)]
            .into_iter()
            .map(|(i, s, e)| Chunk {
                id: Uuid::new_v4(),
                document_id: Uuid::nil(),
                chunk_index: i,
                start_offset: s,
                end_offset: e,
                content: text.chars().skip(s).take(e - s).collect(),
                is_current: true,
                reprocessing_batch: None,
                metadata: None,
            })
            .collect()
    }

    fn highlight(text: &str, hint: LocationHint) -> HighlightInput {
        HighlightInput {
            text: text.to_string(),
            hint,
            context: None,
            external_id: None,
            note: None,
        }
    }

    #[test]
    fn test_import_sorts_into_tiers() {
        let chunks = chunks(TEXT);
        let report = import_highlights(
            &RecoveryEngine::default(),
            Uuid::nil(),
            vec![
                highlight("leave moraines behind", LocationHint::Fraction(0.6)),
                highlight("Glaciers carv them fastr", LocationHint::ChunkIndex(0)),
                highlight("photosynthesis in leaves", LocationHint::None),
            ],
            TEXT,
            &chunks,
        );
        assert_eq!(report.total(), 3);
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.review_queue.len(), 1);
        assert_eq!(report.failed.len(), 1);

        let imported = report.imported[0].annotation.as_ref().unwrap();
        let start = TEXT.find("leave moraines").unwrap();
        assert_eq!(imported.anchor.start_offset, start);
        assert!(!imported.anchor.chunk_ids.is_empty());

        let queued = report.review_queue[0].annotation.as_ref().unwrap();
        assert!(queued.needs_review);
        assert!(queued.suggested_match.is_some());
        assert!(report.failed[0].annotation.is_none());
        assert_eq!(report.annotations().count(), 2);
    }

    #[test]
    fn test_to_annotation_uses_hint() {
        let chunks = chunks(TEXT);
        let len = TEXT.chars().count();
        let by_chunk = to_annotation(Uuid::nil(), &highlight("x", LocationHint::ChunkIndex(1)), len, &chunks);
        assert_eq!(by_chunk.anchor.start_offset, chunks[1].start_offset);
        assert_eq!(by_chunk.anchor.original_chunk_index, Some(1));

        let by_fraction = to_annotation(Uuid::nil(), &highlight("x", LocationHint::Fraction(2.0)), len, &chunks);
        assert_eq!(by_fraction.anchor.start_offset, len);

        let by_offset = to_annotation(Uuid::nil(), &highlight("abc", LocationHint::Offset(5)), len, &chunks);
        assert_eq!((by_offset.anchor.start_offset, by_offset.anchor.end_offset), (5, 8));
    }
}

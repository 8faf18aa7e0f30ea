//! Review queue actions and highlight import persistence.

use tracing::info;
use uuid::Uuid;

use rhizome_core::{
    Annotation, AnnotationRepository, ChunkRepository, Error, RecoveryOutcome, Result,
    SuggestedMatch,
};
use rhizome_recovery::{import_highlights, HighlightInput, ImportReport, RecoveryEngine};

async fn pending_suggestion(
    annotations: &dyn AnnotationRepository,
    id: Uuid,
) -> Result<SuggestedMatch> {
    annotations
        .get(id)
        .await?
        .ok_or(Error::AnnotationNotFound(id))?
        .suggested_match
        .ok_or_else(|| Error::InvalidInput(format!("annotation {} has no suggested match", id)))
}

/// Apply a queued suggestion as the annotation's new position.
pub async fn accept_suggestion(
    annotations: &dyn AnnotationRepository,
    id: Uuid,
) -> Result<Annotation> {
    let outcome = RecoveryOutcome::from(&pending_suggestion(annotations, id).await?);

    annotations.apply_recovery(id, &outcome).await?;
    info!(annotation_id = %id, confidence = outcome.confidence, "Accepted suggested match");
    annotations
        .get(id)
        .await?
        .ok_or(Error::AnnotationNotFound(id))
}

/// Decline a queued suggestion; the annotation becomes unresolved.
pub async fn reject_suggestion(
    annotations: &dyn AnnotationRepository,
    id: Uuid,
) -> Result<Annotation> {
    pending_suggestion(annotations, id).await?;
    annotations.mark_lost(id).await?;
    info!(annotation_id = %id, "Rejected suggested match");
    annotations
        .get(id)
        .await?
        .ok_or(Error::AnnotationNotFound(id))
}

/// Place highlights on a document's current text and store every placed
/// annotation. Failed placements are reported, not stored.
pub async fn import_and_store(
    engine: &RecoveryEngine,
    chunks: &dyn ChunkRepository,
    annotations: &dyn AnnotationRepository,
    document_id: Uuid,
    text: &str,
    highlights: Vec<HighlightInput>,
) -> Result<ImportReport> {
    let current = chunks.list_current(document_id).await?;
    let report = import_highlights(engine, document_id, highlights, text, &current);

    for annotation in report.annotations() {
        annotations.insert(annotation).await?;
    }

    info!(
        document_id = %document_id,
        imported = report.imported.len(),
        review_queue = report.review_queue.len(),
        failed = report.failed.len(),
        "Imported highlights"
    );
    Ok(report)
}

//! Core traits for rhizome abstractions.
//!
//! Repository traits define the storage operations the pipeline needs;
//! collaborator traits stand in for the chunking, enrichment, embedding and
//! connection-detection services the pipeline calls but does not own.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

/// Document status bookkeeping.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Fetch a document.
    async fn get(&self, id: Uuid) -> Result<Document>;

    /// Set the document status and (for failures) the error message.
    async fn set_status(&self, id: Uuid, status: DocumentStatus, error: Option<&str>) -> Result<()>;

    /// Record the last reported progress and stage label.
    async fn set_progress(&self, id: Uuid, percent: i32, stage: &str) -> Result<()>;
}

/// Chunk storage primitives used by the migration coordinator.
///
/// None of these operations need to be atomic with each other; the
/// coordinator sequences them so that a document never has zero current
/// chunks and every step can be compensated.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Current chunks of a document ordered by `chunk_index`.
    async fn list_current(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Every chunk of a document regardless of generation, ordered by
    /// batch then `chunk_index`.
    async fn list_all(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Set `is_current = false` on every current chunk; returns their ids.
    async fn deactivate_current(&self, document_id: Uuid) -> Result<Vec<Uuid>>;

    /// Insert all chunks of a batch as non-current. Must insert all or none.
    async fn insert_batch(
        &self,
        document_id: Uuid,
        batch: &BatchTag,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>>;

    /// Set `is_current = true` on every chunk carrying `batch`.
    async fn activate_batch(&self, document_id: Uuid, batch: &BatchTag) -> Result<u64>;

    /// Delete every non-current chunk of a document.
    async fn delete_inactive(&self, document_id: Uuid) -> Result<u64>;

    /// Delete every chunk carrying `batch`.
    async fn delete_batch(&self, document_id: Uuid, batch: &BatchTag) -> Result<u64>;

    /// Set `is_current = true` on the given chunks.
    async fn reactivate(&self, chunk_ids: &[Uuid]) -> Result<u64>;
}

/// Annotation storage.
#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    /// Every annotation of a document.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Annotation>>;

    /// Fetch one annotation.
    async fn get(&self, id: Uuid) -> Result<Option<Annotation>>;

    /// Store a new annotation (used by highlight import).
    async fn insert(&self, annotation: &Annotation) -> Result<()>;

    /// Move the anchor to a recovered position and clear any review state.
    async fn apply_recovery(&self, id: Uuid, outcome: &RecoveryOutcome) -> Result<()>;

    /// Leave the anchor untouched and attach a suggestion for review.
    async fn flag_for_review(&self, id: Uuid, suggestion: &SuggestedMatch) -> Result<()>;

    /// Leave the anchor untouched and mark it unresolved.
    async fn mark_lost(&self, id: Uuid) -> Result<()>;

    /// Write back a previously read annotation's anchor, recovery and review
    /// state verbatim. Used to undo recovery results when a run rolls back.
    async fn restore(&self, annotation: &Annotation) -> Result<()>;
}

/// Connection storage, as far as chunk identity migration needs it.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Connections with either endpoint in `chunk_ids`.
    async fn list_for_chunks(&self, chunk_ids: &[Uuid]) -> Result<Vec<Connection>>;

    /// Rewrite both endpoints of a connection.
    async fn update_endpoints(&self, id: Uuid, source: Uuid, target: Uuid) -> Result<()>;

    /// Mark a connection as referencing a chunk that no longer exists.
    async fn flag_stale(&self, id: Uuid, reason: &str) -> Result<()>;

    /// Write back a previously read connection's endpoints and metadata.
    async fn restore(&self, connection: &Connection) -> Result<()>;
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Splits document text into chunks.
#[async_trait]
pub trait ChunkingBackend: Send + Sync {
    /// Chunk the text. Returned chunks carry dense indices from 0.
    async fn chunk(&self, text: &str) -> Result<Vec<NewChunk>>;

    /// Name of the chunking strategy, for logs.
    fn name(&self) -> &str;
}

/// Adds descriptive metadata to chunks.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    /// Produce one metadata object per chunk, in order.
    async fn enrich(&self, chunks: &[NewChunk]) -> Result<Vec<JsonValue>>;
}

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts, one vector per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<pgvector::Vector>>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Detects connections between chunks of a freshly chunked document.
#[async_trait]
pub trait ConnectionDetector: Send + Sync {
    /// Run detection over the new chunks; returns the number of connections created.
    async fn detect(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<usize>;
}

/// Enricher that leaves chunks without metadata.
pub struct NoOpEnricher;

#[async_trait]
impl MetadataEnricher for NoOpEnricher {
    async fn enrich(&self, chunks: &[NewChunk]) -> Result<Vec<JsonValue>> {
        Ok(vec![JsonValue::Null; chunks.len()])
    }
}

/// Detector that finds nothing.
pub struct NoOpDetector;

#[async_trait]
impl ConnectionDetector for NoOpDetector {
    async fn detect(&self, _document_id: Uuid, _chunks: &[Chunk]) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_enricher_returns_one_value_per_chunk() {
        let chunks = vec![
            NewChunk::new(0, 0, 5, "hello".into()),
            NewChunk::new(1, 5, 10, "world".into()),
        ];
        let meta = NoOpEnricher.enrich(&chunks).await.unwrap();
        assert_eq!(meta.len(), 2);
        assert!(meta.iter().all(|m| m.is_null()));
    }

    #[tokio::test]
    async fn test_noop_detector_finds_nothing() {
        assert_eq!(NoOpDetector.detect(Uuid::nil(), &[]).await.unwrap(), 0);
    }
}

//! Annotation repository.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use rhizome_core::{
    Annotation, AnnotationAnchor, AnnotationRepository, Error, RecoveryMethod, RecoveryOutcome,
    Result, SuggestedMatch, TextContext,
};

use crate::{from_db_index, from_db_offset, to_db_index, to_db_offset};

const ANNOTATION_COLUMNS: &str = "id, document_id, chunk_ids, start_offset, end_offset, \
     original_text, context_before, context_after, original_chunk_index, recovery_confidence, \
     recovery_method, needs_review, suggested_match, unresolved";

/// PostgreSQL implementation of AnnotationRepository.
pub struct PgAnnotationRepository {
    pool: Pool<Postgres>,
}

impl PgAnnotationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn annotation_from_row(row: &PgRow) -> Result<Annotation> {
    let chunk_index: Option<i32> = row.get("original_chunk_index");
    let method: Option<String> = row.get("recovery_method");
    let suggestion: Option<serde_json::Value> = row.get("suggested_match");

    Ok(Annotation {
        id: row.get("id"),
        document_id: row.get("document_id"),
        anchor: AnnotationAnchor {
            chunk_ids: row.get("chunk_ids"),
            start_offset: from_db_offset(row.get("start_offset"))?,
            end_offset: from_db_offset(row.get("end_offset"))?,
            original_text: row.get("original_text"),
            text_context: TextContext::new(
                row.get::<String, _>("context_before"),
                row.get::<String, _>("context_after"),
            ),
            original_chunk_index: chunk_index.map(from_db_index).transpose()?,
        },
        recovery_confidence: row.get("recovery_confidence"),
        recovery_method: method.map(|m| m.parse::<RecoveryMethod>()).transpose()?,
        needs_review: row.get("needs_review"),
        suggested_match: suggestion
            .map(serde_json::from_value::<SuggestedMatch>)
            .transpose()?,
        unresolved: row.get("unresolved"),
    })
}

fn ensure_found(rows_affected: u64, id: Uuid) -> Result<()> {
    if rows_affected == 0 {
        return Err(Error::AnnotationNotFound(id));
    }
    Ok(())
}

#[async_trait]
impl AnnotationRepository for PgAnnotationRepository {
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Annotation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM annotations WHERE document_id = $1 ORDER BY id",
            ANNOTATION_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(annotation_from_row).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Annotation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM annotations WHERE id = $1",
            ANNOTATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(annotation_from_row).transpose()
    }

    async fn insert(&self, annotation: &Annotation) -> Result<()> {
        let anchor = &annotation.anchor;
        let suggestion = annotation
            .suggested_match
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            "INSERT INTO annotations (id, document_id, chunk_ids, start_offset, end_offset,
                                      original_text, context_before, context_after,
                                      original_chunk_index, recovery_confidence, recovery_method,
                                      needs_review, suggested_match, unresolved)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(annotation.id)
        .bind(annotation.document_id)
        .bind(&anchor.chunk_ids)
        .bind(to_db_offset(anchor.start_offset)?)
        .bind(to_db_offset(anchor.end_offset)?)
        .bind(&anchor.original_text)
        .bind(&anchor.text_context.before)
        .bind(&anchor.text_context.after)
        .bind(anchor.original_chunk_index.map(to_db_index).transpose()?)
        .bind(annotation.recovery_confidence)
        .bind(annotation.recovery_method.map(|m| m.as_str()))
        .bind(annotation.needs_review)
        .bind(suggestion)
        .bind(annotation.unresolved)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn apply_recovery(&self, id: Uuid, outcome: &RecoveryOutcome) -> Result<()> {
        let result = sqlx::query(
            "UPDATE annotations
             SET chunk_ids = $2, start_offset = $3, end_offset = $4,
                 context_before = $5, context_after = $6, original_chunk_index = $7,
                 recovery_confidence = $8, recovery_method = $9,
                 needs_review = FALSE, suggested_match = NULL, unresolved = FALSE,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(&outcome.chunk_ids)
        .bind(to_db_offset(outcome.new_start_offset)?)
        .bind(to_db_offset(outcome.new_end_offset)?)
        .bind(&outcome.context.before)
        .bind(&outcome.context.after)
        .bind(outcome.new_chunk_index.map(to_db_index).transpose()?)
        .bind(outcome.confidence)
        .bind(outcome.method.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        ensure_found(result.rows_affected(), id)
    }

    async fn flag_for_review(&self, id: Uuid, suggestion: &SuggestedMatch) -> Result<()> {
        let result = sqlx::query(
            "UPDATE annotations
             SET needs_review = TRUE, suggested_match = $2, unresolved = FALSE,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(serde_json::to_value(suggestion)?)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        ensure_found(result.rows_affected(), id)
    }

    async fn mark_lost(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE annotations
             SET unresolved = TRUE, needs_review = FALSE, suggested_match = NULL,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        ensure_found(result.rows_affected(), id)
    }

    async fn restore(&self, annotation: &Annotation) -> Result<()> {
        let anchor = &annotation.anchor;
        let suggestion = annotation
            .suggested_match
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE annotations
             SET chunk_ids = $2, start_offset = $3, end_offset = $4,
                 context_before = $5, context_after = $6, original_chunk_index = $7,
                 recovery_confidence = $8, recovery_method = $9,
                 needs_review = $10, suggested_match = $11, unresolved = $12,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(annotation.id)
        .bind(&anchor.chunk_ids)
        .bind(to_db_offset(anchor.start_offset)?)
        .bind(to_db_offset(anchor.end_offset)?)
        .bind(&anchor.text_context.before)
        .bind(&anchor.text_context.after)
        .bind(anchor.original_chunk_index.map(to_db_index).transpose()?)
        .bind(annotation.recovery_confidence)
        .bind(annotation.recovery_method.map(|m| m.as_str()))
        .bind(annotation.needs_review)
        .bind(suggestion)
        .bind(annotation.unresolved)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        ensure_found(result.rows_affected(), annotation.id)
    }
}

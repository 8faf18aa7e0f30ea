//! Document status repository.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use rhizome_core::{Document, DocumentRepository, DocumentStatus, Error, Result};

/// PostgreSQL implementation of DocumentRepository.
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Register a document so its status can be tracked.
    pub async fn create(&self, id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO documents (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn get(&self, id: Uuid) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, status, processing_stage, progress, error_message, updated_at
             FROM documents
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::DocumentNotFound(id))?;

        let status: String = row.get("status");
        Ok(Document {
            id: row.get("id"),
            status: status.parse()?,
            processing_stage: row.get("processing_stage"),
            progress: row.get("progress"),
            error_message: row.get("error_message"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn set_status(&self, id: Uuid, status: DocumentStatus, error: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents
             SET status = $2, error_message = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, percent: i32, stage: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents
             SET progress = $2, processing_stage = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(percent)
        .bind(stage)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

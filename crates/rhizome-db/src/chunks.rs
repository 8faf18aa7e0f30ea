//! Chunk repository: generations of chunks tagged by reprocessing batch.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use rhizome_core::{BatchTag, Chunk, ChunkRepository, Error, NewChunk, Result};

use crate::{from_db_index, from_db_offset, to_db_index, to_db_offset};

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, start_offset, end_offset, content, \
                             is_current, reprocessing_batch, metadata";

/// PostgreSQL implementation of ChunkRepository.
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(chunk_from_row).collect()
    }
}

fn chunk_from_row(row: &PgRow) -> Result<Chunk> {
    let batch: Option<String> = row.get("reprocessing_batch");
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: from_db_index(row.get("chunk_index"))?,
        start_offset: from_db_offset(row.get("start_offset"))?,
        end_offset: from_db_offset(row.get("end_offset"))?,
        content: row.get("content"),
        is_current: row.get("is_current"),
        reprocessing_batch: batch.map(BatchTag::from),
        metadata: row.get("metadata"),
    })
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn list_current(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        self.fetch(
            &format!(
                "SELECT {} FROM chunks WHERE document_id = $1 AND is_current ORDER BY chunk_index",
                CHUNK_COLUMNS
            ),
            document_id,
        )
        .await
    }

    async fn list_all(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        self.fetch(
            &format!(
                "SELECT {} FROM chunks WHERE document_id = $1
                 ORDER BY reprocessing_batch NULLS FIRST, chunk_index",
                CHUNK_COLUMNS
            ),
            document_id,
        )
        .await
    }

    async fn deactivate_current(&self, document_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "UPDATE chunks SET is_current = FALSE
             WHERE document_id = $1 AND is_current
             RETURNING id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn insert_batch(
        &self,
        document_id: Uuid,
        batch: &BatchTag,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut stored = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let id = Uuid::now_v7();
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, start_offset, end_offset,
                                     content, is_current, reprocessing_batch, metadata, embedding)
                 VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $8, $9)",
            )
            .bind(id)
            .bind(document_id)
            .bind(to_db_index(chunk.chunk_index)?)
            .bind(to_db_offset(chunk.start_offset)?)
            .bind(to_db_offset(chunk.end_offset)?)
            .bind(&chunk.content)
            .bind(batch.as_str())
            .bind(&chunk.metadata)
            .bind(&chunk.embedding)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            stored.push(Chunk {
                id,
                document_id,
                chunk_index: chunk.chunk_index,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                content: chunk.content,
                is_current: false,
                reprocessing_batch: Some(batch.clone()),
                metadata: chunk.metadata,
            });
        }

        tx.commit().await.map_err(Error::Database)?;
        debug!(document_id = %document_id, batch_tag = %batch, chunk_count = stored.len(), "Inserted chunk batch");
        Ok(stored)
    }

    async fn activate_batch(&self, document_id: Uuid, batch: &BatchTag) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE chunks SET is_current = TRUE
             WHERE document_id = $1 AND reprocessing_batch = $2",
        )
        .bind(document_id)
        .bind(batch.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn delete_inactive(&self, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = $1 AND NOT is_current")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn delete_batch(&self, document_id: Uuid, batch: &BatchTag) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM chunks WHERE document_id = $1 AND reprocessing_batch = $2")
                .bind(document_id)
                .bind(batch.as_str())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn reactivate(&self, chunk_ids: &[Uuid]) -> Result<u64> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE chunks SET is_current = TRUE WHERE id = ANY($1)")
            .bind(chunk_ids)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

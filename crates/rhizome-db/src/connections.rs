//! Chunk connection repository.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use rhizome_core::{Connection, ConnectionRepository, Error, Result};

/// PostgreSQL implementation of ConnectionRepository.
pub struct PgConnectionRepository {
    pool: Pool<Postgres>,
}

impl PgConnectionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Store a connection (used by detectors and tests).
    pub async fn insert(&self, connection: &Connection) -> Result<()> {
        sqlx::query(
            "INSERT INTO connections (id, source_chunk_id, target_chunk_id, connection_type,
                                      strength, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(connection.id)
        .bind(connection.source_chunk_id)
        .bind(connection.target_chunk_id)
        .bind(&connection.connection_type)
        .bind(connection.strength)
        .bind(&connection.metadata)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn list_for_chunks(&self, chunk_ids: &[Uuid]) -> Result<Vec<Connection>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, source_chunk_id, target_chunk_id, connection_type, strength, metadata
             FROM connections
             WHERE source_chunk_id = ANY($1) OR target_chunk_id = ANY($1)
             ORDER BY id",
        )
        .bind(chunk_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| Connection {
                id: row.get("id"),
                source_chunk_id: row.get("source_chunk_id"),
                target_chunk_id: row.get("target_chunk_id"),
                connection_type: row.get("connection_type"),
                strength: row.get("strength"),
                metadata: row.get("metadata"),
            })
            .collect())
    }

    async fn update_endpoints(&self, id: Uuid, source: Uuid, target: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE connections SET source_chunk_id = $2, target_chunk_id = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(source)
        .bind(target)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("connection {}", id)));
        }
        Ok(())
    }

    async fn flag_stale(&self, id: Uuid, reason: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE connections
             SET metadata = COALESCE(metadata, '{}'::jsonb)
                 || jsonb_build_object('stale_reference', TRUE, 'stale_reason', $2::text)
             WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("connection {}", id)));
        }
        Ok(())
    }

    async fn restore(&self, connection: &Connection) -> Result<()> {
        let result = sqlx::query(
            "UPDATE connections
             SET source_chunk_id = $2, target_chunk_id = $3, metadata = $4
             WHERE id = $1",
        )
        .bind(connection.id)
        .bind(connection.source_chunk_id)
        .bind(connection.target_chunk_id)
        .bind(&connection.metadata)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("connection {}", connection.id)));
        }
        Ok(())
    }
}

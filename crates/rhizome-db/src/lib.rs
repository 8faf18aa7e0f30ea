//! # rhizome-db
//!
//! PostgreSQL persistence for the rhizome reprocessing pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for documents, chunks, annotations and
//!   connections (chunk embeddings stored with pgvector)
//! - [`MemoryStore`], an in-memory implementation of every repository trait
//! - The built-in [`ParagraphChunker`] chunking backend
//!
//! ## Example
//!
//! ```rust,ignore
//! use rhizome_db::Database;
//!
//! let db = Database::connect("postgres://localhost/rhizome").await?;
//! let chunks = db.chunks.list_current(document_id).await?;
//! ```

pub mod annotations;
pub mod chunking;
pub mod chunks;
pub mod connections;
pub mod documents;
pub mod memory;
pub mod pool;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

pub use rhizome_core::*;

pub use annotations::PgAnnotationRepository;
pub use chunking::{ChunkerConfig, ParagraphChunker};
pub use chunks::PgChunkRepository;
pub use connections::PgConnectionRepository;
pub use documents::PgDocumentRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool, PoolConfig};

/// Combined database context with all repositories.
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub documents: PgDocumentRepository,
    pub chunks: PgChunkRepository,
    pub annotations: PgAnnotationRepository,
    pub connections: PgConnectionRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            documents: PgDocumentRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            annotations: PgAnnotationRepository::new(pool.clone()),
            connections: PgConnectionRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with pool sizing from `RHIZOME_DB_*` variables.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, &PoolConfig::from_env()).await
    }

    pub async fn connect_with_config(url: &str, config: &PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

// Offsets and indices are `usize` in memory and signed integers in Postgres.

pub(crate) fn to_db_offset(n: usize) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::InvalidInput(format!("offset {} out of range", n)))
}

pub(crate) fn from_db_offset(n: i64) -> Result<usize> {
    usize::try_from(n).map_err(|_| Error::Internal(format!("stored offset {} is negative", n)))
}

pub(crate) fn to_db_index(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::InvalidInput(format!("chunk index {} out of range", n)))
}

pub(crate) fn from_db_index(n: i32) -> Result<usize> {
    usize::try_from(n).map_err(|_| Error::Internal(format!("stored chunk index {} is negative", n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_conversions() {
        assert_eq!(to_db_offset(42).unwrap(), 42);
        assert_eq!(from_db_offset(42).unwrap(), 42);
        assert!(from_db_offset(-1).is_err());
        assert!(from_db_index(-3).is_err());
        assert!(to_db_index(usize::MAX).is_err());
    }
}

//! Error types for the rhizome reprocessing pipeline.

use thiserror::Error;

/// Result type alias using rhizome's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for rhizome operations.
///
/// Per-annotation recovery failures are never errors: an annotation that
/// cannot be relocated is a `Lost` result, not an `Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    /// Annotation not found
    #[error("Annotation not found: {0}")]
    AnnotationNotFound(uuid::Uuid),

    /// A chunk batch could not be created or is malformed
    #[error("Chunk batch error: {0}")]
    ChunkBatch(String),

    /// Invalid migration state transition
    #[error("Migration error: {0}")]
    Migration(String),

    /// An external collaborator (chunker, enricher, embedder, detector) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The hosting job asked the pipeline to stop
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Whether this error must abort a reprocessing run and trigger rollback.
    ///
    /// Collaborator failures are only fatal when the orchestrator decides so
    /// (chunking is, enrichment is not), so they report `false` here.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Collaborator(_))
    }
}

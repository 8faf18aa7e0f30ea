//! # rhizome-jobs
//!
//! Reprocessing orchestration for rhizome documents.
//!
//! This crate provides:
//! - The chunk migration saga (begin, insert, promote or discard, repair)
//! - Connection remapping onto a new chunk layout
//! - [`ReprocessingOrchestrator`], which ties chunking, annotation recovery
//!   and remapping into one atomic run with progress and rollback
//! - Review queue actions and highlight import
//! - Job handlers for a hosting job system
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rhizome_db::{MemoryStore, ParagraphChunker};
//! use rhizome_jobs::{Collaborators, Repositories, ReprocessingOrchestrator};
//!
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = ReprocessingOrchestrator::new(
//!     Repositories::from_store(store),
//!     Collaborators::new(Arc::new(ParagraphChunker::new(Default::default()))),
//!     Default::default(),
//! );
//! let outcome = orchestrator.run(document_id, &edited_text).await?;
//! println!("recovery rate {:.2}", outcome.recovery.recovery_rate);
//! ```

pub mod handler;
pub mod migration;
pub mod remap;
pub mod reprocess;
pub mod review;

// Re-export core types
pub use rhizome_core::*;

pub use handler::{
    ImportHighlightsHandler, ImportHighlightsPayload, JobContext, JobHandler, JobKind,
    JobProgressCallback, JobRequest, JobResult, ReprocessHandler, ReprocessPayload,
};
pub use migration::{ChunkMigrationCoordinator, MigrationHandle, MigrationState, RepairOutcome};
pub use remap::ConnectionRemapper;
pub use reprocess::{
    CancellationFlag, Collaborators, ProgressCallback, Repositories, ReprocessingOrchestrator,
};
pub use review::{accept_suggestion, import_and_store, reject_suggestion};

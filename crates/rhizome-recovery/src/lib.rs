//! # rhizome-recovery
//!
//! Pure matching and recovery logic for the rhizome reprocessing pipeline.
//!
//! - [`similarity`]: exact, context-anchored and trigram matching of a
//!   needle inside a text window
//! - [`engine`]: layered position recovery and confidence classification
//! - [`remap`]: overlap-based mapping of old chunks onto new ones
//! - [`import`]: placing external highlights with the same engine
//!
//! Nothing here performs I/O; persistence lives in `rhizome-db` and
//! orchestration in `rhizome-jobs`.

pub mod engine;
pub mod import;
pub mod remap;
pub mod similarity;
pub mod text;

pub use engine::{apply_outcome, classify, DocumentView, RecoveryEngine};
pub use import::{
    import_highlights, HighlightInput, ImportReport, ImportResult, ImportTier, LocationHint,
};
pub use remap::{build_mapping, map_chunk, ChunkMapping};
pub use similarity::{MatchCandidate, MatchMethod, SimilarityMatcher, TextWithContext};
pub use text::CharText;

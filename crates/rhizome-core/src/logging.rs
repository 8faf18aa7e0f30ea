//! Structured logging field name constants.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation can query reprocessing runs by the same names.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run failed and was rolled back, requires attention |
//! | WARN  | Degraded sub-step, automatic fallback applied |
//! | INFO  | Stage transitions, run completion |
//! | DEBUG | Decision points (recovery layer chosen, remap verdicts) |
//! | TRACE | Per-annotation and per-window detail |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "recovery", "db", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "matcher", "engine", "coordinator", "remapper", "orchestrator"
pub const COMPONENT: &str = "component";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Document UUID being reprocessed.
pub const DOCUMENT_ID: &str = "document_id";

/// Annotation UUID being recovered.
pub const ANNOTATION_ID: &str = "annotation_id";

/// Connection UUID being remapped.
pub const CONNECTION_ID: &str = "connection_id";

/// Reprocessing batch tag.
pub const BATCH_TAG: &str = "batch_tag";

/// Orchestrator stage label.
pub const STAGE: &str = "stage";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of annotations processed.
pub const ANNOTATION_COUNT: &str = "annotation_count";

/// Recovery confidence of a single result.
pub const CONFIDENCE: &str = "confidence";

/// Share of annotations that were recovered or queued for review.
pub const RECOVERY_RATE: &str = "recovery_rate";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

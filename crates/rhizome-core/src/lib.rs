//! # rhizome-core
//!
//! Core types, traits, and abstractions for the rhizome document
//! reprocessing pipeline.
//!
//! This crate provides the data model (chunks, annotation anchors,
//! connections, recovery results), the error type, shared defaults, and the
//! repository and collaborator traits the other rhizome crates build on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{ConfigError, RecoveryConfig, RemapConfig, ReprocessConfig};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

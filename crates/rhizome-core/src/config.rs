//! Pipeline configuration.
//!
//! Configuration can be built in code, loaded from a TOML file, or read from
//! `RHIZOME_*` environment variables. Every value defaults to the matching
//! constant in [`crate::defaults`].
//!
//! # Example
//!
//! ```rust
//! use rhizome_core::config::ReprocessConfig;
//!
//! let config = ReprocessConfig::from_toml_str(
//!     r#"
//!     [recovery]
//!     context_window_chars = 4000
//!     "#,
//! )
//! .expect("valid config");
//! assert_eq!(config.recovery.context_window_chars, 4000);
//! ```

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::defaults;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for crate::Error {
    fn from(e: ConfigError) -> Self {
        crate::Error::Config(e.to_string())
    }
}

/// Tuning for the similarity matcher and recovery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Confidence at or above which a recovery is applied automatically.
    pub success_threshold: f64,
    /// Fuzzy scores below this are discarded.
    pub similarity_floor: f64,
    /// Upper bound on fuzzy confidence.
    pub trigram_max_confidence: f64,
    /// Half-width of the context-window fallback, in characters.
    pub context_window_chars: usize,
    /// Neighbour chunks searched on each side in the chunk-bounded layer.
    pub chunk_neighbor_radius: usize,
    /// Length of refreshed `before`/`after` context snippets.
    pub context_snippet_chars: usize,
    /// Skip the whole-document fuzzy layer (for very large documents).
    pub global_trigram_enabled: bool,
    /// Route every located annotation to review, even high-confidence ones.
    pub force_review: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            success_threshold: defaults::RECOVERY_SUCCESS_THRESHOLD,
            similarity_floor: defaults::SIMILARITY_FLOOR,
            trigram_max_confidence: defaults::TRIGRAM_MAX_CONFIDENCE,
            context_window_chars: defaults::CONTEXT_WINDOW_CHARS,
            chunk_neighbor_radius: defaults::CHUNK_NEIGHBOR_RADIUS,
            context_snippet_chars: defaults::CONTEXT_SNIPPET_CHARS,
            global_trigram_enabled: true,
            force_review: false,
        }
    }
}

impl RecoveryConfig {
    pub fn with_context_window(mut self, chars: usize) -> Self {
        self.context_window_chars = chars;
        self
    }

    pub fn with_force_review(mut self, force: bool) -> Self {
        self.force_review = force;
        self
    }

    pub fn with_global_trigram(mut self, enabled: bool) -> Self {
        self.global_trigram_enabled = enabled;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.success_threshold) || self.success_threshold == 0.0 {
            return Err(ConfigError::Validation(format!(
                "success_threshold must be in (0, 1], got {}",
                self.success_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.similarity_floor) {
            return Err(ConfigError::Validation(format!(
                "similarity_floor must be in [0, 1), got {}",
                self.similarity_floor
            )));
        }
        if self.trigram_max_confidence <= self.similarity_floor
            || self.trigram_max_confidence > 1.0
        {
            return Err(ConfigError::Validation(format!(
                "trigram_max_confidence must be in (similarity_floor, 1], got {}",
                self.trigram_max_confidence
            )));
        }
        Ok(())
    }
}

/// Tuning for the connection remapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemapConfig {
    /// Minimum share of the old chunk a new chunk must cover.
    pub overlap_threshold: f64,
    /// Candidates closer than this are treated as tied.
    pub ambiguity_epsilon: f64,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: defaults::CONNECTION_OVERLAP_THRESHOLD,
            ambiguity_epsilon: defaults::CONNECTION_AMBIGUITY_EPSILON,
        }
    }
}

/// Top-level configuration for a reprocessing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprocessConfig {
    pub recovery: RecoveryConfig,
    pub remap: RemapConfig,
    /// Skip connection detection entirely.
    pub skip_connection_detection: bool,
}

impl ReprocessConfig {
    /// Parse configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        debug!(path = %path.display(), "Loading reprocess config");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RHIZOME_SUCCESS_THRESHOLD` | `0.85` | Auto-apply threshold |
    /// | `RHIZOME_CONTEXT_WINDOW` | `2000` | Context-window half-width |
    /// | `RHIZOME_GLOBAL_TRIGRAM` | `true` | Enable whole-document fuzzy search |
    /// | `RHIZOME_FORCE_REVIEW` | `false` | Send every match to review |
    /// | `RHIZOME_OVERLAP_THRESHOLD` | `0.5` | Connection remap overlap threshold |
    /// | `RHIZOME_SKIP_CONNECTIONS` | `false` | Skip connection detection |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<f64>("RHIZOME_SUCCESS_THRESHOLD") {
            config.recovery.success_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("RHIZOME_CONTEXT_WINDOW") {
            config.recovery.context_window_chars = v;
        }
        if let Some(v) = env_flag("RHIZOME_GLOBAL_TRIGRAM") {
            config.recovery.global_trigram_enabled = v;
        }
        if let Some(v) = env_flag("RHIZOME_FORCE_REVIEW") {
            config.recovery.force_review = v;
        }
        if let Some(v) = env_parse::<f64>("RHIZOME_OVERLAP_THRESHOLD") {
            config.remap.overlap_threshold = v;
        }
        if let Some(v) = env_flag("RHIZOME_SKIP_CONNECTIONS") {
            config.skip_connection_detection = v;
        }

        config
    }

    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        self.recovery.validate()?;
        if !(0.0..=1.0).contains(&self.remap.overlap_threshold) {
            return Err(ConfigError::Validation(format!(
                "overlap_threshold must be in [0, 1], got {}",
                self.remap.overlap_threshold
            )));
        }
        if self.remap.ambiguity_epsilon < 0.0 {
            return Err(ConfigError::Validation(
                "ambiguity_epsilon must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v != "false" && v != "0" && !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = ReprocessConfig::default();
        assert_eq!(config.recovery.success_threshold, 0.85);
        assert_eq!(config.recovery.context_window_chars, 2000);
        assert_eq!(config.remap.overlap_threshold, 0.5);
        assert!(config.recovery.global_trigram_enabled);
        assert!(!config.recovery.force_review);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ReprocessConfig::from_toml_str(
            r#"
            skip_connection_detection = true

            [remap]
            overlap_threshold = 0.6
            "#,
        )
        .unwrap();
        assert!(config.skip_connection_detection);
        assert_eq!(config.remap.overlap_threshold, 0.6);
        assert_eq!(config.remap.ambiguity_epsilon, 0.05);
        assert_eq!(config.recovery, RecoveryConfig::default());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = ReprocessConfig::from_toml_str(
            r#"
            [recovery]
            success_threshold = 1.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_floor_above_cap_rejected() {
        let config = RecoveryConfig {
            similarity_floor: 0.9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let err = ReprocessConfig::from_toml_str("recovery = [").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ReprocessConfig::from_file(Path::new("/nonexistent/rhizome.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_)));
    }

    #[test]
    fn test_builders() {
        let config = RecoveryConfig::default()
            .with_context_window(500)
            .with_force_review(true)
            .with_global_trigram(false);
        assert_eq!(config.context_window_chars, 500);
        assert!(config.force_review);
        assert!(!config.global_trigram_enabled);
    }
}

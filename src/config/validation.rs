//! Configuration validation.
//!
//! ## Responsibility
//! Check range constraints on a parsed [`EnhanceConfig`] that serde cannot
//! express, and report non-fatal combinations as warnings.
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value

use super::EnhanceConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Source that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A field has an out-of-range value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "cache.ttl_ms").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Validate every range constraint on `config`.
///
/// # Errors
///
/// Returns every violation found, as [`ConfigError::InvalidField`]s.
pub fn validate(config: &EnhanceConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Cache ────────────────────────────────────────────────────────
    // Negative means no expiry; zero would expire every entry on write.
    if let Some(cache) = &config.cache {
        if cache.ttl_ms == 0 {
            errors.push(ConfigError::InvalidField {
                field: "cache.ttl_ms".into(),
                value: "0".into(),
                reason: "must be negative (no expiry) or a positive number of milliseconds".into(),
            });
        }
    }

    // ── Retry ────────────────────────────────────────────────────────
    if let Some(retry) = &config.retry {
        if retry.max_attempts == 0 {
            errors.push(ConfigError::InvalidField {
                field: "retry.max_attempts".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Non-fatal combinations worth reporting to the operator.
pub fn warnings(config: &EnhanceConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.single.enabled && config.debounce.time_ms >= 0 {
        warnings.push(
            "single.enabled has no effect while debounce.time_ms enables debounce".to_string(),
        );
    }

    warnings
}

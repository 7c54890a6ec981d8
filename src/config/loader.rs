//! Configuration file loading.
//!
//! Reads TOML from disk or a string, parses it into an [`EnhanceConfig`]
//! and validates it. A successfully loaded config is always valid; the
//! source name appears in every error.

use std::path::Path;

use super::validation::{self, ConfigError};
use super::EnhanceConfig;
use tracing::warn;

/// Load an [`EnhanceConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if a value is out of range.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_call_enhancer::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("enhance.toml"))?;
/// ```
pub fn load_from_file(path: &Path) -> Result<EnhanceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`EnhanceConfig`] from TOML text. `source_name` labels errors.
///
/// Non-fatal combinations are logged at `warn` level.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if a value is out of range.
pub fn load_from_str(content: &str, source_name: &str) -> Result<EnhanceConfig, ConfigError> {
    let config: EnhanceConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    for warning in validation::warnings(&config) {
        warn!(source = source_name, "{warning}");
    }

    Ok(config)
}

//! # Declarative Enhancement Configuration
//!
//! ## Responsibility
//! Parse and validate the serializable subset of [`EnhanceOptions`]
//! (cache, debounce, single-flight and a max-attempts retry) from TOML.
//! Closures (key generator, custom retry predicates, hooks) are always set
//! in code on top of the loaded options.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `EnhanceConfig`
//! - Validated: the loader rejects out-of-range values before returning
//! - Schema-exportable: [`export_schema`] emits JSON Schema for editors
//!
//! ## NOT Responsible For
//! - Running anything (that belongs to [`enhance`](crate::enhance))
//!
//! [`EnhanceOptions`]: crate::EnhanceOptions

pub mod loader;
pub mod validation;

use crate::enhanced::Scope;
use crate::options::{CacheOptions, DebounceOptions, SingleFlightOptions};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

/// Default cache TTL: entries never expire (any negative value).
fn default_ttl_ms() -> i64 {
    -1
}

/// Default cache capacity: unbounded.
fn default_capacity() -> i64 {
    -1
}

/// Default debounce delay: disabled.
fn default_time_ms() -> i64 {
    -1
}

/// Default retry budget: a single attempt.
fn default_max_attempts() -> u32 {
    1
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root of an enhancement config file.
///
/// # Example
///
/// ```toml
/// [cache]
/// ttl_ms = 1000
/// capacity = 100
///
/// [debounce]
/// time_ms = 250
/// scope = "parameters"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnhanceConfig {
    /// Result caching. Absent disables caching.
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    /// Debounce and take-latest.
    #[serde(default)]
    pub debounce: DebounceConfig,
    /// Single-flight.
    #[serde(default)]
    pub single: SingleConfig,
    /// Retry. Absent never retries.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

// ── Sections ─────────────────────────────────────────────────────────────

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Freshness window in milliseconds; negative keeps entries forever,
    /// `0` is rejected.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: i64,
    /// LRU bound; `<= 0` is unbounded.
    #[serde(default = "default_capacity")]
    pub capacity: i64,
    /// Serve hits and revalidate them in the background.
    #[serde(default)]
    pub swr: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            capacity: default_capacity(),
            swr: false,
        }
    }
}

impl CacheConfig {
    /// Runtime form of this section.
    pub fn to_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: positive_millis(self.ttl_ms),
            capacity: usize::try_from(self.capacity).ok().filter(|&c| c > 0),
            swr: self.swr,
        }
    }
}

/// `[debounce]` section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DebounceConfig {
    /// Delay in milliseconds; negative disables debounce, `0` coalesces
    /// calls issued in the same tick.
    #[serde(default = "default_time_ms")]
    pub time_ms: i64,
    /// Debounce granularity.
    #[serde(default)]
    pub scope: Scope,
    /// Settle overlapping invocations with the latest outcome.
    #[serde(default)]
    pub take_latest: bool,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            time_ms: default_time_ms(),
            scope: Scope::default(),
            take_latest: false,
        }
    }
}

impl DebounceConfig {
    /// Runtime form of this section.
    pub fn to_options(&self) -> DebounceOptions {
        DebounceOptions {
            delay: u64::try_from(self.time_ms).ok().map(Duration::from_millis),
            scope: self.scope,
            take_latest: self.take_latest,
        }
    }
}

/// `[single]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SingleConfig {
    /// Share in-flight invocations.
    #[serde(default)]
    pub enabled: bool,
    /// Sharing granularity.
    #[serde(default)]
    pub scope: Scope,
}

impl SingleConfig {
    /// Runtime form of this section.
    pub fn to_options(&self) -> SingleFlightOptions {
        SingleFlightOptions {
            enabled: self.enabled,
            scope: self.scope,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn positive_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms)
        .ok()
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
}

/// JSON Schema of [`EnhanceConfig`], pretty-printed.
///
/// # Errors
///
/// Returns a `serde_json::Error` if the schema cannot be serialized.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(EnhanceConfig);
    serde_json::to_string_pretty(&schema)
}

//! # tokio-call-enhancer
//!
//! Wraps any single-valued async producer (`params -> Result<T, E>`) with a
//! composable set of call policies, without changing how it is called:
//!
//! - time/size-bounded result caching with optional stale-while-revalidate
//! - debounce (per function or per parameter key)
//! - single-flight sharing of an in-flight call
//! - take-latest coalescing of overlapping calls
//! - predicate-driven retry
//!
//! ## Architecture
//!
//! Every call walks the same precedence order:
//! ```text
//! key → TTL sweep → cache (hit: return, SWR: return + refresh)
//!     → debounce burst | single-flight join | fresh
//!     → before_run → retry → [take-latest] → cache write
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_call_enhancer::{enhance, CacheOptions, EnhanceOptions};
//! # #[tokio::main]
//! # async fn main() {
//! let fetch_user = |id: u64| async move { Ok::<String, String>(format!("user-{id}")) };
//!
//! let users = enhance(
//!     fetch_user,
//!     EnhanceOptions::new().cache(CacheOptions {
//!         ttl: Some(Duration::from_secs(30)),
//!         capacity: Some(1000),
//!         swr: true,
//!     }),
//! );
//!
//! let user = users.call(7).await;
//! users.clear_cache_for(&7);
//! # let _ = user;
//! # }
//! ```

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod enhanced;
pub mod enhancer;
pub mod metrics;
pub mod options;
pub mod producer;

// Re-exports for convenience
pub use enhanced::{CacheStats, RetryPolicy, Scope, ScopeKey, FALLBACK_KEY};
pub use enhancer::{enhance, Enhanced};
pub use options::{CacheOptions, DebounceOptions, EnhanceOptions, SingleFlightOptions};
pub use producer::{EchoProducer, Producer};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=debug`).
///
/// # Errors
///
/// Returns [`EnhancerError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Example
///
/// ```no_run
/// # use tokio_call_enhancer::{init_tracing, EnhancerError};
/// # fn example() -> Result<(), EnhancerError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), EnhancerError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| EnhancerError::Other(format!("tracing init failed: {e}")))
}

/// Setup errors: tracing, metrics and configuration.
#[derive(Error, Debug)]
pub enum EnhancerError {
    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl From<config::validation::ConfigError> for EnhancerError {
    fn from(err: config::validation::ConfigError) -> Self {
        EnhancerError::Config(err.to_string())
    }
}

/// Why an enhanced call settled without a value.
///
/// Every waiter coalesced into one invocation (debounce burst, single-flight
/// joiners, take-latest group) receives a clone of the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError<E> {
    /// The producer failed and the retry policy declined to try again.
    #[error("producer failed: {0}")]
    Producer(E),

    /// The task owning the invocation ended before settling it (the producer
    /// panicked or the runtime shut down).
    #[error("invocation abandoned before it settled")]
    Abandoned,
}

impl<E> CallError<E> {
    /// The producer's error, if that is why the call failed.
    pub fn producer_error(&self) -> Option<&E> {
        match self {
            CallError::Producer(e) => Some(e),
            CallError::Abandoned => None,
        }
    }

    /// Consume the error, returning the producer's error if there is one.
    pub fn into_producer_error(self) -> Option<E> {
        match self {
            CallError::Producer(e) => Some(e),
            CallError::Abandoned => None,
        }
    }
}

/// Settled result of one enhanced call.
pub type Outcome<T, E> = Result<T, CallError<E>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_to_config_variant() {
        let invalid = config::loader::load_from_str("[cache]\nttl_ms = 0", "test")
            .expect_err("test: zero ttl rejected");
        let err = EnhancerError::from(invalid);
        assert!(matches!(err, EnhancerError::Config(_)));
        assert!(err.to_string().starts_with("configuration error:"));
        assert!(err.to_string().contains("cache.ttl_ms"));
    }

    #[test]
    fn test_call_error_display_wraps_producer_error() {
        let err: CallError<String> = CallError::Producer("timeout".to_string());
        assert_eq!(err.to_string(), "producer failed: timeout");
    }

    #[test]
    fn test_call_error_exposes_producer_error() {
        let err: CallError<u8> = CallError::Producer(7);
        assert_eq!(err.producer_error(), Some(&7));
        assert_eq!(err.into_producer_error(), Some(7));
        assert_eq!(CallError::<u8>::Abandoned.producer_error(), None);
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        // First call may succeed or fail depending on test execution order
        // (another test may have already installed a subscriber).
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}

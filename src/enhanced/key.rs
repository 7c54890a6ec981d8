//! Key Generation
//!
//! Derives the string key every policy indexes by from a call's parameters.
//!
//! The default strategy serializes the parameters to a JSON value and renders
//! that value. `serde_json`'s object map is ordered by key, so two parameter
//! values that are equal structurally (including maps with different
//! insertion order) render the same key.
//!
//! ## Fallback
//!
//! Parameters that cannot be serialized (for example a map whose keys are not
//! strings) do not fail the call. The generator logs a warning and returns
//! [`FALLBACK_KEY`]. Every such call then lands in the **same** cache and
//! coalescing bucket, so a producer whose parameters can fail to serialize
//! should be given a custom key generator.

use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Key used when the parameters cannot be serialized.
pub const FALLBACK_KEY: &str = "__enhance:unserializable__";

/// Pluggable key generator.
pub type KeyGenerator<P> = Arc<dyn Fn(&P) -> String + Send + Sync>;

/// Structural key for `params`, or the serialization error.
///
/// # Errors
///
/// Returns the `serde_json` error when `params` cannot be represented as JSON.
pub fn structural_key<P: Serialize + ?Sized>(params: &P) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    Ok(value.to_string())
}

/// Default key generator: [`structural_key`] with the [`FALLBACK_KEY`] recovery.
pub fn default_key<P: Serialize + ?Sized>(params: &P) -> String {
    match structural_key(params) {
        Ok(key) => key,
        Err(e) => {
            warn!(
                error = %e,
                fallback = FALLBACK_KEY,
                "key generation failed, calls share the fallback key"
            );
            FALLBACK_KEY.to_string()
        }
    }
}

/// Boxed [`default_key`] for `P`.
pub fn default_generator<P: Serialize + 'static>() -> KeyGenerator<P> {
    Arc::new(|params: &P| default_key(params))
}

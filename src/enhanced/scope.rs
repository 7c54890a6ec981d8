//! Coalescing Scope
//!
//! Debounce, single-flight and take-latest all coalesce calls either for the
//! whole function or per derived parameter key. [`Scope`] picks which, and
//! [`ScopeKey`] is the registry key it selects.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Granularity at which a coalescing policy applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One shared registry slot for every call, whatever its parameters.
    #[default]
    Function,
    /// One registry slot per derived parameter key.
    Parameters,
}

/// Registry key selected by a [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Reserved slot shared by every call under [`Scope::Function`].
    Function,
    /// Slot for one parameter key under [`Scope::Parameters`].
    Params(String),
}

impl Scope {
    /// Select the registry key for a call whose parameters derived `key`.
    pub fn scope_key(self, key: &str) -> ScopeKey {
        match self {
            Scope::Function => ScopeKey::Function,
            Scope::Parameters => ScopeKey::Params(key.to_string()),
        }
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKey::Function => f.write_str("<function>"),
            ScopeKey::Params(key) => f.write_str(key),
        }
    }
}

//! Enhancement options
//!
//! Runtime configuration of one [`Enhanced`](crate::Enhanced) producer. The
//! plain-data groups ([`CacheOptions`], [`DebounceOptions`],
//! [`SingleFlightOptions`]) can also be loaded declaratively through
//! [`config`](crate::config); the key generator, retry predicate and hooks are
//! closures and are set through the builder methods on [`EnhanceOptions`].
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use tokio_call_enhancer::{DebounceOptions, EnhanceOptions, RetryPolicy, Scope};
//!
//! let options = EnhanceOptions::<String, String, String>::new()
//!     .debounce(DebounceOptions {
//!         delay: Some(Duration::from_millis(250)),
//!         scope: Scope::Parameters,
//!         take_latest: true,
//!     })
//!     .retry(RetryPolicy::new(|_err: &String, attempt| attempt <= 2))
//!     .before_run(|query: &String| println!("searching {query}"));
//! # let _ = options;
//! ```

use crate::config::EnhanceConfig;
use crate::enhanced::key::{default_key, KeyGenerator};
use crate::enhanced::{RetryPolicy, Scope};
use crate::Outcome;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result caching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Freshness window. `None` keeps entries until evicted or cleared.
    pub ttl: Option<Duration>,
    /// LRU bound. `None` or `Some(0)` means unbounded.
    pub capacity: Option<usize>,
    /// Serve hits immediately and revalidate them in the background.
    pub swr: bool,
}

/// Debounce and take-latest coalescing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebounceOptions {
    /// Coalescing delay. `None` disables debounce.
    pub delay: Option<Duration>,
    /// Debounce granularity; also the take-latest grouping.
    pub scope: Scope,
    /// Settle overlapping invocations with the latest one's outcome.
    pub take_latest: bool,
}

impl DebounceOptions {
    /// Whether calls are debounced.
    pub fn is_enabled(&self) -> bool {
        self.delay.is_some()
    }
}

/// Sharing of an in-flight invocation. Ignored while debounce is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleFlightOptions {
    /// Whether concurrent calls share one invocation.
    pub enabled: bool,
    /// Sharing granularity.
    pub scope: Scope,
}

/// Called with the parameters right before a foreground invocation starts.
pub type BeforeRunHook<P> = Arc<dyn Fn(&P) + Send + Sync>;
/// Called with the stale value when a background revalidation starts.
pub type BackgroundStartHook<T> = Arc<dyn Fn(&T) + Send + Sync>;
/// Called with the background revalidation's outcome.
pub type BackgroundUpdateHook<T, E> = Arc<dyn Fn(&Outcome<T, E>) + Send + Sync>;

/// Notification hooks.
pub struct Hooks<P, T, E> {
    pub(crate) before_run: Option<BeforeRunHook<P>>,
    pub(crate) on_background_update_start: Option<BackgroundStartHook<T>>,
    pub(crate) on_background_update: Option<BackgroundUpdateHook<T, E>>,
}

impl<P, T, E> Default for Hooks<P, T, E> {
    fn default() -> Self {
        Self {
            before_run: None,
            on_background_update_start: None,
            on_background_update: None,
        }
    }
}

impl<P, T, E> Clone for Hooks<P, T, E> {
    fn clone(&self) -> Self {
        Self {
            before_run: self.before_run.clone(),
            on_background_update_start: self.on_background_update_start.clone(),
            on_background_update: self.on_background_update.clone(),
        }
    }
}

/// Full policy set for one enhanced producer.
pub struct EnhanceOptions<P, T, E> {
    pub(crate) cache: Option<CacheOptions>,
    pub(crate) key_generator: KeyGenerator<P>,
    pub(crate) debounce: DebounceOptions,
    pub(crate) single: SingleFlightOptions,
    pub(crate) retry: Option<RetryPolicy<E>>,
    pub(crate) hooks: Hooks<P, T, E>,
}

impl<P: Serialize + 'static, T, E> EnhanceOptions<P, T, E> {
    /// No policies, structural key generation.
    pub fn new() -> Self {
        Self::with_key_generator(|params: &P| default_key(params))
    }

    /// Options described by a loaded [`EnhanceConfig`], with structural key
    /// generation.
    pub fn from_config(config: &EnhanceConfig) -> Self {
        let mut options = Self::new()
            .debounce(config.debounce.to_options())
            .single_flight(config.single.to_options());
        if let Some(cache) = &config.cache {
            options = options.cache(cache.to_options());
        }
        if let Some(retry) = &config.retry {
            options = options.retry(RetryPolicy::max_attempts(retry.max_attempts));
        }
        options
    }
}

impl<P: Serialize + 'static, T, E> Default for EnhanceOptions<P, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, T, E> EnhanceOptions<P, T, E> {
    /// No policies, keys derived by `key_generator`. Use this when `P` is not
    /// `Serialize`.
    pub fn with_key_generator<F>(key_generator: F) -> Self
    where
        F: Fn(&P) -> String + Send + Sync + 'static,
    {
        Self {
            cache: None,
            key_generator: Arc::new(key_generator),
            debounce: DebounceOptions::default(),
            single: SingleFlightOptions::default(),
            retry: None,
            hooks: Hooks::default(),
        }
    }

    /// Enable result caching.
    pub fn cache(mut self, cache: CacheOptions) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the key generator.
    pub fn key_generator<F>(mut self, key_generator: F) -> Self
    where
        F: Fn(&P) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(key_generator);
        self
    }

    /// Configure debounce and take-latest.
    pub fn debounce(mut self, debounce: DebounceOptions) -> Self {
        self.debounce = debounce;
        self
    }

    /// Configure single-flight.
    pub fn single_flight(mut self, single: SingleFlightOptions) -> Self {
        self.single = single;
        self
    }

    /// Retry failed invocations under `policy`.
    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Hook run right before each foreground invocation.
    pub fn before_run<F>(mut self, hook: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.hooks.before_run = Some(Arc::new(hook));
        self
    }

    /// Hook run with the stale value when a background revalidation starts.
    pub fn on_background_update_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.hooks.on_background_update_start = Some(Arc::new(hook));
        self
    }

    /// Hook run with the outcome of a background revalidation.
    pub fn on_background_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Outcome<T, E>) + Send + Sync + 'static,
    {
        self.hooks.on_background_update = Some(Arc::new(hook));
        self
    }

    /// Whether single-flight is configured but shadowed by debounce.
    pub fn single_flight_shadowed(&self) -> bool {
        self.single.enabled && self.debounce.is_enabled()
    }
}

impl<P, T, E> fmt::Debug for EnhanceOptions<P, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhanceOptions")
            .field("cache", &self.cache)
            .field("debounce", &self.debounce)
            .field("single", &self.single)
            .field("retry", &self.retry.is_some())
            .field("before_run", &self.hooks.before_run.is_some())
            .field(
                "on_background_update_start",
                &self.hooks.on_background_update_start.is_some(),
            )
            .field(
                "on_background_update",
                &self.hooks.on_background_update.is_some(),
            )
            .finish_non_exhaustive()
    }
}

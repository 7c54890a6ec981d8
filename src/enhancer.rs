//! Enhanced producer
//!
//! [`enhance`] wraps a producer with the policies in an [`EnhanceOptions`]
//! and returns an [`Enhanced`] handle that is called exactly like the
//! producer. Each handle owns its registries; two handles wrapping the same
//! producer share nothing.
//!
//! ## Call precedence
//!
//! 1. Derive the key from the parameters.
//! 2. Arrange a TTL sweep (caching with a TTL only).
//! 3. Cache lookup. A fresh hit is returned as is; with SWR a background
//!    refresh is started as well.
//! 4. With debounce, join the scope's burst. Single-flight is not consulted.
//! 5. Otherwise with single-flight, join the scope's in-flight invocation.
//! 6. Otherwise start a fresh invocation.
//!
//! An invocation fires `before_run`, drives the producer through the retry
//! policy (wrapped by take-latest when enabled) and writes a success through
//! to the cache. Every invocation runs in its own task, so a caller dropping
//! its future never cancels a producer call that has started.

use crate::enhanced::take_latest::OnSettled;
use crate::enhanced::{
    run_with_retry, spawn_shared, CacheLayer, CacheStats, Debouncer, KeyGenerator, RetryPolicy,
    Scope, SingleFlight, TakeLatest,
};
use crate::options::{EnhanceOptions, Hooks};
use crate::{metrics, CallError, Outcome, Producer};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Who asked for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// A caller is waiting on it.
    Caller,
    /// Stale-while-revalidate refresh.
    Background,
}

struct Inner<P, T, E> {
    producer: Arc<dyn Producer<P, T, E>>,
    key_generator: KeyGenerator<P>,
    cache: Option<Arc<CacheLayer<T>>>,
    swr: bool,
    debouncer: Option<Arc<Debouncer<P, T, E>>>,
    debounce_scope: Scope,
    single_flight: Option<Arc<SingleFlight<T, E>>>,
    single_scope: Scope,
    take_latest: Option<Arc<TakeLatest<T, E>>>,
    retry: Option<RetryPolicy<E>>,
    hooks: Hooks<P, T, E>,
}

/// A producer wrapped with call policies.
///
/// Cloning is cheap and every clone shares the same cache and registries.
pub struct Enhanced<P, T, E> {
    inner: Arc<Inner<P, T, E>>,
}

impl<P, T, E> Clone for Enhanced<P, T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Wrap `producer` with the policies in `options`.
///
/// Single-flight configured together with debounce is accepted but has no
/// effect; a warning is logged.
pub fn enhance<Pr, P, T, E>(producer: Pr, options: EnhanceOptions<P, T, E>) -> Enhanced<P, T, E>
where
    Pr: Producer<P, T, E> + 'static,
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    if options.single_flight_shadowed() {
        warn!("single-flight is ignored while debounce is enabled");
    }

    let cache = options
        .cache
        .as_ref()
        .map(|cache| Arc::new(CacheLayer::new(cache.ttl, cache.capacity)));
    let swr = options.cache.as_ref().is_some_and(|cache| cache.swr);

    debug!(
        cache = cache.is_some(),
        swr = swr,
        debounce_ms = options.debounce.delay.map(|d| d.as_millis() as u64),
        take_latest = options.debounce.take_latest,
        single_flight = options.single.enabled,
        retry = options.retry.is_some(),
        "enhanced producer created"
    );

    Enhanced {
        inner: Arc::new(Inner {
            producer: Arc::new(producer),
            key_generator: options.key_generator,
            cache,
            swr,
            debouncer: options
                .debounce
                .delay
                .map(|delay| Arc::new(Debouncer::new(delay))),
            debounce_scope: options.debounce.scope,
            single_flight: options
                .single
                .enabled
                .then(|| Arc::new(SingleFlight::new())),
            single_scope: options.single.scope,
            take_latest: options
                .debounce
                .take_latest
                .then(|| Arc::new(TakeLatest::new())),
            retry: options.retry,
            hooks: options.hooks,
        }),
    }
}

impl<P, T, E> Enhanced<P, T, E>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Call the producer through the configured policies.
    ///
    /// # Errors
    ///
    /// [`CallError::Producer`] with the producer's last error once the retry
    /// policy gives up, or [`CallError::Abandoned`] if the invocation's task
    /// died. Every caller coalesced into one invocation gets the same error.
    pub async fn call(&self, params: P) -> Outcome<T, E> {
        let inner = &self.inner;
        let key = (inner.key_generator)(&params);

        if let Some(cache) = &inner.cache {
            cache.schedule_sweep();
            if let Some(hit) = cache.lookup(&key) {
                if inner.swr {
                    inner.revalidate(params, key, &hit);
                }
                return Ok(hit);
            }
        }

        if let Some(debouncer) = &inner.debouncer {
            let scope_key = inner.debounce_scope.scope_key(&key);
            let run = Arc::clone(inner);
            return debouncer
                .schedule(scope_key, params, key, move |params, key| {
                    run.invoke(params, key, Trigger::Caller)
                })
                .await;
        }

        if let Some(single_flight) = &inner.single_flight {
            let scope_key = inner.single_scope.scope_key(&key);
            let run = Arc::clone(inner);
            return single_flight
                .join_or_start(scope_key, move || run.invoke(params, key, Trigger::Caller))
                .await;
        }

        spawn_shared(Arc::clone(inner).invoke(params, key, Trigger::Caller)).await
    }

    /// Drop every cached entry.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
    }

    /// Drop the cached entry for exactly these parameters. Returns whether
    /// one existed.
    pub fn clear_cache_for(&self, params: &P) -> bool {
        let Some(cache) = &self.inner.cache else {
            return false;
        };
        cache.remove(&(self.inner.key_generator)(params))
    }

    /// Cache statistics, `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(|cache| cache.stats())
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner
            .cache
            .as_ref()
            .map_or(0, |cache| cache.sweep_expired())
    }

    /// Key the configured generator derives for `params`.
    pub fn key_for(&self, params: &P) -> String {
        (self.inner.key_generator)(params)
    }
}

impl<P, T, E> Inner<P, T, E>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn invoke(
        self: Arc<Self>,
        params: P,
        key: String,
        trigger: Trigger,
    ) -> BoxFuture<'static, Outcome<T, E>> {
        let Some(take_latest) = self.take_latest.clone() else {
            return async move {
                let outcome = Arc::clone(&self).attempt(params, trigger).await;
                if let Ok(value) = &outcome {
                    self.write_cache(&key, value);
                }
                outcome
            }
            .boxed();
        };

        // The group writes the cache once, under its latest call's key.
        let scope_key = self.debounce_scope.scope_key(&key);
        let writer = Arc::clone(&self);
        let on_settled: OnSettled<T, E> = Box::new(move |latest_key, outcome| {
            if let Ok(value) = outcome {
                writer.write_cache(latest_key, value);
            }
        });
        take_latest.submit(scope_key, key, self.attempt(params, trigger).boxed(), on_settled)
    }

    async fn attempt(self: Arc<Self>, params: P, trigger: Trigger) -> Outcome<T, E> {
        if trigger == Trigger::Caller {
            if let Some(hook) = &self.hooks.before_run {
                hook(&params);
            }
        }

        let started = Instant::now();
        let outcome = run_with_retry(self.producer.as_ref(), params, self.retry.as_ref())
            .await
            .map_err(CallError::Producer);

        metrics::observe_invocation(started.elapsed());
        metrics::inc_invocation(if outcome.is_ok() { "ok" } else { "err" });
        outcome
    }

    fn write_cache(&self, key: &str, value: &T) {
        if let Some(cache) = &self.cache {
            cache.write(key, value.clone());
        }
    }

    /// Refresh a stale hit without holding up the caller that got it.
    fn revalidate(self: &Arc<Self>, params: P, key: String, stale: &T) {
        if let Some(hook) = &self.hooks.on_background_update_start {
            hook(stale);
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            debug!(key = %key, "swr: background refresh started");
            let outcome = Arc::clone(&inner)
                .invoke(params, key.clone(), Trigger::Background)
                .await;

            if outcome.is_ok() {
                metrics::inc_background_refresh("ok");
                debug!(key = %key, "swr: cache refreshed");
            } else {
                metrics::inc_background_refresh("err");
                warn!(key = %key, "swr: background refresh failed, keeping stale entry");
            }

            if let Some(hook) = &inner.hooks.on_background_update {
                hook(&outcome);
            }
        });
    }
}

impl<P, T, E> fmt::Debug for Enhanced<P, T, E>
where
    P: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("Enhanced")
            .field("cache", &inner.cache.as_ref().map(|cache| cache.len()))
            .field("swr", &inner.swr)
            .field("debounce", &inner.debouncer.as_ref().map(|d| d.delay()))
            .field("single_flight", &inner.single_flight.is_some())
            .field("take_latest", &inner.take_latest.is_some())
            .field("retry", &inner.retry.is_some())
            .finish()
    }
}

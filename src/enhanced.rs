//! Enhancement Policies
//!
//! Provides the building blocks the [`Enhanced`](crate::Enhanced) proxy
//! composes: key generation, LRU and TTL caching, debounce, single-flight,
//! take-latest coalescing and retry.

pub mod cache;
pub mod debounce;
pub mod key;
pub mod lru;
pub mod retry;
pub mod scope;
pub mod single_flight;
pub mod take_latest;

// Re-exports
pub use cache::{CacheEntry, CacheLayer, CacheStats};
pub use debounce::Debouncer;
pub use key::{default_key, KeyGenerator, FALLBACK_KEY};
pub use lru::LruCache;
pub use retry::{run_with_retry, RetryPolicy};
pub use scope::{Scope, ScopeKey};
pub use single_flight::SingleFlight;
pub use take_latest::TakeLatest;

use crate::{CallError, Outcome};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::warn;

/// Outcome of a spawned invocation that any number of waiters can await.
pub type SharedOutcome<T, E> = Shared<BoxFuture<'static, Outcome<T, E>>>;

/// Run `invocation` in its own task and share its outcome.
///
/// The invocation runs to completion even if every waiter goes away.
pub(crate) fn spawn_shared<T, E>(
    invocation: BoxFuture<'static, Outcome<T, E>>,
) -> SharedOutcome<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let handle = tokio::spawn(invocation);
    async move {
        handle.await.unwrap_or_else(|e| {
            warn!(error = %e, "invocation task ended without settling");
            Err(CallError::Abandoned)
        })
    }
    .boxed()
    .shared()
}

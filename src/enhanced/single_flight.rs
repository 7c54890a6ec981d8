//! Single-Flight
//!
//! While one invocation for a scope key is in flight, later calls for the
//! same key await that invocation instead of starting another. The slot is
//! released when the invocation settles, whatever the outcome, so the next
//! call after settlement starts fresh.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use tokio_call_enhancer::enhanced::{ScopeKey, SingleFlight};
//! # #[tokio::main]
//! # async fn main() {
//! let flights = Arc::new(SingleFlight::<String, String>::new());
//!
//! let first = flights.join_or_start(ScopeKey::Function, || {
//!     async { Ok("value".to_string()) }.boxed()
//! });
//! let second = flights.join_or_start(ScopeKey::Function, || {
//!     async { Ok("unused".to_string()) }.boxed()
//! });
//! assert_eq!(first.await, second.await);
//! # }
//! ```

use super::{spawn_shared, ScopeKey, SharedOutcome};
use crate::{metrics, Outcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct InFlight<T, E> {
    id: u64,
    outcome: SharedOutcome<T, E>,
}

/// Registry of in-flight invocations, at most one per scope key.
pub struct SingleFlight<T, E> {
    in_flight: DashMap<ScopeKey, InFlight<T, E>>,
    next_id: AtomicU64,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Await the in-flight invocation for `scope_key`, or start one with `start`.
    ///
    /// `start` is only called when no invocation is in flight. The started
    /// invocation runs in its own task and frees the slot once it settles.
    pub fn join_or_start<F>(self: &Arc<Self>, scope_key: ScopeKey, start: F) -> SharedOutcome<T, E>
    where
        F: FnOnce() -> BoxFuture<'static, Outcome<T, E>>,
    {
        match self.in_flight.entry(scope_key) {
            Entry::Occupied(occupied) => {
                debug!(scope = %occupied.key(), "single-flight: joining in-flight invocation");
                metrics::inc_coalesced("single_flight");
                occupied.get().outcome.clone()
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let scope_key = vacant.key().clone();
                let registry = Arc::clone(self);
                let invocation = start();

                // The slot is inserted before this shard lock is released, so
                // the release below can never run ahead of the insert.
                let outcome = spawn_shared(Box::pin(async move {
                    let outcome = invocation.await;
                    registry.release(&scope_key, id);
                    outcome
                }));

                debug!(scope = %vacant.key(), id = id, "single-flight: started invocation");
                vacant.insert(InFlight {
                    id,
                    outcome: outcome.clone(),
                });
                outcome
            }
        }
    }

    /// Whether an invocation is in flight for `scope_key`.
    pub fn is_in_flight(&self, scope_key: &ScopeKey) -> bool {
        self.in_flight.contains_key(scope_key)
    }

    /// Number of in-flight invocations.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    fn release(&self, scope_key: &ScopeKey, id: u64) {
        if self
            .in_flight
            .remove_if(scope_key, |_, flight| flight.id == id)
            .is_some()
        {
            debug!(scope = %scope_key, id = id, "single-flight: released");
        }
    }
}

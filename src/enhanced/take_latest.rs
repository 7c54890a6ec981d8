//! Take-Latest
//!
//! Forces every caller in a group of overlapping invocations to settle with
//! the outcome of the most recently issued one.
//!
//! Each submitted invocation is appended to its scope's queue. The first
//! submission of a group spawns a drainer that waits for every queued
//! invocation, then re-checks the queue: if it grew in the meantime it waits
//! for the newcomers too. Only a pass that ends with no growth settles the
//! group, delivering the outcome of the last-appended invocation to every
//! waiter and emptying the queue. Completion order does not matter; an early
//! call finishing after a later one is still overridden.

use super::{spawn_shared, ScopeKey, SharedOutcome};
use crate::{metrics, CallError, Outcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Callback run once per group with the latest invocation's key and outcome,
/// before the waiters are released.
pub type OnSettled<T, E> = Box<dyn FnOnce(&str, &Outcome<T, E>) + Send>;

struct LatestQueue<T, E> {
    id: u64,
    invocations: Vec<(String, SharedOutcome<T, E>)>,
    waiters: Vec<oneshot::Sender<Outcome<T, E>>>,
}

/// Per-scope take-latest queues.
pub struct TakeLatest<T, E> {
    queues: DashMap<ScopeKey, LatestQueue<T, E>>,
    next_id: AtomicU64,
}

impl<T, E> Default for TakeLatest<T, E> {
    fn default() -> Self {
        Self {
            queues: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T, E> TakeLatest<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `invocation` and append it to the queue for `scope_key`.
    ///
    /// `key` is the invocation's parameter key, reported to `on_settled`
    /// when this invocation turns out to be the group's latest. `on_settled`
    /// is only kept from the submission that opens a group.
    pub fn submit(
        self: &Arc<Self>,
        scope_key: ScopeKey,
        key: String,
        invocation: BoxFuture<'static, Outcome<T, E>>,
        on_settled: OnSettled<T, E>,
    ) -> BoxFuture<'static, Outcome<T, E>> {
        let (tx, rx) = oneshot::channel();
        let shared = spawn_shared(invocation);

        match self.queues.entry(scope_key.clone()) {
            Entry::Occupied(mut occupied) => {
                let queue = occupied.get_mut();
                queue.invocations.push((key, shared));
                queue.waiters.push(tx);
                debug!(
                    scope = %occupied.key(),
                    queued = occupied.get().invocations.len(),
                    "take-latest: joined overlapping group"
                );
                metrics::inc_coalesced("take_latest");
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(LatestQueue {
                    id,
                    invocations: vec![(key, shared)],
                    waiters: vec![tx],
                });
                // Spawned while the shard is locked: the drainer's first
                // snapshot always sees the queue it was started for.
                tokio::spawn(Arc::clone(self).drain(scope_key, id, on_settled));
            }
        }

        Box::pin(async move { rx.await.unwrap_or(Err(CallError::Abandoned)) })
    }

    /// Number of invocations queued for `scope_key`.
    pub fn queued(&self, scope_key: &ScopeKey) -> usize {
        self.queues
            .get(scope_key)
            .map_or(0, |queue| queue.invocations.len())
    }

    async fn drain(self: Arc<Self>, scope_key: ScopeKey, id: u64, on_settled: OnSettled<T, E>) {
        let mut awaited = 0;
        let mut latest: Option<(String, Outcome<T, E>)> = None;

        let queue = loop {
            let pending: Vec<(String, SharedOutcome<T, E>)> = match self.queues.get(&scope_key) {
                Some(queue) if queue.id == id => queue.invocations[awaited..].to_vec(),
                _ => {
                    warn!(scope = %scope_key, "take-latest: queue vanished before settling");
                    return;
                }
            };

            if pending.is_empty() {
                // No growth since the last pass: settle, unless something was
                // appended between the snapshot and this removal.
                match self.queues.remove_if(&scope_key, |_, queue| {
                    queue.id == id && queue.invocations.len() == awaited
                }) {
                    Some((_, queue)) => break queue,
                    None => continue,
                }
            }

            let outcomes = join_all(pending.iter().map(|(_, shared)| shared.clone())).await;
            awaited += pending.len();
            if let (Some((key, _)), Some(outcome)) = (pending.last(), outcomes.into_iter().last()) {
                latest = Some((key.clone(), outcome));
            }
            debug!(scope = %scope_key, awaited = awaited, "take-latest: pass complete");
        };

        let (key, outcome) = latest.unwrap_or_else(|| (String::new(), Err(CallError::Abandoned)));
        on_settled(&key, &outcome);

        debug!(
            scope = %scope_key,
            waiters = queue.waiters.len(),
            ok = outcome.is_ok(),
            "take-latest: group settled with latest outcome"
        );
        for waiter in queue.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

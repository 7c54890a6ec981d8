//! Debounce
//!
//! Coalesces a burst of calls for one scope key into a single delayed
//! invocation. Each call joins the burst's waiter list and restarts the
//! burst timer; when the timer finally fires, the invocation runs exactly
//! once with the parameters of the **last** call, and its outcome is fanned
//! out to every waiter of the burst. A call arriving after the timer fired
//! starts a new burst.
//!
//! Restarting cancels the previous timer task. A stale timer that already
//! woke up is ignored through its burst generation, so a burst can only be
//! fired by its newest timer.

use super::ScopeKey;
use crate::{metrics, CallError, Outcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

struct PendingBurst<P, T, E> {
    generation: u64,
    params: P,
    key: String,
    timer: JoinHandle<()>,
    waiters: Vec<oneshot::Sender<Outcome<T, E>>>,
}

/// Per-scope debounce timers and their waiters.
pub struct Debouncer<P, T, E> {
    delay: Duration,
    bursts: DashMap<ScopeKey, PendingBurst<P, T, E>>,
    next_generation: AtomicU64,
}

impl<P, T, E> Debouncer<P, T, E>
where
    P: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a debouncer firing `delay` after the last call of a burst.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            bursts: DashMap::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Join (or open) the burst for `scope_key` and restart its timer.
    ///
    /// `run` is handed the last call's parameters and key when the timer
    /// fires. The returned future resolves with the burst's shared outcome.
    pub fn schedule<F>(
        self: &Arc<Self>,
        scope_key: ScopeKey,
        params: P,
        key: String,
        run: F,
    ) -> BoxFuture<'static, Outcome<T, E>>
    where
        F: FnOnce(P, String) -> BoxFuture<'static, Outcome<T, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.bursts.entry(scope_key.clone()) {
            Entry::Occupied(mut occupied) => {
                let burst = occupied.get_mut();
                burst.timer.abort();
                burst.generation = generation;
                burst.params = params;
                burst.key = key;
                burst.waiters.push(tx);
                burst.timer = self.start_timer(scope_key, generation, run);
                debug!(
                    scope = %occupied.key(),
                    waiters = occupied.get().waiters.len(),
                    "debounce: timer restarted"
                );
                metrics::inc_coalesced("debounce");
            }
            Entry::Vacant(vacant) => {
                let timer = self.start_timer(scope_key, generation, run);
                debug!(
                    scope = %vacant.key(),
                    delay_ms = self.delay.as_millis() as u64,
                    "debounce: burst opened"
                );
                vacant.insert(PendingBurst {
                    generation,
                    params,
                    key,
                    timer,
                    waiters: vec![tx],
                });
            }
        }

        Box::pin(async move { rx.await.unwrap_or(Err(CallError::Abandoned)) })
    }

    /// Number of bursts waiting for their timer.
    pub fn pending(&self) -> usize {
        self.bursts.len()
    }

    fn start_timer<F>(
        self: &Arc<Self>,
        scope_key: ScopeKey,
        generation: u64,
        run: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(P, String) -> BoxFuture<'static, Outcome<T, E>> + Send + 'static,
    {
        let debouncer = Arc::clone(self);
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debouncer.fire(scope_key, generation, run).await;
        })
    }

    async fn fire<F>(&self, scope_key: ScopeKey, generation: u64, run: F)
    where
        F: FnOnce(P, String) -> BoxFuture<'static, Outcome<T, E>>,
    {
        // Once removed, nothing holds this task's handle, so the invocation
        // below can no longer be cancelled by a restart.
        let Some((_, burst)) = self
            .bursts
            .remove_if(&scope_key, |_, burst| burst.generation == generation)
        else {
            return;
        };

        debug!(
            scope = %scope_key,
            waiters = burst.waiters.len(),
            "debounce: timer fired"
        );

        let outcome = run(burst.params, burst.key).await;
        for waiter in burst.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

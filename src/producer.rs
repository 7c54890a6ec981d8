//! Producer abstraction
//!
//! A producer is the single-valued async operation being enhanced:
//! `params -> Result<T, E>`. Any `Fn(P) -> impl Future<Output = Result<T, E>>`
//! closure is a producer; types with state can implement [`Producer`]
//! directly.
//!
//! Producers are assumed, not required, to be idempotent: retry, take-latest
//! and SWR revalidation may invoke them more often than callers do.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// An async operation producing one value per call.
///
/// Implementations must be thread-safe (Send + Sync): invocations run in
/// spawned Tokio tasks.
#[async_trait]
pub trait Producer<P, T, E>: Send + Sync {
    /// Produce a result for `params`.
    async fn produce(&self, params: P) -> Result<T, E>;
}

#[async_trait]
impl<F, Fut, P, T, E> Producer<P, T, E> for F
where
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    P: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn produce(&self, params: P) -> Result<T, E> {
        (self)(params).await
    }
}

/// Echo producer for demos and tests: returns its input after a delay.
#[derive(Debug, Clone)]
pub struct EchoProducer {
    delay: Duration,
}

impl EchoProducer {
    /// Create an echo producer with no delay.
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    /// Create an echo producer that sleeps `delay_ms` before answering.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
        }
    }
}

impl Default for EchoProducer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Producer<String, String, String> for EchoProducer {
    async fn produce(&self, params: String) -> Result<String, String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("echo: {params}"))
    }
}

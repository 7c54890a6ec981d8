//! Prometheus metrics for enhanced producers.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. Until then every helper is
//! a no-op, so enhanced producers work the same with or without metrics.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `enhance_cache_lookups_total` | Counter | `result` (`hit`, `miss`) |
//! | `enhance_invocations_total` | Counter | `outcome` (`ok`, `err`) |
//! | `enhance_invocation_duration_seconds` | Histogram | |
//! | `enhance_retries_total` | Counter | |
//! | `enhance_coalesced_calls_total` | Counter | `policy` |
//! | `enhance_background_refreshes_total` | Counter | `outcome` |

use crate::EnhancerError;
use prometheus::{
    core::Collector, CounterVec, Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// Every metric owned by this crate, initialised together.
pub struct Metrics {
    /// Private registry holding the descriptors below.
    pub registry: Registry,
    /// Cache lookups by result.
    pub cache_lookups: CounterVec,
    /// Producer invocations by outcome (after retries).
    pub invocations: CounterVec,
    /// Wall time of one invocation including retries.
    pub invocation_duration: Histogram,
    /// Re-invocations granted by a retry policy.
    pub retries: IntCounter,
    /// Calls that joined an existing invocation, by policy.
    pub coalesced: CounterVec,
    /// Stale-while-revalidate refreshes by outcome.
    pub background_refreshes: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> EnhancerError {
    EnhancerError::Other(format!("metrics init failed: {e}"))
}

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C, EnhancerError> {
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| EnhancerError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

impl Metrics {
    fn build(prefix: &str) -> Result<Self, EnhancerError> {
        let registry = Registry::new();
        let name = |suffix: &str| format!("{prefix}_{suffix}");

        let cache_lookups = register(
            &registry,
            CounterVec::new(
                Opts::new(name("cache_lookups_total"), "Cache lookups by result"),
                &["result"],
            )
            .map_err(init_err)?,
        )?;
        let invocations = register(
            &registry,
            CounterVec::new(
                Opts::new(name("invocations_total"), "Producer invocations by final outcome"),
                &["outcome"],
            )
            .map_err(init_err)?,
        )?;
        let invocation_duration = register(
            &registry,
            Histogram::with_opts(HistogramOpts::new(
                name("invocation_duration_seconds"),
                "Invocation duration including retries",
            ))
            .map_err(init_err)?,
        )?;
        let retries = register(
            &registry,
            IntCounter::new(name("retries_total"), "Re-invocations granted by the retry policy")
                .map_err(init_err)?,
        )?;
        let coalesced = register(
            &registry,
            CounterVec::new(
                Opts::new(name("coalesced_calls_total"), "Calls that joined another invocation"),
                &["policy"],
            )
            .map_err(init_err)?,
        )?;
        let background_refreshes = register(
            &registry,
            CounterVec::new(
                Opts::new(name("background_refreshes_total"), "Stale-while-revalidate refreshes"),
                &["outcome"],
            )
            .map_err(init_err)?,
        )?;

        Ok(Self {
            registry,
            cache_lookups,
            invocations,
            invocation_duration,
            retries,
            coalesced,
            background_refreshes,
        })
    }
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all metrics in a private registry.
///
/// Calling it a second time is a no-op returning `Ok(())`.
///
/// # Errors
///
/// Returns [`EnhancerError::Other`] if a descriptor cannot be built or
/// registered.
pub fn init_metrics() -> Result<(), EnhancerError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    // A racing initialiser builds identical descriptors; either one may win.
    let _ = METRICS.set(Metrics::build("enhance")?);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn inc_labelled(vec: impl Fn(&Metrics) -> &CounterVec, label: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = vec(m).get_metric_with_label_values(&[label]) {
            c.inc();
        }
    }
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count a cache lookup; `result` is `"hit"` or `"miss"`.
pub fn inc_cache_lookup(result: &str) {
    inc_labelled(|m| &m.cache_lookups, result);
}

/// Count a settled invocation; `outcome` is `"ok"` or `"err"`.
pub fn inc_invocation(outcome: &str) {
    inc_labelled(|m| &m.invocations, outcome);
}

/// Record how long an invocation took, retries included.
pub fn observe_invocation(d: Duration) {
    if let Some(m) = metrics() {
        m.invocation_duration.observe(d.as_secs_f64());
    }
}

/// Count one retry.
pub fn inc_retry() {
    if let Some(m) = metrics() {
        m.retries.inc();
    }
}

/// Count a call that joined another invocation under `policy`
/// (`"debounce"`, `"single_flight"` or `"take_latest"`).
pub fn inc_coalesced(policy: &str) {
    inc_labelled(|m| &m.coalesced, policy);
}

/// Count a finished background refresh; `outcome` is `"ok"` or `"err"`.
pub fn inc_background_refresh(outcome: &str) {
    inc_labelled(|m| &m.background_refreshes, outcome);
}

/// Gather all registered metric families.
///
/// Empty if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text format.
///
/// Returns an empty string if metrics have not been initialised or encoding
/// fails.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Snapshot of the counters, keyed by label value.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Cache lookups by `result`.
    pub cache_lookups: HashMap<String, u64>,
    /// Invocations by `outcome`.
    pub invocations: HashMap<String, u64>,
    /// Total retries.
    pub retries: u64,
    /// Coalesced calls by `policy`.
    pub coalesced: HashMap<String, u64>,
    /// Background refreshes by `outcome`.
    pub background_refreshes: HashMap<String, u64>,
}

fn by_label(vec: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut values = HashMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let value = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            values.insert(value.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    values
}

fn summarize(m: &Metrics) -> MetricsSummary {
    MetricsSummary {
        cache_lookups: by_label(&m.cache_lookups, "result"),
        invocations: by_label(&m.invocations, "outcome"),
        retries: m.retries.get(),
        coalesced: by_label(&m.coalesced, "policy"),
        background_refreshes: by_label(&m.background_refreshes, "outcome"),
    }
}

/// Current counter values. Zeroed if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map_or_else(MetricsSummary::default, summarize)
}

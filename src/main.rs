//! Demo binary for tokio-call-enhancer
//!
//! Wraps a slow echo producer and drives it through caching, debounce and
//! take-latest, then prints the collected metrics.
//!
//! ```text
//! cargo run -- [enhance.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output
//! - `RUST_LOG=debug` — log level filter

use std::path::Path;
use std::time::Duration;
use tokio_call_enhancer::config::loader::load_from_file;
use tokio_call_enhancer::{
    enhance, init_tracing, metrics, CacheOptions, DebounceOptions, EchoProducer, EnhanceOptions,
    EnhancerError, RetryPolicy, Scope,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    // ── Cache ────────────────────────────────────────────────────────
    let options = match std::env::args().nth(1) {
        Some(path) => {
            let config = load_from_file(Path::new(&path)).map_err(EnhancerError::from)?;
            info!(path = %path, "loaded enhancement config");
            EnhanceOptions::from_config(&config)
        }
        None => EnhanceOptions::new().cache(CacheOptions {
            ttl: Some(Duration::from_secs(5)),
            capacity: Some(100),
            swr: false,
        }),
    };
    let lookup = enhance(EchoProducer::with_delay(50), options);

    for query in ["france", "germany", "france"] {
        let answer = lookup.call(query.to_string()).await?;
        info!(query = query, answer = %answer, "lookup");
    }
    if let Some(stats) = lookup.cache_stats() {
        info!(hits = stats.hits, misses = stats.misses, hit_rate = stats.hit_rate(), "cache stats");
    }

    // ── Debounce ─────────────────────────────────────────────────────
    let search = enhance(
        EchoProducer::with_delay(20),
        EnhanceOptions::new()
            .debounce(DebounceOptions {
                delay: Some(Duration::from_millis(100)),
                scope: Scope::Function,
                take_latest: false,
            })
            .before_run(|query: &String| info!(query = %query, "search fired")),
    );

    let mut typing = Vec::new();
    for prefix in ["r", "ru", "rus", "rust"] {
        let search = search.clone();
        typing.push(tokio::spawn(async move { search.call(prefix.to_string()).await }));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    for keystroke in typing {
        let result = keystroke.await?;
        info!(result = ?result, "debounced keystroke settled");
    }

    // ── Take-latest ──────────────────────────────────────────────────
    let latest = enhance(
        |page: u32| async move {
            // Earlier pages are slower, so they finish last.
            tokio::time::sleep(Duration::from_millis(u64::from(50 * (4 - page.min(3))))).await;
            Ok::<String, String>(format!("page {page}"))
        },
        EnhanceOptions::new()
            .debounce(DebounceOptions {
                take_latest: true,
                ..DebounceOptions::default()
            })
            .retry(RetryPolicy::max_attempts(2)),
    );

    let pages = futures::future::join_all((1..=3).map(|page| latest.call(page))).await;
    info!(pages = ?pages, "every overlapping caller sees the latest page");

    println!("{}", metrics::gather_metrics());
    Ok(())
}

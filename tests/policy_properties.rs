//! End-to-end policy properties of enhanced producers
//!
//! Each test drives an `Enhanced` handle through the public API with the
//! Tokio clock paused, counting producer invocations.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{advance, sleep, Instant};
use tokio_call_enhancer::{
    enhance, CacheOptions, CallError, DebounceOptions, EnhanceOptions, Outcome, RetryPolicy, Scope,
    SingleFlightOptions,
};

// ── Helpers ──────────────────────────────────────────────────────────

type BoxedProducer = Box<dyn Fn(u32) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// Producer returning `"{n}#{invocation}"` after `delay_ms`.
fn numbered(calls: Arc<AtomicUsize>, delay_ms: u64) -> BoxedProducer {
    Box::new(move |n| {
        let invocation = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            sleep(Duration::from_millis(delay_ms)).await;
            Ok(format!("{n}#{invocation}"))
        }
        .boxed()
    })
}

fn cached(ttl_ms: Option<u64>, capacity: Option<usize>) -> CacheOptions {
    CacheOptions {
        ttl: ttl_ms.map(Duration::from_millis),
        capacity,
        swr: false,
    }
}

// ── TTL ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_ttl_serves_cached_value_until_expiry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls.clone(), 0),
        EnhanceOptions::new().cache(cached(Some(1000), None)),
    );

    let first = producer.call(1).await;
    advance(Duration::from_millis(500)).await;
    let second = producer.call(1).await;
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    advance(Duration::from_millis(1000)).await;
    assert_eq!(producer.call(1).await, Ok("1#2".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_sweep_runs_in_background() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls, 0),
        EnhanceOptions::new().cache(cached(Some(100), None)),
    );

    producer.call(1).await.expect("test: ok");
    producer.call(2).await.expect("test: ok");
    sleep(Duration::from_millis(250)).await;

    let stats = producer.cache_stats().expect("test: caching enabled");
    assert_eq!(stats.entries, 0, "expired entries swept without a lookup");
}

// ── LRU ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_lru_capacity_evicts_least_recent() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls.clone(), 0),
        EnhanceOptions::new().cache(cached(None, Some(2))),
    );

    producer.call(1).await.expect("test: A");
    producer.call(2).await.expect("test: B");
    producer.call(3).await.expect("test: C");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(producer.call(1).await, Ok("1#4".to_string()), "A was evicted");
    assert_eq!(producer.call(3).await, Ok("3#3".to_string()), "C is still cached");
}

// ── Single-flight ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_single_flight_function_scope_shares_one_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls.clone(), 100),
        EnhanceOptions::new().single_flight(SingleFlightOptions {
            enabled: true,
            scope: Scope::Function,
        }),
    );

    let outcomes = join_all((0..5).map(|n| producer.call(n))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcomes.iter().all(|o| o == &Ok("0#1".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_parameter_scope_one_invocation_per_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls.clone(), 100),
        EnhanceOptions::new().single_flight(SingleFlightOptions {
            enabled: true,
            scope: Scope::Parameters,
        }),
    );

    let outcomes = join_all([1, 2, 1, 2, 1].map(|n| producer.call(n))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcomes[0], outcomes[2]);
    assert_eq!(outcomes[1], outcomes[3]);
    assert_ne!(outcomes[0], outcomes[1]);
}

// ── Debounce ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_debounce_function_scope_fires_once_after_burst() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fired_at = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorder = fired_at.clone();
    let producer = enhance(
        numbered(calls.clone(), 0),
        EnhanceOptions::new()
            .debounce(DebounceOptions {
                delay: Some(Duration::from_millis(100)),
                scope: Scope::Function,
                take_latest: false,
            })
            .before_run(move |n: &u32| recorder.lock().push((*n, Instant::now()))),
    );
    let start = Instant::now();

    let mut waiters = Vec::new();
    for (n, at) in [(1u32, 0u64), (2, 50), (3, 80)] {
        sleep(Duration::from_millis(at) - start.elapsed()).await;
        let producer = producer.clone();
        waiters.push(tokio::spawn(async move { producer.call(n).await }));
    }

    for waiter in waiters {
        assert_eq!(waiter.await.expect("test: join"), Ok("3#1".to_string()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let fired_at = fired_at.lock();
    assert_eq!(fired_at.len(), 1);
    let elapsed = fired_at[0].1 - start;
    assert!(
        elapsed >= Duration::from_millis(180) && elapsed < Duration::from_millis(190),
        "fired after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_debounce_parameter_scope_keeps_keys_apart() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls.clone(), 0),
        EnhanceOptions::new().debounce(DebounceOptions {
            delay: Some(Duration::from_millis(50)),
            scope: Scope::Parameters,
            take_latest: false,
        }),
    );

    let outcomes = join_all([1, 2, 1, 2].map(|n| producer.call(n))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(outcomes[0].as_ref().is_ok_and(|v| v.starts_with("1#")));
    assert!(outcomes[1].as_ref().is_ok_and(|v| v.starts_with("2#")));
    assert_eq!(outcomes[0], outcomes[2]);
    assert_eq!(outcomes[1], outcomes[3]);
}

// ── Take-latest ──────────────────────────────────────────────────────

/// Producer where call `n` finishes after `delays[n]` ms.
fn staggered(delays: HashMap<u32, u64>) -> BoxedProducer {
    let delays = Arc::new(delays);
    Box::new(move |n| {
        let delay = delays.get(&n).copied().unwrap_or(0);
        async move {
            sleep(Duration::from_millis(delay)).await;
            Ok(format!("call {n}"))
        }
        .boxed()
    })
}

fn take_latest() -> DebounceOptions {
    DebounceOptions {
        delay: None,
        scope: Scope::Function,
        take_latest: true,
    }
}

#[tokio::test(start_paused = true)]
async fn test_take_latest_all_callers_get_last_issued_outcome() {
    let delays = HashMap::from([(1, 400), (2, 100), (3, 300), (4, 200)]);
    let producer = enhance(staggered(delays), EnhanceOptions::new().debounce(take_latest()));

    let outcomes = join_all((1..=4).map(|n| producer.call(n))).await;

    for outcome in outcomes {
        assert_eq!(outcome, Ok("call 4".to_string()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_take_latest_fifth_call_before_settle_wins() {
    let delays = HashMap::from([(1, 400), (2, 100), (3, 300), (4, 200), (5, 500)]);
    let producer = enhance(staggered(delays), EnhanceOptions::new().debounce(take_latest()));

    let mut waiters: Vec<_> = (1..=4)
        .map(|n| {
            let producer = producer.clone();
            tokio::spawn(async move { producer.call(n).await })
        })
        .collect();
    sleep(Duration::from_millis(250)).await;
    let producer_5 = producer.clone();
    waiters.push(tokio::spawn(async move { producer_5.call(5).await }));

    for waiter in waiters {
        assert_eq!(waiter.await.expect("test: join"), Ok("call 5".to_string()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_take_latest_caches_latest_outcome_under_latest_key() {
    let delays = HashMap::from([(1, 200), (2, 50)]);
    let producer = enhance(
        staggered(delays),
        EnhanceOptions::new()
            .cache(cached(None, None))
            .debounce(take_latest()),
    );

    join_all([1, 2].map(|n| producer.call(n))).await;

    let stats = producer.cache_stats().expect("test: caching enabled");
    assert_eq!(stats.entries, 1, "one write per group");
    assert!(producer.clear_cache_for(&2));
}

// ── Retry ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_retry_until_predicate_declines() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let producer = enhance(
        move |n: u32| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt <= 3 {
                    Err(format!("attempt {attempt} failed"))
                } else {
                    Ok(n)
                }
            }
        },
        EnhanceOptions::new().retry(RetryPolicy::new(|_err: &String, attempt| attempt <= 3)),
    );

    assert_eq!(producer.call(42).await, Ok(42));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausted_error_reaches_every_debounced_waiter() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let producer = enhance(
        move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, String>("down".to_string()) }
        },
        EnhanceOptions::new()
            .retry(RetryPolicy::max_attempts(2))
            .debounce(DebounceOptions {
                delay: Some(Duration::from_millis(10)),
                ..DebounceOptions::default()
            }),
    );

    let outcomes = join_all((0..3).map(|n| producer.call(n))).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    for outcome in outcomes {
        assert_eq!(outcome, Err(CallError::Producer("down".to_string())));
    }
}

// ── clear_cache ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_clear_cache_for_and_clear_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls.clone(), 0),
        EnhanceOptions::new().cache(cached(None, None)),
    );

    producer.call(1).await.expect("test: ok");
    producer.call(2).await.expect("test: ok");

    producer.clear_cache_for(&1);
    assert_eq!(producer.call(1).await, Ok("1#3".to_string()));
    assert_eq!(producer.call(2).await, Ok("2#2".to_string()), "other keys untouched");

    producer.clear_cache();
    assert_eq!(producer.call(2).await, Ok("2#4".to_string()));
}

// ── SWR ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_swr_returns_stale_then_refreshes_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let finished = Arc::new(parking_lot::Mutex::new(Vec::<Outcome<String, String>>::new()));
    let (on_start, on_done) = (started.clone(), finished.clone());
    let producer = enhance(
        numbered(calls.clone(), 100),
        EnhanceOptions::new()
            .cache(CacheOptions {
                swr: true,
                ..CacheOptions::default()
            })
            .on_background_update_start(move |stale: &String| on_start.lock().push(stale.clone()))
            .on_background_update(move |outcome: &Outcome<String, String>| {
                on_done.lock().push(outcome.clone())
            }),
    );

    assert_eq!(producer.call(7).await, Ok("7#1".to_string()));

    let hit_at = Instant::now();
    let stale = producer.call(7).await;
    assert_eq!(hit_at.elapsed(), Duration::ZERO, "hit must not wait on the producer");
    assert_eq!(stale, Ok("7#1".to_string()));
    assert_eq!(*started.lock(), vec!["7#1".to_string()]);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(*finished.lock(), vec![Ok("7#2".to_string())]);
    assert_eq!(stale, Ok("7#1".to_string()), "delivered value is untouched");

    // The refresh replaced the entry; this hit serves it and refreshes again.
    assert_eq!(producer.call(7).await, Ok("7#2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_swr_failure_keeps_stale_entry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let finished = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let on_done = finished.clone();
    let producer = enhance(
        move |n: u32| {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    Ok(n)
                } else {
                    Err("refresh failed".to_string())
                }
            }
        },
        EnhanceOptions::new()
            .cache(CacheOptions {
                swr: true,
                ..CacheOptions::default()
            })
            .on_background_update(move |outcome: &Outcome<u32, String>| {
                on_done.lock().push(outcome.clone())
            }),
    );

    assert_eq!(producer.call(3).await, Ok(3));
    assert_eq!(producer.call(3).await, Ok(3));
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        *finished.lock(),
        vec![Err(CallError::Producer("refresh failed".to_string()))]
    );
    assert_eq!(producer.call(3).await, Ok(3), "stale entry survives a failed refresh");
}

// ── Key generation ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_structurally_equal_params_share_cache_entry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let producer = enhance(
        move |filters: HashMap<String, u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<usize, String>(filters.len()) }
        },
        EnhanceOptions::new().cache(cached(None, None)),
    );

    let a = HashMap::from([("page".to_string(), 1), ("size".to_string(), 20)]);
    let b = HashMap::from([("size".to_string(), 20), ("page".to_string(), 1)]);

    producer.call(a).await.expect("test: ok");
    producer.call(b).await.expect("test: ok");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_key_generator_controls_cache_identity() {
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = enhance(
        numbered(calls.clone(), 0),
        EnhanceOptions::new()
            .cache(cached(None, None))
            .key_generator(|n: &u32| (n % 2).to_string()),
    );

    producer.call(1).await.expect("test: ok");
    assert_eq!(producer.call(3).await, Ok("1#1".to_string()), "1 and 3 share a key");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

//! End-to-end response cache behavior through the public API.

use std::sync::Arc;
use std::time::Duration;

use nourish_storage::{
    cache_sweep_task, CacheLookup, CachedResponse, LmdbCacheBackend, MissReason, SweepConfig,
};
use nourish_test_utils::fixtures::{completion, fast_config, memory_cache};
use nourish_test_utils::generators::{arb_cache_inputs, arb_completion};
use nourish_test_utils::mocks::{FailingCacheBackend, HitCountFailingBackend, SlowCacheBackend};
use nourish_test_utils::*;
use proptest::prelude::*;
use tokio::sync::watch;

#[tokio::test]
async fn chicken_breast_lookup_hits_with_incremented_count() {
    init_test_tracing();
    let (cache, _clock) = memory_cache(CacheConfig::default()).unwrap();
    let key = CacheKey::new("chicken breast calories?", "coach_a", "default", 3.0);

    assert!(
        cache
            .put(&key, &Completion::new("~165 kcal per 100g", "modelX", 40, 5.0))
            .await
    );

    match cache
        .get(&CacheKey::new("chicken breast calories?", "coach_a", "default", 3.0))
        .await
    {
        CacheLookup::Hit(hit) => {
            assert_eq!(hit.entry.response_text, "~165 kcal per 100g");
            assert_eq!(hit.entry.model_used, "modelX");
            assert_eq!(hit.entry.hit_count, 1);
            assert_eq!(hit.tokens_saved, 40);
            assert_eq!(hit.cost_saved, 5.0);
        }
        other => panic!("expected hit, got {:?}", other),
    }
}

#[tokio::test]
async fn zero_ttl_and_clock_advance_read_as_misses_until_swept() {
    let (cache, clock) = memory_cache(CacheConfig::default()).unwrap();
    let instant = CacheKey::new("zero ttl", "p", "chat", 1.0);
    let weekly = CacheKey::new("weekly", "p", "chat", 1.0);

    cache.put_with_ttl(&instant, &completion(), Duration::ZERO).await;
    cache.put(&weekly, &completion()).await;

    assert_eq!(cache.get(&instant).await.miss_reason(), Some(MissReason::Expired));
    assert!(cache.get(&weekly).await.is_hit());

    clock.advance(Duration::from_secs(7 * 24 * 3600));
    assert_eq!(cache.get(&weekly).await.miss_reason(), Some(MissReason::Expired));
    assert_eq!(cache.stats().await.entry_count, 2);

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.sweep_expired().await.unwrap(), 2);
    assert_eq!(cache.stats().await.entry_count, 0);
}

#[tokio::test]
async fn unavailable_backend_fails_open() {
    init_test_tracing();
    let backend = Arc::new(FailingCacheBackend::new());
    let cache = ResponseCache::new(backend.clone(), CacheConfig::default()).unwrap();
    let key = CacheKey::new("q", "p", "m", 0.5);

    assert_eq!(cache.get(&key).await.miss_reason(), Some(MissReason::StorageError));
    assert!(!cache.put(&key, &completion()).await);

    let response = cache
        .get_or_generate(&key, || async { Ok(completion()) })
        .await
        .unwrap();
    assert!(matches!(response, CachedResponse::Generated(_)));

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.errors, 4);
    assert_eq!(stats.entry_count, 0);
    assert!(backend.calls() >= 4);
}

#[tokio::test]
async fn slow_backend_times_out_as_miss() {
    init_test_tracing();
    let config = fast_config().cache;
    let backend = Arc::new(SlowCacheBackend::new(
        InMemoryCacheBackend::new(),
        config.operation_timeout * 4,
    ));
    let cache = ResponseCache::new(backend, config).unwrap();
    let key = CacheKey::new("slow", "p", "m", 0.5);

    let started = std::time::Instant::now();
    assert_eq!(cache.get(&key).await.miss_reason(), Some(MissReason::Timeout));
    assert!(!cache.put(&key, &completion()).await);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn failed_hit_count_still_serves_the_hit() {
    init_test_tracing();
    let backend = Arc::new(HitCountFailingBackend::new(InMemoryCacheBackend::new()));
    let cache = ResponseCache::new(backend.clone(), CacheConfig::default()).unwrap();
    let key = CacheKey::new("greek yogurt protein?", "coach_b", "chat", 0.5);
    assert!(cache.put(&key, &completion()).await);

    let lookup = cache.get(&key).await;
    let hit = lookup.hit().expect("lookup should still hit");
    assert_eq!(hit.entry.hit_count, 1);
    assert_eq!(hit.entry.response_text, completion().text);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.errors, 1);
    let stored = backend.inner().get(&key.fingerprint()).await.unwrap().unwrap();
    assert_eq!(stored.hit_count, 0);
}

#[tokio::test]
async fn lmdb_backend_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let backend = Arc::new(LmdbCacheBackend::new(dir.path(), 10).unwrap());
    let clock = Arc::new(ManualClock::starting_now());
    let cache = ResponseCache::with_clock(backend, CacheConfig::default(), clock.clone()).unwrap();

    let gentle = CacheKey::new("Can I eat pizza tonight?", "gentle", "chat", 0.2);
    let savage = CacheKey::new("Can I eat pizza tonight?", "savage", "chat", 0.9);
    cache.put(&gentle, &completion()).await;
    cache
        .put(&savage, &Completion::new("Only if you ran ten miles.", "m", 12, 0.001))
        .await;

    assert_eq!(
        cache.get(&gentle).await.hit().unwrap().entry.response_text,
        completion().text
    );
    assert_eq!(
        cache.get(&savage).await.hit().unwrap().entry.response_text,
        "Only if you ran ten miles."
    );
    assert_eq!(cache.get(&gentle).await.hit().unwrap().entry.hit_count, 2);

    assert!(cache.invalidate(&gentle).await.unwrap());
    assert_eq!(cache.get(&gentle).await.miss_reason(), Some(MissReason::NotFound));

    clock.advance(Duration::from_secs(8 * 24 * 3600));
    assert_eq!(cache.sweep_expired().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_hits_are_all_counted() {
    let cache = Arc::new(
        ResponseCache::new(Arc::new(InMemoryCacheBackend::new()), CacheConfig::default()).unwrap(),
    );
    let key = CacheKey::new("hot question", "p", "chat", 0.5);
    cache.put(&key, &completion()).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                assert!(cache.get(&key).await.is_hit());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = cache.backend().get(&key.fingerprint()).await.unwrap().unwrap();
    assert_eq!(stored.hit_count, 800);
    assert_eq!(cache.stats().await.hits, 800);
}

#[tokio::test]
async fn sweep_task_removes_expired_entries_in_background() {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = Arc::new(
        ResponseCache::with_clock(
            Arc::new(InMemoryCacheBackend::new()),
            fast_config().cache.with_sweep_batch_size(3),
            clock.clone(),
        )
        .unwrap(),
    );
    for i in 0..10 {
        let key = CacheKey::new(&format!("question {}", i), "p", "chat", 0.5);
        cache
            .put_with_ttl(&key, &completion(), Duration::from_secs(60))
            .await;
    }
    clock.advance(Duration::from_secs(120));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = SweepConfig::from_cache_config(cache.config());
    let handle = tokio::spawn(cache_sweep_task(cache.clone(), config, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    let snapshot = handle.await.unwrap().snapshot();

    assert_eq!(snapshot.entries_removed, 10);
    assert_eq!(snapshot.sweep_errors, 0);
    assert_eq!(cache.stats().await.entry_count, 0);
}

#[tokio::test]
async fn sweep_task_counts_errors_and_keeps_running() {
    init_test_tracing();
    let cache = Arc::new(
        ResponseCache::new(Arc::new(FailingCacheBackend::new()), fast_config().cache).unwrap(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = SweepConfig {
        interval: Duration::from_millis(10),
        log_empty_cycles: false,
    };
    let handle = tokio::spawn(cache_sweep_task(cache, config, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown_tx.send(true).unwrap();
    let snapshot = handle.await.unwrap().snapshot();

    assert!(snapshot.sweep_cycles >= 2);
    assert_eq!(snapshot.sweep_errors, snapshot.sweep_cycles);
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build")
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A put is visible to a get with the same inputs, and changing any one
    /// input misses.
    #[test]
    fn prop_cache_key_determinism(
        (query, persona, mode, intensity) in arb_cache_inputs(),
        response in arb_completion(),
        which in 0usize..4,
    ) {
        block_on(async {
            let (cache, _clock) = memory_cache(CacheConfig::default()).unwrap();
            let key = CacheKey::new(&query, persona.clone(), mode.clone(), intensity);
            prop_assert!(cache.put(&key, &response).await);

            let same = CacheKey::new(&format!(" {} ", query), persona.clone(), mode.clone(), intensity);
            let lookup = cache.get(&same).await;
            prop_assert_eq!(&lookup.hit().unwrap().entry.response_text, &response.text);

            let varied = match which {
                0 => CacheKey::new(&format!("{} extra", query), persona, mode, intensity),
                1 => CacheKey::new(&query, format!("{}x", persona), mode, intensity),
                2 => CacheKey::new(&query, persona, format!("{}x", mode), intensity),
                _ => CacheKey::new(&query, persona, mode, intensity + 1.0),
            };
            prop_assert_eq!(cache.get(&varied).await.miss_reason(), Some(MissReason::NotFound));
            Ok(())
        })?;
    }

    /// Entries read as misses once the clock reaches their expiry.
    #[test]
    fn prop_cache_expiry(ttl_secs in 1u64..100_000, response in arb_completion()) {
        block_on(async {
            let (cache, clock) = memory_cache(CacheConfig::default()).unwrap();
            let key = CacheKey::new("q", "p", "m", 1.0);
            cache.put_with_ttl(&key, &response, Duration::from_secs(ttl_secs)).await;

            clock.advance(Duration::from_secs(ttl_secs - 1));
            prop_assert!(cache.get(&key).await.is_hit());
            clock.advance(Duration::from_secs(1));
            prop_assert_eq!(cache.get(&key).await.miss_reason(), Some(MissReason::Expired));
            Ok(())
        })?;
    }
}

//! Property-based tests for lookup coalescing and key isolation.

use futures::future::join_all;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_memo::{CacheOptions, SwrCache};

// == Helpers ==
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

fn options() -> CacheOptions<String> {
    CacheOptions::new(Duration::from_secs(5)).revalidate(Duration::from_secs(30))
}

// == Strategies ==
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9:]{1,16}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // Any number of concurrent lookups of one key run the factory once and
    // all observe the first caller's value.
    #[test]
    fn prop_concurrent_lookups_coalesce(
        key in key_strategy(),
        callers in 1usize..32,
        latency_ms in 0u64..2_000,
    ) {
        let (calls, results) = runtime().block_on(async {
            let cache: SwrCache<String, String, String> = SwrCache::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let options = options();

            let lookups = (0..callers).map(|i| {
                let calls = calls.clone();
                cache.get(
                    key.clone(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(latency_ms)).await;
                        Ok(format!("value from caller {}", i))
                    },
                    &options,
                )
            });
            let results: Vec<Option<String>> =
                join_all(lookups).await.into_iter().map(Result::ok).collect();
            (calls.load(Ordering::SeqCst), results)
        });

        prop_assert_eq!(calls, 1);
        prop_assert_eq!(results.len(), callers);
        for result in results {
            prop_assert_eq!(result.as_deref(), Some("value from caller 0"));
        }
    }

    // Distinct keys never share a task or a stored value.
    #[test]
    fn prop_keys_are_isolated(keys in prop::collection::hash_set(key_strategy(), 1..20)) {
        let keys: Vec<String> = keys.into_iter().collect();
        let (calls, values, len) = runtime().block_on(async {
            let cache: SwrCache<String, String, String> = SwrCache::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let options = options();

            let lookups = keys.iter().map(|key| {
                let calls = calls.clone();
                let value = format!("value for {}", key);
                cache.get(
                    key.clone(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(value)
                    },
                    &options,
                )
            });
            let values: Vec<Option<String>> =
                join_all(lookups).await.into_iter().map(Result::ok).collect();
            (calls.load(Ordering::SeqCst), values, cache.len())
        });

        prop_assert_eq!(calls, keys.len());
        prop_assert_eq!(len, keys.len());
        let distinct: HashSet<&Option<String>> = values.iter().collect();
        prop_assert_eq!(distinct.len(), keys.len());
        for (key, value) in keys.iter().zip(values) {
            prop_assert_eq!(value, Some(format!("value for {}", key)));
        }
    }
}

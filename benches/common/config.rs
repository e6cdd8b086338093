use std::env;
use std::time::Duration;

use swr_memo::CachePolicy;

/// Configuration for benchmarks, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Simulated database latency in milliseconds (from DB_LATENCY_MS env var, defaults to 50)
    pub db_latency_ms: u64,

    /// Sample size for benchmarks (from BENCH_SAMPLE_SIZE env var, defaults to 100)
    pub sample_size: usize,

    /// Cache policy as JSON (from BENCH_POLICY env var, defaults to 5s dedupe, 60s revalidate, 300s ttl)
    pub policy: CachePolicy,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            db_latency_ms: env::var("DB_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
            sample_size: env::var("BENCH_SAMPLE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            policy: env::var("BENCH_POLICY")
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| {
                    CachePolicy::new(Duration::from_secs(5))
                        .with_revalidate(Duration::from_secs(60))
                        .with_ttl(Duration::from_secs(300))
                }),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark Configuration:");
        eprintln!("  DB Latency: {}ms", config.db_latency_ms);
        eprintln!("  Sample Size: {}", config.sample_size);
        eprintln!("  Policy: {:?}", config.policy);
        config
    }
}

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Value cached by the benchmarks.
#[derive(Clone, Debug)]
pub struct BenchUser {
    pub id: usize,
    pub name: String,
}

/// Origin that builds users on demand after a fixed latency.
#[derive(Clone)]
pub struct FakeDatabase {
    num_users: usize,
    latency: Duration,
    query_count: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_users: usize, latency_ms: u64) -> Self {
        Self {
            num_users,
            latency: Duration::from_millis(latency_ms),
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Look up a user by id, failing for ids outside the table.
    pub async fn get(&self, id: &str) -> anyhow::Result<BenchUser> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        match id.parse::<usize>() {
            Ok(id) if id < self.num_users => Ok(BenchUser {
                id,
                name: format!("User {}", id),
            }),
            _ => anyhow::bail!("user {} not found", id),
        }
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }
}

/// Ids `0..num_keys` in order.
pub fn sequential_ids(num_keys: usize) -> Vec<String> {
    (0..num_keys).map(|i| i.to_string()).collect()
}

/// `count` ids where 80% of picks land on the first fifth of `0..num_keys`.
pub fn skewed_ids(num_keys: usize, count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let hot = (num_keys / 5).max(1);

    (0..count)
        .map(|_| {
            let id = if rng.gen_bool(0.8) {
                rng.gen_range(0..hot)
            } else {
                rng.gen_range(0..num_keys)
            };
            id.to_string()
        })
        .collect()
}

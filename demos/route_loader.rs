//! Route data loading with stale-while-revalidate.
//!
//! Two namespaces share one engine: posts refresh in the background after
//! a short revalidate window, and user profiles are only cached when the
//! upstream reports them as complete. Run with `RUST_LOG=swr_memo=debug`
//! to watch the engine's decisions.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use swr_memo::{
    CacheMetric, CacheOptions, CachePolicy, MetricsSink, Namespace, SwrCache, SwrCacheBuilder,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
enum Page {
    Post { id: String, title: String, version: u64 },
    User { id: String, name: String, complete: bool },
}

/// Logs every cache event.
struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    fn emit(&self, metric: CacheMetric) {
        info!(?metric, "cache event");
    }

    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Stand-in for a slow upstream API.
#[derive(Clone, Default)]
struct Upstream {
    version: Arc<AtomicU64>,
}

impl Upstream {
    async fn fetch_post(&self, id: String) -> anyhow::Result<Page> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        info!(%id, version, "fetched post from upstream");
        Ok(Page::Post {
            title: format!("Post {}", id),
            id,
            version,
        })
    }

    async fn fetch_user(&self, id: String) -> anyhow::Result<Page> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!(%id, "fetched user from upstream");
        Ok(Page::User {
            complete: id != "ghost",
            name: id.to_uppercase(),
            id,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Policies usually live in route configuration.
    let post_policy: CachePolicy =
        serde_json::from_str(r#"{ "dedupe": 1.0, "revalidate": 0.5, "ttl": 60 }"#)?;
    let user_policy: CachePolicy = serde_json::from_str(r#"{ "revalidate": 30 }"#)?;

    let cache: SwrCache<String, Page, anyhow::Error> =
        SwrCacheBuilder::new().metrics(Arc::new(LogSink)).build();
    let posts = Namespace::new("posts", cache.clone(), CacheOptions::from_policy(post_policy));
    let users = Namespace::new(
        "users",
        cache.clone(),
        CacheOptions::from_policy(user_policy)
            .validate(|page: &Page| matches!(page, Page::User { complete: true, .. })),
    );
    let upstream = Upstream::default();

    // Concurrent requests for one route share a single upstream call.
    let loads = (0..3).map(|_| {
        let upstream = upstream.clone();
        posts.get("1", move |id| async move { upstream.fetch_post(id).await })
    });
    for page in futures::future::join_all(loads).await {
        let page = page?;
        info!(?page, "rendered");
    }

    // After the revalidate window the stale page is served immediately and
    // refreshed in the background.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let stale = {
        let upstream = upstream.clone();
        posts
            .get("1", move |id| async move { upstream.fetch_post(id).await })
            .await?
    };
    info!(page = ?stale, status = ?posts.status("1"), "served stale");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let fresh = {
        let upstream = upstream.clone();
        posts
            .get("1", move |id| async move { upstream.fetch_post(id).await })
            .await?
    };
    info!(page = ?fresh, "served refreshed");

    // Incomplete profiles reach the caller but are never stored.
    for id in ["alice", "ghost"] {
        let upstream = upstream.clone();
        let page = users
            .get(id, move |id| async move { upstream.fetch_user(id).await })
            .await?;
        info!(?page, status = ?users.status(id), "loaded user");
    }

    cache.flush_all();
    info!(entries = cache.len(), "flushed");
    Ok(())
}

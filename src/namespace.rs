use std::future::Future;

use crate::entry::EntryStatus;
use crate::error::CacheError;
use crate::options::CacheOptions;
use crate::swr::SwrCache;
use crate::utils::build_cache_key;

/// A cache handle scoped to one kind of resource.
///
/// Keys are prefixed with the namespace name, so several namespaces can
/// share one engine without colliding, and every lookup uses the options
/// bound at construction.
pub struct Namespace<V, E> {
    namespace: String,
    cache: SwrCache<String, V, E>,
    options: CacheOptions<V>,
}

impl<V, E> Clone for Namespace<V, E> {
    fn clone(&self) -> Self {
        Namespace {
            namespace: self.namespace.clone(),
            cache: self.cache.clone(),
            options: self.options.clone(),
        }
    }
}

impl<V, E> Namespace<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new Namespace on top of `cache`.
    ///
    /// # Arguments
    /// * `namespace` - The namespace string to isolate this cache
    /// * `cache` - The engine holding the state, possibly shared
    /// * `options` - Options applied to every lookup through this handle
    ///
    /// # Example
    /// ```ignore
    /// let cache = SwrCache::new();
    /// let posts = Namespace::new("posts", cache.clone(), CacheOptions::new(Duration::from_secs(5)));
    /// ```
    pub fn new(namespace: &str, cache: SwrCache<String, V, E>, options: CacheOptions<V>) -> Self {
        Namespace {
            namespace: namespace.to_string(),
            cache,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.namespace
    }

    pub fn options(&self) -> &CacheOptions<V> {
        &self.options
    }

    /// Get the cached value or load it from origin.
    ///
    /// # Arguments
    /// * `key` - The cache key, without the namespace prefix
    /// * `load_from_origin` - Loads the value on a miss or refresh (receives the key)
    ///
    /// # Example
    /// ```ignore
    /// let post = posts.get("1", |id| async move {
    ///     api.fetch_post(&id).await
    /// }).await?;
    /// ```
    pub async fn get<F, Fut>(&self, key: &str, load_from_origin: F) -> Result<V, CacheError<E>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let origin_key = key.to_string();
        self.cache
            .get(
                build_cache_key(&self.namespace, key),
                move || load_from_origin(origin_key),
                &self.options,
            )
            .await
    }

    /// Forget the value for `key`.
    pub fn flush(&self, key: &str) {
        self.cache.flush(&build_cache_key(&self.namespace, key));
    }

    pub fn status(&self, key: &str) -> Option<EntryStatus> {
        self.cache.status(&build_cache_key(&self.namespace, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn options() -> CacheOptions<String> {
        CacheOptions::new(Duration::from_secs(5)).revalidate(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_namespaces_share_engine_without_colliding() {
        let cache: SwrCache<String, String, String> = SwrCache::new();
        let posts = Namespace::new("posts", cache.clone(), options());
        let users = Namespace::new("users", cache.clone(), options());

        let post = posts
            .get("1", |id| async move { Ok(format!("post {id}")) })
            .await
            .unwrap();
        let user = users
            .get("1", |id| async move { Ok(format!("user {id}")) })
            .await
            .unwrap();

        assert_eq!(post, "post 1");
        assert_eq!(user, "user 1");
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.status(&"posts::1".to_string()),
            Some(EntryStatus::Fresh)
        );

        posts.flush("1");
        assert!(posts.status("1").is_none());
        assert_eq!(users.status("1"), Some(EntryStatus::Fresh));
    }

    #[tokio::test]
    async fn test_namespace_get_hits_cache() {
        let posts: Namespace<String, String> = Namespace::new("posts", SwrCache::new(), options());
        let call_count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = call_count.clone();
            let result = posts
                .get("7", move |id| async move {
                    // Verify we receive the actual key
                    assert_eq!(id, "7");
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok("Bob".to_string())
                })
                .await
                .unwrap();
            assert_eq!(result, "Bob");
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(posts.name(), "posts");
    }
}

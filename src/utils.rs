//! Shared utilities for the cache library.

use std::fmt::Display;

/// Build a composite cache key from namespace and key.
///
/// Format: `{namespace}::{key}`
pub fn build_cache_key<N: Display>(namespace: &N, key: &str) -> String {
    format!("{}::{}", namespace, key)
}

//! Per-call cache options.
//!
//! [`CachePolicy`] holds the three expiry windows and can be loaded from
//! configuration (durations are written in seconds, fractions allowed).
//! [`CacheOptions`] adds the callbacks that only exist in code: the result
//! validator and an optional per-value TTL.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

/// Dedupe window used when a policy does not name one.
pub const DEFAULT_DEDUPE: Duration = Duration::from_secs(10);

fn default_dedupe() -> Duration {
    DEFAULT_DEDUPE
}

/// Expiry windows applied to a single lookup.
///
/// # Example
///
/// ```ignore
/// let policy: CachePolicy = serde_json::from_str(r#"{ "dedupe": 5, "revalidate": 30, "ttl": 3600 }"#)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachePolicy {
    /// How long one in-flight task may be reused by new lookups.
    ///
    /// This bounds duplicate work behind a slow task. The task itself is
    /// never aborted when the window closes.
    #[serde(with = "secs", default = "default_dedupe")]
    pub dedupe: Duration,

    /// How long a successful result is served without calling the factory.
    /// Results are only stored when this is set.
    #[serde(with = "opt_secs", default, skip_serializing_if = "Option::is_none")]
    pub revalidate: Option<Duration>,

    /// How long a stored result survives after it was last computed,
    /// fresh or stale.
    #[serde(with = "opt_secs", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    /// Create a policy that only coalesces concurrent calls.
    pub fn new(dedupe: Duration) -> Self {
        CachePolicy {
            dedupe,
            revalidate: None,
            ttl: None,
        }
    }

    /// Set the fresh window.
    pub fn with_revalidate(mut self, revalidate: Duration) -> Self {
        self.revalidate = Some(revalidate);
        self
    }

    /// Set the time to live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The revalidate window, if it is usable (present and non-zero).
    pub fn revalidate_window(&self) -> Option<Duration> {
        self.revalidate.filter(|d| !d.is_zero())
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::new(DEFAULT_DEDUPE)
    }
}

/// Predicate deciding whether a computed value may be stored.
pub type Validator<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Computes the time to live of a stored value from the value itself.
pub type TtlFn<V> = Arc<dyn Fn(&V) -> Duration + Send + Sync>;

/// Options passed to [`SwrCache::get`](crate::SwrCache::get).
pub struct CacheOptions<V> {
    policy: CachePolicy,
    validate: Option<Validator<V>>,
    ttl_by: Option<TtlFn<V>>,
}

impl<V> CacheOptions<V> {
    /// Options with the given dedupe window and nothing else.
    pub fn new(dedupe: Duration) -> Self {
        Self::from_policy(CachePolicy::new(dedupe))
    }

    pub fn from_policy(policy: CachePolicy) -> Self {
        CacheOptions {
            policy,
            validate: None,
            ttl_by: None,
        }
    }

    pub fn revalidate(mut self, revalidate: Duration) -> Self {
        self.policy.revalidate = Some(revalidate);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.policy.ttl = Some(ttl);
        self
    }

    /// Only store results for which `validate` returns `true`.
    ///
    /// Rejected results still reach the caller that triggered the
    /// computation. A panicking validator counts as a rejection.
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// Derive the time to live from the stored value. Takes precedence over
    /// [`ttl`](Self::ttl).
    pub fn ttl_by<F>(mut self, ttl_by: F) -> Self
    where
        F: Fn(&V) -> Duration + Send + Sync + 'static,
    {
        self.ttl_by = Some(Arc::new(ttl_by));
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Run the validator. Missing validators accept everything.
    pub(crate) fn accepts(&self, value: &V) -> bool {
        let Some(validate) = &self.validate else {
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| validate(value))) {
            Ok(accepted) => accepted,
            Err(_) => {
                tracing::warn!("cache validator panicked, result will not be stored");
                false
            }
        }
    }

    /// Time to live for `value`, if any.
    pub(crate) fn ttl_for(&self, value: &V) -> Option<Duration> {
        let Some(ttl_by) = &self.ttl_by else {
            return self.policy.ttl;
        };
        match catch_unwind(AssertUnwindSafe(|| ttl_by(value))) {
            Ok(ttl) => Some(ttl),
            Err(_) => {
                tracing::warn!("cache ttl function panicked, falling back to the fixed ttl");
                self.policy.ttl
            }
        }
    }
}

impl<V> From<CachePolicy> for CacheOptions<V> {
    fn from(policy: CachePolicy) -> Self {
        CacheOptions::from_policy(policy)
    }
}

impl<V> Clone for CacheOptions<V> {
    fn clone(&self) -> Self {
        CacheOptions {
            policy: self.policy,
            validate: self.validate.clone(),
            ttl_by: self.ttl_by.clone(),
        }
    }
}

impl<V> fmt::Debug for CacheOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("policy", &self.policy)
            .field("validate", &self.validate.is_some())
            .field("ttl_by", &self.ttl_by.is_some())
            .finish()
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_json() {
        let policy: CachePolicy =
            serde_json::from_str(r#"{ "dedupe": 5, "revalidate": 30, "ttl": 3600 }"#).unwrap();

        assert_eq!(policy.dedupe, Duration::from_secs(5));
        assert_eq!(policy.revalidate, Some(Duration::from_secs(30)));
        assert_eq!(policy.ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_policy_defaults_and_fractions() {
        let policy: CachePolicy = serde_json::from_str(r#"{ "revalidate": 0.5 }"#).unwrap();

        assert_eq!(policy.dedupe, DEFAULT_DEDUPE);
        assert_eq!(policy.revalidate, Some(Duration::from_millis(500)));
        assert!(policy.ttl.is_none());
    }

    #[test]
    fn test_policy_rejects_negative_and_unknown_fields() {
        assert!(serde_json::from_str::<CachePolicy>(r#"{ "revalidate": -1 }"#).is_err());
        assert!(serde_json::from_str::<CachePolicy>(r#"{ "reuse": 10 }"#).is_err());
    }

    #[test]
    fn test_policy_serializes_back_to_seconds() {
        let policy = CachePolicy::new(Duration::from_secs(5)).with_ttl(Duration::from_secs(60));
        let json = serde_json::to_value(policy).unwrap();

        assert_eq!(json, serde_json::json!({ "dedupe": 5.0, "ttl": 60.0 }));
    }

    #[test]
    fn test_revalidate_window_ignores_zero() {
        let policy = CachePolicy::default().with_revalidate(Duration::ZERO);
        assert!(policy.revalidate_window().is_none());

        let policy = CachePolicy::default().with_revalidate(Duration::from_secs(1));
        assert_eq!(policy.revalidate_window(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_validator_panic_fails_closed() {
        let options: CacheOptions<u32> =
            CacheOptions::new(DEFAULT_DEDUPE).validate(|v| if *v == 0 { panic!("bad") } else { true });

        assert!(options.accepts(&1));
        assert!(!options.accepts(&0));
    }

    #[test]
    fn test_ttl_by_overrides_fixed_ttl() {
        let options: CacheOptions<u64> = CacheOptions::new(DEFAULT_DEDUPE)
            .ttl(Duration::from_secs(60))
            .ttl_by(|v| Duration::from_secs(*v));

        assert_eq!(options.ttl_for(&5), Some(Duration::from_secs(5)));

        let fixed: CacheOptions<u64> = CacheOptions::new(DEFAULT_DEDUPE).ttl(Duration::from_secs(60));
        assert_eq!(fixed.ttl_for(&5), Some(Duration::from_secs(60)));
    }
}

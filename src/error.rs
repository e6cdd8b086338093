use std::sync::Arc;
use std::time::Duration;

/// Error type for cache lookups.
///
/// A single settlement is shared by every caller coalesced onto the same
/// task, so the factory's error is held behind an `Arc`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    /// The factory future resolved to an error.
    #[error("factory failed: {0}")]
    Factory(Arc<E>),
    /// A stale entry was hit but the options carry no positive revalidate window.
    #[error("invalid revalidate window {0:?}: refreshing a stale entry needs a positive duration")]
    InvalidRevalidate(Option<Duration>),
    /// The factory future panicked before settling.
    #[error("factory panicked before settling")]
    Panicked,
    /// The task driving the factory was dropped, e.g. during runtime shutdown.
    #[error("task was dropped before it settled")]
    Canceled,
}

impl<E> CacheError<E> {
    /// Wrap a factory error.
    pub fn factory(error: E) -> Self {
        CacheError::Factory(Arc::new(error))
    }

    /// The factory's own error, if this is a factory failure.
    pub fn factory_error(&self) -> Option<&E> {
        match self {
            CacheError::Factory(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Whether this is a misconfiguration rather than a failure of the data source.
    pub fn is_config(&self) -> bool {
        matches!(self, CacheError::InvalidRevalidate(_))
    }
}

// Manual impl: `derive(Clone)` would demand `E: Clone`.
impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            CacheError::Factory(e) => CacheError::Factory(Arc::clone(e)),
            CacheError::InvalidRevalidate(d) => CacheError::InvalidRevalidate(*d),
            CacheError::Panicked => CacheError::Panicked,
            CacheError::Canceled => CacheError::Canceled,
        }
    }
}

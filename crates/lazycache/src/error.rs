//! Error types for lazycache

use std::fmt;
use std::sync::Arc;

/// Marker carried by every coalesced-refresh failure message
pub const ERR_CACHE_MISS: &str = "ERR_CACHE_MISS";

/// Marker carried by every undefined-key failure message
pub const ERR_NOT_FOUND: &str = "ERR_NOT_FOUND";

/// Result type alias for lazycache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Failure reported by a refresher.
///
/// Opaque to the cache. Cloning shares the underlying error, so every waiter
/// coalesced onto one refresh observes the same failure.
#[derive(Clone)]
pub struct RefreshError {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl RefreshError {
    /// Wrap any error produced by a refresher
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(err),
        }
    }

    /// Build a refresh failure from a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// The refresher's own error
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }

    /// True when both values share the same underlying error
    pub fn same_as(&self, other: &RefreshError) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefreshError").field(&self.inner).finish()
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<String> for RefreshError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for RefreshError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Coarse classification of a [`CacheError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The key was never defined
    KeyNotFound,
    /// A refresh reached through `get` failed
    CacheMiss,
    /// A forced update failed
    Refresh,
}

/// Error types for cache operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// No refresher is registered under the key
    #[error("{key}::{marker}", marker = ERR_NOT_FOUND)]
    KeyNotFound {
        /// Requested key
        key: String,
    },

    /// Refresh failed while serving a lookup
    #[error("{marker}:{source}", marker = ERR_CACHE_MISS)]
    CacheMiss {
        /// Key whose refresh failed
        key: String,
        /// Refresher failure
        #[source]
        source: RefreshError,
    },

    /// Raw refresher failure from a forced update
    #[error(transparent)]
    Refresh(RefreshError),
}

impl CacheError {
    pub(crate) fn not_found(key: &str) -> Self {
        CacheError::KeyNotFound {
            key: key.to_owned(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            CacheError::CacheMiss { .. } => ErrorKind::CacheMiss,
            CacheError::Refresh(_) => ErrorKind::Refresh,
        }
    }

    /// True for undefined keys
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::KeyNotFound
    }

    /// True for failed refreshes reached through `get`
    pub fn is_cache_miss(&self) -> bool {
        self.kind() == ErrorKind::CacheMiss
    }

    /// The refresher failure behind this error, if any
    pub fn refresh_error(&self) -> Option<&RefreshError> {
        match self {
            CacheError::KeyNotFound { .. } => None,
            CacheError::CacheMiss { source, .. } => Some(source),
            CacheError::Refresh(err) => Some(err),
        }
    }

    /// Re-wrap a raw refresh failure for the lookup path
    pub(crate) fn into_cache_miss(self, key: &str) -> Self {
        match self {
            CacheError::Refresh(source) => CacheError::CacheMiss {
                key: key.to_owned(),
                source,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_not_found_message() {
        let err = CacheError::not_found("users");
        assert_eq!(err.to_string(), "users::ERR_NOT_FOUND");
        assert!(err.is_not_found());
        assert!(err.refresh_error().is_none());
    }

    #[test]
    fn test_cache_miss_wraps_message() {
        let err = CacheError::Refresh(RefreshError::msg("Faked error")).into_cache_miss("users");
        assert_eq!(err.to_string(), "ERR_CACHE_MISS:Faked error");
        assert_eq!(err.kind(), ErrorKind::CacheMiss);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_not_found_is_not_rewrapped() {
        let err = CacheError::not_found("users").into_cache_miss("users");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_refresh_error_clones_share_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out");
        let a = RefreshError::new(io);
        let b = a.clone();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&RefreshError::msg("upstream timed out")));
        assert_eq!(CacheError::Refresh(b).to_string(), "upstream timed out");
    }
}

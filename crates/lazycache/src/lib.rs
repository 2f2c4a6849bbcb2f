//! # lazycache
//!
//! Per-key, lazily-refreshed, time-expiring cache with single-flight refresh
//! coalescing.
//!
//! ## Architecture
//! - **Definitions**: each key is bound to a [`Refresher`] and a lifespan
//! - **Lookups**: a valid cached value is served directly; a missing or
//!   expired one triggers a refresh
//! - **Coalescing**: concurrent lookups of a key share one in-flight refresh
//!   and all receive its outcome, in the order they started waiting
//! - **Stale-on-error**: a failed refresh never replaces the last good value
//!
//! ```no_run
//! use lazycache::{DefineOptions, LazyCache, RefreshError};
//!
//! # async fn run() -> lazycache::Result<()> {
//! let cache = LazyCache::new();
//! cache.define("greeting", DefineOptions::new().lifespan_secs(30.0), || async {
//!     Ok::<_, RefreshError>(String::from("hello"))
//! });
//!
//! let greeting = cache.get("greeting").await?;
//! assert_eq!(greeting, "hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod refresher;
mod stats;

pub use cache::LazyCache;
pub use config::{CacheConfig, DefineOptions, DEFAULT_LIFESPAN};
pub use error::{CacheError, ErrorKind, RefreshError, Result, ERR_CACHE_MISS, ERR_NOT_FOUND};
pub use refresher::Refresher;
pub use stats::CacheStats;

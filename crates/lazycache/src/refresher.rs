//! Refresher abstraction: the user-supplied producer of fresh values

use std::future::Future;

use futures::future::{BoxFuture, FutureExt};

use crate::error::RefreshError;

/// Produces a fresh value for one cache key.
///
/// Each call starts one fetch. The returned future must resolve exactly once;
/// a future that never resolves leaves every coalesced waiter pending.
pub trait Refresher<V>: Send + Sync + 'static {
    /// Start a fetch
    fn refresh(&self) -> BoxFuture<'static, Result<V, RefreshError>>;
}

impl<V, F, Fut> Refresher<V> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, RefreshError>> + Send + 'static,
{
    fn refresh(&self) -> BoxFuture<'static, Result<V, RefreshError>> {
        (self)().boxed()
    }
}

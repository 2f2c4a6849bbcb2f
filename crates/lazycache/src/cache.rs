//! LazyCache: per-key lazily-refreshed TTL cache with refresh coalescing

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::{CacheConfig, DefineOptions};
use crate::error::{CacheError, RefreshError, Result};
use crate::refresher::Refresher;
use crate::stats::CacheStats;

type Outcome<V> = std::result::Result<V, RefreshError>;

/// Emit a `tracing` event only when the cache is verbose
macro_rules! verbose {
    ($shared:expr, $level:ident, $($arg:tt)+) => {
        if $shared.config.verbose {
            tracing::$level!($($arg)+);
        }
    };
}

/// One running refresh and the callers waiting on it
struct Flight<V> {
    /// Completion senders in registration order
    waiters: Mutex<Vec<oneshot::Sender<Outcome<V>>>>,
}

impl<V> Flight<V> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            waiters: Mutex::new(Vec::new()),
        })
    }

    fn join(&self) -> oneshot::Receiver<Outcome<V>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(tx);
        rx
    }
}

/// Per-key record
struct Entry<V> {
    refresher: Arc<dyn Refresher<V>>,
    lifespan: Duration,
    value: Option<V>,
    refreshed_at: Option<Instant>,
    flight: Option<Arc<Flight<V>>>,
}

impl<V> Entry<V> {
    fn new(refresher: Arc<dyn Refresher<V>>, lifespan: Duration) -> Self {
        Self {
            refresher,
            lifespan,
            value: None,
            refreshed_at: None,
            flight: None,
        }
    }

    /// Never-fetched entries count as expired
    fn is_expired(&self, now: Instant) -> bool {
        match self.refreshed_at {
            Some(at) => now.saturating_duration_since(at) > self.lifespan,
            None => true,
        }
    }

    fn fresh_value(&self, now: Instant) -> Option<&V> {
        if self.is_expired(now) {
            None
        } else {
            self.value.as_ref()
        }
    }

    fn is_defined_by(&self, refresher: &Arc<dyn Refresher<V>>) -> bool {
        Arc::ptr_eq(&self.refresher, refresher)
    }

    fn is_current(&self, flight: &Arc<Flight<V>>) -> bool {
        self.flight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, flight))
    }
}

/// A refresh registered under the lock, spawned after it is released
struct RefreshJob<V> {
    key: String,
    refresher: Arc<dyn Refresher<V>>,
    flight: Arc<Flight<V>>,
    warmup: bool,
}

struct Shared<V> {
    entries: Mutex<AHashMap<String, Entry<V>>>,
    stats: CacheStats,
    config: CacheConfig,
}

impl<V> Shared<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Mark `entry` as refreshing. The caller must hold the entries lock.
    fn begin(key: &str, entry: &mut Entry<V>, warmup: bool) -> RefreshJob<V> {
        let flight = Flight::new();
        entry.flight = Some(Arc::clone(&flight));
        RefreshJob {
            key: key.to_owned(),
            refresher: Arc::clone(&entry.refresher),
            flight,
            warmup,
        }
    }

    fn spawn(self: &Arc<Self>, job: RefreshJob<V>) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let err = RefreshError::msg("no tokio runtime available to run the refresh");
                self.complete(&job.key, &job.refresher, &job.flight, Err(err), job.warmup);
                return;
            }
        };

        let shared = Arc::clone(self);
        handle.spawn(async move {
            let RefreshJob {
                key,
                refresher,
                flight,
                warmup,
            } = job;

            shared.stats.record_refresh();
            let outcome = AssertUnwindSafe(async { refresher.refresh().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RefreshError::msg("refresher panicked")));

            shared.complete(&key, &refresher, &flight, outcome, warmup);
        });
    }

    /// Record the outcome and broadcast it to every waiter of `flight`
    fn complete(
        &self,
        key: &str,
        refresher: &Arc<dyn Refresher<V>>,
        flight: &Arc<Flight<V>>,
        outcome: Outcome<V>,
        warmup: bool,
    ) {
        let waiters = {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_current(flight)) {
                entry.flight = None;
                // A value from a replaced definition is delivered but not kept
                if let (Ok(value), true) = (&outcome, entry.is_defined_by(refresher)) {
                    entry.value = Some(value.clone());
                    entry.refreshed_at = Some(Instant::now());
                }
            }
            std::mem::take(&mut *flight.waiters.lock())
        };

        match &outcome {
            Ok(_) if warmup => verbose!(self, debug, key, "cache defined successfully"),
            Ok(_) => verbose!(self, debug, key, waiters = waiters.len(), "update succeeded"),
            Err(err) => {
                self.stats.record_refresh_failure();
                if warmup {
                    verbose!(self, warn, key, error = %err, "cache warmup failed");
                } else {
                    verbose!(self, warn, key, error = %err, waiters = waiters.len(), "update failed");
                }
            }
        }

        for waiter in waiters {
            // A dropped receiver only means that caller stopped waiting
            let _ = waiter.send(outcome.clone());
        }
    }
}

async fn wait_for<V>(rx: oneshot::Receiver<Outcome<V>>) -> Outcome<V> {
    rx.await
        .unwrap_or_else(|_| Err(RefreshError::msg("refresh abandoned before completing")))
}

/// Lazily-refreshed, time-expiring cache.
///
/// Each key is bound to a [`Refresher`] and a lifespan. Lookups serve the
/// cached value while it is valid and otherwise trigger a refresh; concurrent
/// lookups of the same key share a single refresh and all receive its result.
///
/// Cloning is cheap and every clone shares the same state. Refreshes run on
/// the ambient Tokio runtime and always run to completion, even if every
/// caller waiting on them goes away.
pub struct LazyCache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for LazyCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> LazyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with default configuration
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with custom configuration
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(AHashMap::new()),
                stats: CacheStats::new(),
                config,
            }),
        }
    }

    /// Register `refresher` under `key`.
    ///
    /// Replaces any previous definition and discards its cached value. A
    /// refresh already running under the old definition stays the key's
    /// in-flight refresh: later lookups join it, but its value is not stored
    /// under the new definition. With `auto_warmup` a refresh starts
    /// immediately unless one is already running; its outcome is only logged.
    ///
    /// # Arguments
    /// * `key` - Cache key
    /// * `options` - Lifespan and warmup settings
    /// * `refresher` - Producer of fresh values for `key`
    pub fn define<R>(&self, key: impl Into<String>, options: DefineOptions, refresher: R)
    where
        R: Refresher<V>,
    {
        let key = key.into();
        let lifespan = options.resolve_lifespan(&self.shared.config);
        let mut entry = Entry::new(Arc::new(refresher), lifespan);

        verbose!(self.shared, debug, key = %key, ?lifespan, warmup = options.auto_warmup, "defining cache");
        let job = {
            let mut entries = self.shared.entries.lock();
            entry.flight = entries.get(&key).and_then(|old| old.flight.clone());

            let job = (options.auto_warmup && entry.flight.is_none())
                .then(|| Shared::begin(&key, &mut entry, true));
            entries.insert(key, entry);
            job
        };

        if let Some(job) = job {
            self.shared.spawn(job);
        }
    }

    /// Look up `key`, refreshing it if the cached value is missing or expired.
    ///
    /// Joins a refresh already in flight instead of starting another one.
    /// Refresh failures are reported as [`CacheError::CacheMiss`]; undefined
    /// keys as [`CacheError::KeyNotFound`].
    ///
    /// # Arguments
    /// * `key` - Cache key
    ///
    /// # Returns
    /// * `Result<V>` - Cached or freshly fetched value
    pub async fn get(&self, key: &str) -> Result<V> {
        verbose!(self.shared, debug, key, "fetching");

        let (rx, job) = {
            let mut entries = self.shared.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                verbose!(self.shared, debug, key, "key not defined");
                return Err(CacheError::not_found(key));
            };

            if let Some(value) = entry.fresh_value(Instant::now()) {
                self.shared.stats.record_hit();
                verbose!(self.shared, debug, key, "found");
                return Ok(value.clone());
            }

            match entry.flight.clone() {
                Some(flight) => {
                    self.shared.stats.record_coalesced();
                    verbose!(self.shared, debug, key, "waiting for update");
                    (flight.join(), None)
                }
                None => {
                    self.shared.stats.record_miss();
                    verbose!(self.shared, debug, key, "expired");
                    let job = Shared::begin(key, entry, false);
                    (job.flight.join(), Some(job))
                }
            }
        };

        if let Some(job) = job {
            self.shared.spawn(job);
        }

        wait_for(rx)
            .await
            .map_err(|err| CacheError::Refresh(err).into_cache_miss(key))
    }

    /// Force a refresh of `key` and return its raw outcome.
    ///
    /// Joins a refresh already in flight so at most one refresher call per
    /// key is ever outstanding. A failure leaves the previous value in place.
    ///
    /// # Arguments
    /// * `key` - Cache key
    ///
    /// # Returns
    /// * `Result<V>` - Freshly fetched value, or the refresher's own error
    pub async fn update(&self, key: &str) -> Result<V> {
        let (rx, job) = {
            let mut entries = self.shared.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                verbose!(self.shared, debug, key, "key not defined");
                return Err(CacheError::not_found(key));
            };

            match entry.flight.clone() {
                Some(flight) => {
                    self.shared.stats.record_coalesced();
                    verbose!(self.shared, debug, key, "waiting for update");
                    (flight.join(), None)
                }
                None => {
                    verbose!(self.shared, debug, key, "updating");
                    let job = Shared::begin(key, entry, false);
                    (job.flight.join(), Some(job))
                }
            }
        };

        if let Some(job) = job {
            self.shared.spawn(job);
        }

        wait_for(rx).await.map_err(CacheError::Refresh)
    }

    /// True when `key` is defined and has no valid value.
    ///
    /// A key that was never fetched successfully counts as expired. Undefined
    /// keys are not expired.
    pub fn is_expired(&self, key: &str) -> bool {
        let now = Instant::now();
        self.shared
            .entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.is_expired(now))
    }

    /// True when a refresher is registered under `key`
    pub fn is_defined(&self, key: &str) -> bool {
        self.shared.entries.lock().contains_key(key)
    }

    /// True while a refresh for `key` is in flight
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.shared
            .entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.flight.is_some())
    }

    /// Last successfully fetched value, expired or not, without refreshing
    pub fn peek(&self, key: &str) -> Option<V> {
        self.shared
            .entries
            .lock()
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    /// Defined keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.shared.entries.lock().keys().cloned().collect()
    }

    /// Number of defined keys
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// True when no key is defined
    pub fn is_empty(&self) -> bool {
        self.shared.entries.lock().is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    /// Get cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }
}

impl<V> Default for LazyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for LazyCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCache")
            .field("keys", &self.shared.entries.lock().len())
            .field("config", &self.shared.config)
            .finish()
    }
}

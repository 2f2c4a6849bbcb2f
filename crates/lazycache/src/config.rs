//! Cache and per-key configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifespan applied when a key is defined without one (2 hours)
pub const DEFAULT_LIFESPAN: Duration = Duration::from_secs(2 * 60 * 60);

/// Cache instance configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Emit lookup and refresh transitions through `tracing`
    pub verbose: bool,
    /// Lifespan for keys defined without an explicit one
    #[serde(rename = "default_lifespan_secs", with = "secs_f64")]
    pub default_lifespan: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            default_lifespan: DEFAULT_LIFESPAN,
        }
    }
}

impl CacheConfig {
    /// Enable or disable transition logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the fallback lifespan
    pub fn default_lifespan(mut self, lifespan: Duration) -> Self {
        self.default_lifespan = lifespan;
        self
    }
}

/// Options for [`LazyCache::define`](crate::LazyCache::define).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DefineOptions {
    /// How long a fetched value stays valid; `None` uses the cache default
    pub lifespan: Option<Duration>,
    /// Start a refresh as soon as the key is defined
    pub auto_warmup: bool,
}

impl DefineOptions {
    /// Options with every field at its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifespan
    pub fn lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan = Some(lifespan);
        self
    }

    /// Set the lifespan in (possibly fractional) seconds.
    ///
    /// Zero, negative and non-finite values leave the lifespan unset.
    pub fn lifespan_secs(mut self, secs: f64) -> Self {
        self.lifespan = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|lifespan| !lifespan.is_zero());
        self
    }

    /// Enable or disable warmup on definition
    pub fn auto_warmup(mut self, auto_warmup: bool) -> Self {
        self.auto_warmup = auto_warmup;
        self
    }

    pub(crate) fn resolve_lifespan(&self, config: &CacheConfig) -> Duration {
        self.lifespan.unwrap_or(config.default_lifespan)
    }
}

mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        let lifespan = Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)?;
        if lifespan.is_zero() {
            return Err(serde::de::Error::custom("lifespan must be greater than zero"));
        }
        Ok(lifespan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(!config.verbose);
        assert_eq!(config.default_lifespan, Duration::from_secs(7200));

        let opts = DefineOptions::default();
        assert!(!opts.auto_warmup);
        assert_eq!(opts.resolve_lifespan(&config), Duration::from_secs(7200));
    }

    #[test]
    fn test_fractional_lifespan() {
        let opts = DefineOptions::new().lifespan_secs(0.05);
        assert_eq!(opts.lifespan, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_invalid_lifespan_falls_back() {
        let config = CacheConfig::default().default_lifespan(Duration::from_secs(30));
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let opts = DefineOptions::new().lifespan_secs(secs);
            assert_eq!(opts.resolve_lifespan(&config), Duration::from_secs(30));
        }
    }

    #[test]
    fn test_config_from_json() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"verbose": true, "default_lifespan_secs": 1.5}"#).unwrap();
        assert!(config.verbose);
        assert_eq!(config.default_lifespan, Duration::from_millis(1500));

        let partial: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(partial, CacheConfig::default());
    }

    #[test]
    fn test_config_rejects_non_positive_lifespan() {
        for raw in [
            r#"{"default_lifespan_secs": 0}"#,
            r#"{"default_lifespan_secs": 0.0}"#,
            r#"{"default_lifespan_secs": -5}"#,
        ] {
            let err = serde_json::from_str::<CacheConfig>(raw).unwrap_err();
            assert!(!err.to_string().is_empty());
        }
    }
}

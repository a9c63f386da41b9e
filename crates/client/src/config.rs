use std::time::Duration;

use serde::Deserialize;
use shake_store::{CachePolicy, DEFAULT_TIME_TO_LIVE};
use tracing::warn;

use crate::executor::ExecutionStrategy;

/// Client tunables, read from `SHAKE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShakeConfig {
    pub execution_strategy: ExecutionStrategy,
    pub cache_ttl_secs: u64,
    pub no_cache: bool,
}

impl Default for ShakeConfig {
    fn default() -> Self {
        Self {
            execution_strategy: ExecutionStrategy::NetworkOnly,
            cache_ttl_secs: DEFAULT_TIME_TO_LIVE.as_secs(),
            no_cache: false,
        }
    }
}

impl ShakeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ShakeConfig::from_env`] over an arbitrary key lookup.
    /// Unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let execution_strategy = match lookup("SHAKE_EXECUTION_STRATEGY") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(value = %raw, error = %e, "ignoring SHAKE_EXECUTION_STRATEGY");
                defaults.execution_strategy
            }),
            None => defaults.execution_strategy,
        };
        let cache_ttl_secs =
            lookup("SHAKE_CACHE_TTL_SECS").and_then(|s| s.trim().parse().ok()).unwrap_or(defaults.cache_ttl_secs);
        let no_cache = lookup("SHAKE_NO_CACHE")
            .map(|v| v.trim() == "1" || v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.no_cache);
        Self { execution_strategy, cache_ttl_secs, no_cache }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        if self.no_cache {
            CachePolicy::NoCache
        } else {
            CachePolicy::Default { time_to_live: Duration::from_secs(self.cache_ttl_secs) }
        }
    }
}

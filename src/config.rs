use std::{env, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{backoff::Backoff, dispatch::RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.tvmaze.com/";

/// Settings for a dispatcher talking HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub base_url: String,

    /// Per-request transport timeout.
    pub timeout_ms: u64,

    /// First backoff delay after a 429; later delays grow from it.
    pub backoff_base_ms: u64,

    /// Unset retries rate-limited requests indefinitely.
    pub max_retries: Option<u32>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: 5000,
            backoff_base_ms: 2000,
            max_retries: None,
        }
    }
}

impl DispatchConfig {
    /// Defaults, overridden by `RATEQUEUE_BASE_URL`, `RATEQUEUE_TIMEOUT_MS`,
    /// `RATEQUEUE_BACKOFF_BASE_MS` and `RATEQUEUE_MAX_RETRIES`. Values that
    /// don't parse are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse().ok());

        Self {
            base_url: lookup("RATEQUEUE_BASE_URL").unwrap_or(defaults.base_url),
            timeout_ms: parsed("RATEQUEUE_TIMEOUT_MS").unwrap_or(defaults.timeout_ms),
            backoff_base_ms: parsed("RATEQUEUE_BACKOFF_BASE_MS").unwrap_or(defaults.backoff_base_ms),
            max_retries: lookup("RATEQUEUE_MAX_RETRIES")
                .and_then(|value| value.trim().parse().ok())
                .or(defaults.max_retries),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Backoff::with_base(Duration::from_millis(self.backoff_base_ms)),
            max_retries: self.max_retries,
        }
    }
}

//! Coalescer configuration

use crate::error::{Error, Result};
use crate::key::KeyPolicyKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default quiet period before a pending key is emitted
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Default upper bound on how long a busy key is held back
///
/// A burst of notifications longer than this yields one event per max
/// wait rather than a single event. Set `max_wait_ms` equal to
/// `debounce_ms` for a fixed window counted from the first notification.
pub const DEFAULT_MAX_WAIT_MS: u64 = 2_000;

const MIN_DEBOUNCE_MS: u64 = 1;
const MAX_DEBOUNCE_MS: u64 = 60_000;
const MAX_MAX_WAIT_MS: u64 = 600_000;

/// Timing and key policy for a coalescer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// Quiet period after the last notification (default: 500ms)
    pub debounce_ms: u64,

    /// Longest a key stays pending under continuous notifications
    /// (default: 2000ms). Equal to `debounce_ms` gives a fixed window
    /// measured from the first notification.
    pub max_wait_ms: u64,

    /// Which notifications collapse together
    pub key_policy: KeyPolicyKind,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            key_policy: KeyPolicyKind::default(),
        }
    }
}

impl CoalescerConfig {
    /// Parse from TOML and validate
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DEBOUNCE_MS..=MAX_DEBOUNCE_MS).contains(&self.debounce_ms) {
            return Err(Error::InvalidConfig(format!(
                "debounce_ms must be between {} and {} (got {})",
                MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS, self.debounce_ms
            )));
        }

        if self.max_wait_ms < self.debounce_ms || self.max_wait_ms > MAX_MAX_WAIT_MS {
            return Err(Error::InvalidConfig(format!(
                "max_wait_ms must be between debounce_ms ({}) and {} (got {})",
                self.debounce_ms, MAX_MAX_WAIT_MS, self.max_wait_ms
            )));
        }

        Ok(())
    }
}

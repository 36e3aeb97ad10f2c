//! Configuration for the event system and blocking waits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Event system configuration.
///
/// Deserializes from partial documents; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSystemConfig {
    /// Number of worker threads invoking callbacks.
    pub delivery_workers: usize,
    /// Max queued deliveries before emit starts dropping.
    pub delivery_queue_capacity: usize,
    /// How long a destroy may wait for in-flight deliveries before it logs a warning.
    pub drain_warn_after_ms: u64,
    /// Blocking wait settings.
    pub wait: WaitConfig,
}

impl Default for EventSystemConfig {
    fn default() -> Self {
        Self {
            delivery_workers: 2,
            delivery_queue_capacity: 4096,
            drain_warn_after_ms: 5000,
            wait: WaitConfig::default(),
        }
    }
}

impl EventSystemConfig {
    /// [`Self::drain_warn_after_ms`] as a `Duration`.
    #[must_use]
    pub fn drain_warn_after(&self) -> Duration {
        Duration::from_millis(self.drain_warn_after_ms)
    }
}

/// Timeout policy for [`crate::wait::Wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Timeout used when the caller does not pass one.
    pub default_timeout_ms: u64,
    /// Upper bound on any single wait. Longer requests are clamped.
    pub max_timeout_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
            max_timeout_ms: 60_000,
        }
    }
}

impl WaitConfig {
    /// [`Self::default_timeout_ms`] as a `Duration`.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// [`Self::max_timeout_ms`] as a `Duration`.
    #[must_use]
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

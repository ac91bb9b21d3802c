// ABOUTME: Tunables for batching, memory bounds, self-healing and latency sampling
// ABOUTME: Every section has serde defaults so partial config files are valid

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub batching: BatchingConfig,
    pub memory: MemoryConfig,
    pub healing: HealingConfig,
    pub performance: PerformanceConfig,
}

/// Event coalescing settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Most payloads one tick delivers per topic. The rest carries over to
    /// the next tick's batch. Unset means every same-tick emission arrives in
    /// a single delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,
}

/// Retention windows and leak detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Flush records kept for diagnostics
    pub batch_history_window: usize,
    /// State revisions kept for replay and rollback
    pub revision_history_window: usize,
    /// Live subscriptions above this count raise a leak warning
    pub subscription_warn_threshold: usize,
    /// Periodic sweep interval; 0 disables scheduled sweeps
    pub sweep_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            batch_history_window: 128,
            revision_history_window: 256,
            subscription_warn_threshold: 500,
            sweep_interval_ms: 30_000,
        }
    }
}

impl MemoryConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

/// Self-healing state machine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Faults within the cooldown window that mark a component Failed
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Reset attempts before a component is reported permanently Failed
    pub max_reset_attempts: u32,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 5_000,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            max_reset_attempts: 5,
        }
    }
}

impl HealingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Delay before reset attempt `attempt` (zero-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Latency sampling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Samples retained per label for percentile computation
    pub window_size: usize,
    /// Operations slower than this are logged as warnings; 0 disables
    pub slow_threshold_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            slow_threshold_ms: 16,
        }
    }
}

impl PerformanceConfig {
    pub fn slow_threshold(&self) -> Option<Duration> {
        (self.slow_threshold_ms > 0).then(|| Duration::from_millis(self.slow_threshold_ms))
    }
}

impl BridgeConfig {
    /// Validate the configuration before the bridge is built
    pub fn validate(&self) -> BridgeResult<()> {
        if self.batching.max_batch_size == Some(0) {
            return Err(BridgeError::invalid_config(
                "batching.max_batch_size must be greater than 0",
            ));
        }
        if self.memory.batch_history_window == 0 || self.memory.revision_history_window == 0 {
            return Err(BridgeError::invalid_config(
                "memory history windows must be greater than 0",
            ));
        }
        if self.healing.failure_threshold == 0 {
            return Err(BridgeError::invalid_config(
                "healing.failure_threshold must be greater than 0",
            ));
        }
        if self.healing.max_reset_attempts == 0 {
            return Err(BridgeError::invalid_config(
                "healing.max_reset_attempts must be greater than 0",
            ));
        }
        if self.healing.base_backoff_ms > self.healing.max_backoff_ms {
            return Err(BridgeError::invalid_config(
                "healing.base_backoff_ms must not exceed healing.max_backoff_ms",
            ));
        }
        if self.performance.window_size == 0 {
            return Err(BridgeError::invalid_config(
                "performance.window_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

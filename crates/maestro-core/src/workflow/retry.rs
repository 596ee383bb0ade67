//! Backoff computation for step retries.

use std::time::Duration;

use maestro_types::workflow::RetryConfig;

/// Delay before re-running a step after failed attempt `attempt` (0-based):
/// `min(backoff_ms * multiplier^attempt, max_backoff_ms)`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let scaled = (config.backoff_ms as f64) * config.backoff_multiplier.powi(attempt as i32);
    let capped = scaled.min(config.max_backoff_ms as f64);
    Duration::from_millis(capped.max(0.0) as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

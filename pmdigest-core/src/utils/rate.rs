//! Adaptive flush delay.

use crate::config::ThrottleConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Turns the number of recent arrivals into the next flush delay.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    config: ThrottleConfig,
}

impl RateEstimator {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config }
    }

    pub fn base_delay(&self) -> Duration {
        self.config.base_delay
    }

    /// Returns the delay before the next flush of a channel that saw
    /// `recent_count` arrivals inside the window.
    ///
    /// Quiet channels get `base_delay`. Above the burst threshold the delay
    /// grows linearly with `recent_count / burst_threshold * scale_factor`,
    /// capped at `max_delay`.
    pub fn next_delay(&self, recent_count: usize) -> Duration {
        let base = self.config.base_delay;
        let max = self.config.max_delay;
        let threshold = self.config.burst_threshold.max(1) as usize;

        if recent_count <= threshold {
            return base;
        }

        // Multiply before dividing so exact ratios stay exact in f64.
        let millis = (base.as_millis() as f64 * recent_count as f64 * self.config.scale_factor
            / threshold as f64)
            .ceil();
        let delay = if millis.is_finite() && millis < max.as_millis() as f64 {
            Duration::from_millis(millis as u64)
        } else {
            max
        };
        delay.max(base).min(max)
    }

    /// Whether an entry that arrived at `arrived_at` is inside the window
    /// ending at `now`. The window includes its lower bound.
    pub fn is_recent(&self, arrived_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(arrived_at) <= self.config.window
    }
}

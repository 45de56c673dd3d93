//! Throttle and content budget settings.

use std::time::Duration;

/// Default marker appended to a truncated message body.
pub const DEFAULT_TRUNCATION_MARKER: &str = "\n[... Message truncated due to length ...]";

/// Parameters of the adaptive flush delay.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    /// Delay used when the channel is quiet.
    pub base_delay: Duration,
    /// Upper bound for the delay during a burst.
    pub max_delay: Duration,
    /// How far back arrivals count as recent.
    pub window: Duration,
    /// Recent arrivals above this count scale the delay up.
    pub burst_threshold: u32,
    pub scale_factor: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(600),
            window: Duration::from_secs(10),
            burst_threshold: 10,
            scale_factor: 6.0,
        }
    }
}

/// Size caps applied to each digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Cap for a single aggregated per-source body, in characters.
    pub max_message_length: usize,
    /// Cap for the sum of all section lengths, in characters.
    pub max_total_length: usize,
    pub truncation_marker: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_message_length: 10_000,
            max_total_length: 100_000,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_owned(),
        }
    }
}

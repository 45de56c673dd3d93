//! Configuration types for the digest engine.
//!
//! These types represent the validated runtime configuration. Parsing the
//! configuration file is handled by the server crate.

mod config_store;
mod targets;
mod throttle;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use targets::{FilterRule, PatternError, PatternList, SourceConfig, TargetConfig};
pub use throttle::{BudgetConfig, ThrottleConfig};

use crate::events::LogKind;

/// Settings fixed for the lifetime of a [`DigestEngine`](crate::processors::DigestEngine).
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub throttle: ThrottleConfig,
    pub budget: BudgetConfig,
    /// Log kinds that get a channel. Kinds declared later by a reload are
    /// ignored until restart.
    pub log_kinds: Vec<LogKind>,
}

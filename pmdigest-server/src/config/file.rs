//! TOML file configuration structures.
//!
//! These structs directly map to the `pmdigest.toml` file format.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub mail: MailConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub bus: BusConfig,
    /// Monitored processes keyed by their PM2 name.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

/// Mail section.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// Sender mailbox, e.g. `"pmdigest <alerts@example.com>"`.
    pub from: String,
    /// Recipient mailbox.
    pub to: String,
    /// Subject of log digests. Defaults to `Error - <user>@<host>:<environment>`.
    #[serde(default)]
    pub subject: Option<String>,
    /// Subject of lifecycle digests. Defaults to `Process Error - <user>@<host>:<environment>`.
    #[serde(default)]
    pub lifecycle_subject: Option<String>,
    /// Handlebars template replacing the built-in HTML layout.
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "localhost".to_string()
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS.
    #[default]
    Starttls,
    /// Implicit TLS.
    Tls,
    /// No encryption. Only for local relays.
    None,
}

impl SmtpSecurity {
    pub fn default_port(self) -> u16 {
        match self {
            SmtpSecurity::Starttls => 587,
            SmtpSecurity::Tls => 465,
            SmtpSecurity::None => 25,
        }
    }
}

/// SMTP section. Credentials are read from `SMTP_USER` / `SMTP_PASS`.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    /// Defaults to the standard port of `security`.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub security: SmtpSecurity,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: None,
            security: SmtpSecurity::default(),
        }
    }
}

/// Throttle section. Durations are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub window_ms: u64,
    pub burst_threshold: u32,
    pub scale_factor: f64,
    pub max_message_length: usize,
    pub max_total_length: usize,
    pub truncation_marker: String,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        let throttle = pmdigest_core::config::ThrottleConfig::default();
        let budget = pmdigest_core::config::BudgetConfig::default();
        Self {
            base_delay_ms: throttle.base_delay.as_millis() as u64,
            max_delay_ms: throttle.max_delay.as_millis() as u64,
            window_ms: throttle.window.as_millis() as u64,
            burst_threshold: throttle.burst_threshold,
            scale_factor: throttle.scale_factor,
            max_message_length: budget.max_message_length,
            max_total_length: budget.max_total_length,
            truncation_marker: budget.truncation_marker,
        }
    }
}

/// Bus section.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Path of the PM2 publish socket. Defaults to `$PM2_HOME/pub.sock`.
    #[serde(default)]
    pub socket: Option<PathBuf>,
    /// Notify lifecycle transitions (restart, exit, ...) of monitored processes.
    #[serde(default = "default_lifecycle")]
    pub lifecycle: bool,
}

fn default_lifecycle() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            socket: None,
            lifecycle: default_lifecycle(),
        }
    }
}

/// A monitored process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    /// Watched log kinds (`stdout`/`stderr`, or `log:out`/`log:err`) and their rules.
    #[serde(default)]
    pub events: BTreeMap<String, RuleConfig>,
}

/// Filter rule for one log kind of a target.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub ignores: Option<Vec<String>>,
    #[serde(default)]
    pub matches: Option<Vec<String>>,
}

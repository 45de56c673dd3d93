//! Configuration module for pmdigest.
//!
//! Handles loading configuration from the TOML file, CLI arguments and
//! environment variables, and converts it into the engine's runtime types.

pub mod file;
pub mod runtime;

use crate::config::file::{FileConfig, RuleConfig, TargetConfig as FileTargetConfig};
use crate::config::runtime::{BusSettings, MailSettings, SmtpCredentials, SmtpSettings};
use pmdigest_bus::client::default_socket_path;
use pmdigest_core::config::{
    BudgetConfig, EngineConfig, FilterRule, PatternList, SourceConfig, TargetConfig,
    ThrottleConfig,
};
use pmdigest_core::events::LogKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("cannot locate the PM2 socket: set bus.socket, PM2_HOME or HOME")]
    MissingSocket,
}

/// Loaded configuration result containing all parts.
#[derive(Debug)]
pub struct LoadedConfig {
    pub engine: EngineConfig,
    pub targets: TargetConfig,
    pub mail: MailSettings,
    pub smtp: SmtpSettings,
    pub bus: BusSettings,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    pm2_home: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader.
    ///
    /// `pm2_home` locates the bus socket when the file does not set one.
    pub fn new(config_path: impl AsRef<Path>, pm2_home: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            pm2_home,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Validate the configuration
    /// 3. Compile filter patterns, dropping invalid ones with a warning
    /// 4. Resolve subjects, SMTP credentials and the bus socket
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let file_config: FileConfig = toml::from_str(&config_content)?;

        self.validate(&file_config)?;

        self.build_loaded_config(file_config)
    }

    /// Reload the configuration (used during SIGHUP).
    ///
    /// Only the targets of the result are applied at runtime.
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let throttle = &config.throttle;
        if throttle.base_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "throttle.base_delay_ms must be positive".to_string(),
            ));
        }
        if throttle.max_delay_ms < throttle.base_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "throttle.max_delay_ms ({}) is below throttle.base_delay_ms ({})",
                throttle.max_delay_ms, throttle.base_delay_ms
            )));
        }
        if throttle.window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "throttle.window_ms must be positive".to_string(),
            ));
        }
        if throttle.burst_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "throttle.burst_threshold must be positive".to_string(),
            ));
        }
        if !throttle.scale_factor.is_finite() || throttle.scale_factor <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "throttle.scale_factor must be a positive number, got {}",
                throttle.scale_factor
            )));
        }
        if throttle.max_message_length == 0 || throttle.max_total_length == 0 {
            return Err(ConfigError::ValidationError(
                "throttle length limits must be positive".to_string(),
            ));
        }
        if config.mail.from.trim().is_empty() || config.mail.to.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "mail.from and mail.to must be set".to_string(),
            ));
        }
        for (name, target) in &config.targets {
            for kind in target.events.keys() {
                kind.parse::<LogKind>().map_err(|e| {
                    ConfigError::ValidationError(format!("target {name}: {e}"))
                })?;
            }
        }
        Ok(())
    }

    fn build_loaded_config(&self, file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
        let targets = build_targets(&file_config.targets, file_config.bus.lifecycle)?;
        if targets.sources.is_empty() {
            tracing::warn!("No targets configured, every event will be dropped");
        }

        let throttle = &file_config.throttle;
        let engine = EngineConfig {
            throttle: ThrottleConfig {
                base_delay: Duration::from_millis(throttle.base_delay_ms),
                max_delay: Duration::from_millis(throttle.max_delay_ms),
                window: Duration::from_millis(throttle.window_ms),
                burst_threshold: throttle.burst_threshold,
                scale_factor: throttle.scale_factor,
            },
            budget: BudgetConfig {
                max_message_length: throttle.max_message_length,
                max_total_length: throttle.max_total_length,
                truncation_marker: throttle.truncation_marker.clone(),
            },
            log_kinds: targets.log_kinds().into_iter().collect(),
        };

        let identity = format!("{}@{}:{}", current_user(), current_host(), file_config.mail.environment);
        let mail = MailSettings {
            subject: file_config
                .mail
                .subject
                .unwrap_or_else(|| format!("Error - {identity}")),
            lifecycle_subject: file_config
                .mail
                .lifecycle_subject
                .unwrap_or_else(|| format!("Process Error - {identity}")),
            from: file_config.mail.from,
            to: file_config.mail.to,
            template: file_config.mail.template,
        };

        let smtp = SmtpSettings {
            port: file_config
                .smtp
                .port
                .unwrap_or_else(|| file_config.smtp.security.default_port()),
            host: file_config.smtp.host,
            security: file_config.smtp.security,
            credentials: get_smtp_credentials(),
        };

        let socket = match file_config.bus.socket {
            Some(socket) => socket,
            None => default_socket_path(self.pm2_home.as_deref()).ok_or(ConfigError::MissingSocket)?,
        };

        Ok(LoadedConfig {
            engine,
            targets,
            mail,
            smtp,
            bus: BusSettings { socket },
        })
    }
}

/// Convert the file targets into the engine's target set.
pub fn build_targets(
    targets: &std::collections::BTreeMap<String, FileTargetConfig>,
    lifecycle: bool,
) -> Result<TargetConfig, ConfigError> {
    let mut config = TargetConfig::new(lifecycle);
    for (name, target) in targets {
        let mut source = SourceConfig::new();
        for (kind, rule) in &target.events {
            let kind: LogKind = kind
                .parse()
                .map_err(|e| ConfigError::ValidationError(format!("target {name}: {e}")))?;
            source = source.watch(kind, compile_rule(name, kind, rule));
        }
        config = config.with_source(name.as_str(), source);
    }
    Ok(config)
}

fn compile_rule(name: &str, kind: LogKind, rule: &RuleConfig) -> FilterRule {
    let compile = |list: &Option<Vec<String>>, field: &str| {
        let patterns = list.as_ref()?;
        let (compiled, errors) = PatternList::compile(patterns);
        for e in errors {
            tracing::warn!(
                source = %name,
                %kind,
                field,
                error = %e,
                "Ignoring invalid filter pattern"
            );
        }
        compiled
    };

    FilterRule {
        ignores: compile(&rule.ignores, "ignores"),
        matches: compile(&rule.matches, "matches"),
    }
}

/// Get SMTP credentials from `SMTP_USER` / `SMTP_PASS`.
pub fn get_smtp_credentials() -> Option<SmtpCredentials> {
    let user = std::env::var("SMTP_USER").ok()?;
    let password = std::env::var("SMTP_PASS").ok()?;
    Some(SmtpCredentials { user, password })
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn current_host() -> String {
    if let Ok(host) = std::env::var("HOSTNAME") {
        return host;
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const MAIL: &str = r#"
[mail]
from = "pmdigest <alerts@example.com>"
to = "ops@example.com"
subject = "Errors"
"#;

    #[test]
    fn test_load_converts_to_runtime_types() {
        let file = write_config(&format!(
            r#"{MAIL}
[smtp]
security = "none"

[bus]
socket = "/tmp/pm2/pub.sock"

[targets.api.events.stderr]
ignores = ["DEBUG", "(broken"]

[targets.api.events.stdout]
matches = []
"#
        ));
        let loaded = ConfigLoader::new(file.path(), None).load().unwrap();

        assert_eq!(loaded.mail.subject, "Errors");
        assert!(loaded.mail.lifecycle_subject.starts_with("Process Error - "));
        assert_eq!(loaded.smtp.port, 25);
        assert_eq!(loaded.bus.socket, PathBuf::from("/tmp/pm2/pub.sock"));
        assert_eq!(loaded.engine.throttle.base_delay, Duration::from_secs(10));
        assert_eq!(loaded.engine.log_kinds, vec![LogKind::Stdout, LogKind::Stderr]);

        let stderr = loaded.targets.rule("api", LogKind::Stderr).unwrap();
        assert_eq!(stderr.ignores.as_ref().unwrap().len(), 1);
        let stdout = loaded.targets.rule("api", LogKind::Stdout).unwrap();
        assert!(stdout.matches.as_ref().unwrap().is_empty());
        assert!(loaded.targets.lifecycle);
    }

    #[test]
    fn test_socket_defaults_to_pm2_home() {
        let file = write_config(MAIL);
        let loaded = ConfigLoader::new(file.path(), Some(PathBuf::from("/srv/pm2")))
            .load()
            .unwrap();
        assert_eq!(loaded.bus.socket, PathBuf::from("/srv/pm2/pub.sock"));
    }

    #[test]
    fn test_rejects_unknown_log_kind() {
        let file = write_config(&format!("{MAIL}\n[targets.api.events.\"log:debug\"]\n"));
        let err = ConfigLoader::new(file.path(), None).load().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("log:debug")));
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let file = write_config(&format!(
            "{MAIL}\n[throttle]\nbase_delay_ms = 5000\nmax_delay_ms = 1000\n"
        ));
        assert!(matches!(
            ConfigLoader::new(file.path(), None).load(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::new("/nonexistent/pmdigest.toml", None).load(),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_all_invalid_patterns_count_as_absent() {
        let mut targets = std::collections::BTreeMap::new();
        targets.insert(
            "api".to_string(),
            FileTargetConfig {
                events: [(
                    "log:err".to_string(),
                    RuleConfig {
                        ignores: Some(vec!["(".to_string()]),
                        matches: None,
                    },
                )]
                .into_iter()
                .collect(),
            },
        );
        let config = build_targets(&targets, false).unwrap();
        let rule = config.rule("api", LogKind::Stderr).unwrap();
        assert!(rule.ignores.is_none());
        assert!(rule.matches.is_none());
        assert!(!config.lifecycle);
    }
}

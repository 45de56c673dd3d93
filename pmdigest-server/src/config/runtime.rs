//! Validated runtime settings of the server-side collaborators.

use std::path::PathBuf;

pub use super::file::SmtpSecurity;

/// Addresses, subjects and template of outgoing digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub lifecycle_subject: String,
    pub template: Option<PathBuf>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub credentials: Option<SmtpCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub socket: PathBuf,
}

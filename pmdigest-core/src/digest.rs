//! Digests and the collaborator interfaces that turn them into mail.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Name of the section that opens every digest.
pub const SUMMARY_SECTION: &str = "Summary";

/// A named block of text in a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub name: String,
    pub text: String,
}

impl Section {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Length of the text in characters.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// The content of one outbound message, built per flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Digest {
    pub sections: Vec<Section>,
    /// Sum of section text lengths, in characters.
    pub total_length: usize,
}

impl Digest {
    pub fn new(sections: Vec<Section>) -> Self {
        let total_length = sections.iter().map(Section::len).sum();
        Self {
            sections,
            total_length,
        }
    }

    pub fn summary(&self) -> Option<&Section> {
        self.sections.first()
    }

    /// Section texts separated by blank lines.
    pub fn to_plain_text(&self) -> String {
        self.sections
            .iter()
            .map(|section| section.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The mail could not be built (bad address, header, ...).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailBody {
    Html(String),
    Text(String),
}

/// What the dispatcher sends. A `None` subject means the transport default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    pub subject: Option<String>,
    pub body: MailBody,
}

/// Turns a digest into an HTML body.
pub trait DigestRenderer: Send + Sync {
    fn render(&self, digest: &Digest) -> Result<String, RenderError>;
}

/// Sends a rendered message. No retries are expected.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn deliver(&self, mail: OutboundMail) -> Result<(), DeliveryError>;
}

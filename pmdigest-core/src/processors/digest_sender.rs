//! DigestSender: renders a digest and hands it to the dispatcher.
//!
//! Log digests are rendered to HTML and go out with the default subject.
//! Lifecycle digests are sent as plain text with their own subject.

use crate::digest::{
    DeliveryError, Digest, DigestRenderer, Dispatcher, MailBody, OutboundMail, RenderError,
};
use crate::events::ChannelId;
use std::sync::Arc;
use thiserror::Error;

/// Errors that end a single flush.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

#[derive(Clone)]
pub struct DigestSender {
    renderer: Arc<dyn DigestRenderer>,
    dispatcher: Arc<dyn Dispatcher>,
    lifecycle_subject: Option<String>,
}

impl DigestSender {
    pub fn new(
        renderer: Arc<dyn DigestRenderer>,
        dispatcher: Arc<dyn Dispatcher>,
        lifecycle_subject: Option<String>,
    ) -> Self {
        Self {
            renderer,
            dispatcher,
            lifecycle_subject,
        }
    }

    /// Build the outbound mail for a digest of `channel`.
    pub fn compose(&self, channel: ChannelId, digest: &Digest) -> Result<OutboundMail, RenderError> {
        match channel {
            ChannelId::Log(_) => Ok(OutboundMail {
                subject: None,
                body: MailBody::Html(self.renderer.render(digest)?),
            }),
            ChannelId::Lifecycle => Ok(OutboundMail {
                subject: self.lifecycle_subject.clone(),
                body: MailBody::Text(digest.to_plain_text()),
            }),
        }
    }

    pub async fn send(&self, channel: ChannelId, digest: Digest) -> Result<(), SendError> {
        let mail = self.compose(channel, &digest)?;
        self.dispatcher.deliver(mail).await?;
        Ok(())
    }
}

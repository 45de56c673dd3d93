//! Per-message and per-digest length caps.

use crate::config::BudgetConfig;
use crate::digest::Digest;
use std::borrow::Cow;

/// Applies the size caps of a [`BudgetConfig`].
///
/// Lengths are counted in characters, so truncation never splits one.
#[derive(Debug, Clone)]
pub struct ContentBudgeter {
    config: BudgetConfig,
}

impl ContentBudgeter {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    /// Cut `text` to `max_message_length` characters and append the marker.
    ///
    /// Text within the cap is returned unchanged. Applying this twice gives
    /// the same result as applying it once.
    pub fn truncate_message<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match text.char_indices().nth(self.config.max_message_length) {
            None => Cow::Borrowed(text),
            Some((cut, _)) if text[cut..] == *self.config.truncation_marker => {
                Cow::Borrowed(text)
            }
            Some((cut, _)) => {
                let mut truncated =
                    String::with_capacity(cut + self.config.truncation_marker.len());
                truncated.push_str(&text[..cut]);
                truncated.push_str(&self.config.truncation_marker);
                Cow::Owned(truncated)
            }
        }
    }

    /// Keep only the summary section of a digest over `max_total_length`,
    /// with a note carrying the original size.
    pub fn truncate_digest(&self, digest: Digest) -> Digest {
        if digest.total_length <= self.config.max_total_length {
            return digest;
        }

        let original_length = digest.total_length;
        let Some(mut summary) = digest.sections.into_iter().next() else {
            return Digest::new(Vec::new());
        };
        summary.text.push_str(&format!(
            "\n\n[Content truncated due to excessive size ({original_length} chars)]"
        ));
        Digest::new(vec![summary])
    }
}

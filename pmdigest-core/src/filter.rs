//! Include/exclude evaluation of log messages.

use crate::config::TargetConfig;
use crate::events::LogKind;
use std::sync::Arc;

/// Outcome of filtering one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Included,
    /// Matched an `ignores` pattern. Reported as a drop.
    Ignored,
    /// A `matches` list is configured and none of its patterns matched, or
    /// the (source, kind) pair is no longer watched.
    Unmatched,
}

/// Evaluates the filter rules of the current target snapshot.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    targets: Arc<TargetConfig>,
}

impl FilterEngine {
    pub fn new(targets: Arc<TargetConfig>) -> Self {
        Self { targets }
    }

    pub fn set_targets(&mut self, targets: Arc<TargetConfig>) {
        self.targets = targets;
    }

    /// `ignores` wins over `matches`. A watched pair with neither list
    /// includes everything.
    ///
    /// Entries queued before a reload removed their source or kind are
    /// `Unmatched`.
    pub fn classify(&self, source: &str, kind: LogKind, message: &str) -> Classification {
        let Some(rule) = self.targets.rule(source, kind) else {
            return Classification::Unmatched;
        };

        if rule
            .ignores
            .as_ref()
            .is_some_and(|ignores| ignores.is_match(message))
        {
            return Classification::Ignored;
        }

        match &rule.matches {
            Some(matches) if !matches.is_match(message) => Classification::Unmatched,
            _ => Classification::Included,
        }
    }
}

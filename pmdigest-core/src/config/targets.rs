//! Monitored sources and their filter rules.

use crate::events::LogKind;
use compact_str::CompactString;
use regex::{Regex, RegexSet};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// A filter pattern that failed to compile.
#[derive(Debug, Error)]
#[error("invalid filter pattern {pattern:?}: {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// A precompiled list of regular expressions.
#[derive(Debug, Clone)]
pub struct PatternList {
    set: RegexSet,
}

impl PatternList {
    /// Compile a list of patterns.
    ///
    /// Invalid patterns are left out and returned as errors. When every
    /// pattern of a non-empty list is invalid, the list is `None` and behaves
    /// as if it was never configured. An empty list compiles to a list that
    /// matches nothing.
    pub fn compile<I, S>(patterns: I) -> (Option<Self>, Vec<PatternError>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut valid = Vec::new();
        let mut errors = Vec::new();
        let mut declared = 0usize;

        for pattern in patterns {
            declared += 1;
            let pattern = pattern.as_ref();
            match Regex::new(pattern) {
                Ok(_) => valid.push(pattern.to_owned()),
                Err(source) => errors.push(PatternError {
                    pattern: pattern.to_owned(),
                    source,
                }),
            }
        }

        if declared > 0 && valid.is_empty() {
            return (None, errors);
        }

        match RegexSet::new(&valid) {
            Ok(set) => (Some(Self { set }), errors),
            // Each pattern compiled alone, so only the combined size limit
            // can fail here.
            Err(source) => {
                errors.push(PatternError {
                    pattern: valid.join("|"),
                    source,
                });
                (None, errors)
            }
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Include/exclude rules for one (source, kind) pair.
#[derive(Debug, Clone, Default)]
pub struct FilterRule {
    /// Messages matching any of these are dropped. Evaluated first.
    pub ignores: Option<PatternList>,
    /// When set, only messages matching one of these are kept.
    pub matches: Option<PatternList>,
}

/// Log kinds a source is watched on, each with its filter rule.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    /// Stored as a `Vec`: a source has at most one entry per log kind.
    pub events: Vec<(LogKind, FilterRule)>,
}

impl SourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `kind` with `rule`, replacing any previous rule for that kind.
    pub fn watch(mut self, kind: LogKind, rule: FilterRule) -> Self {
        self.events.retain(|(k, _)| *k != kind);
        self.events.push((kind, rule));
        self
    }

    pub fn watches(&self, kind: LogKind) -> bool {
        self.events.iter().any(|(k, _)| *k == kind)
    }

    pub fn rule(&self, kind: LogKind) -> Option<&FilterRule> {
        self.events
            .iter()
            .find_map(|(k, rule)| (*k == kind).then_some(rule))
    }
}

/// The set of monitored sources.
///
/// Swapped as a whole on reload; the engine only ever reads a snapshot.
#[derive(Debug, Clone, Default)]
pub struct TargetConfig {
    pub sources: HashMap<CompactString, SourceConfig>,
    /// Whether lifecycle events of monitored sources are notified.
    pub lifecycle: bool,
}

impl TargetConfig {
    pub fn new(lifecycle: bool) -> Self {
        Self {
            sources: HashMap::new(),
            lifecycle,
        }
    }

    pub fn with_source(mut self, name: impl Into<CompactString>, source: SourceConfig) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    pub fn contains(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn watches(&self, source: &str, kind: LogKind) -> bool {
        self.sources
            .get(source)
            .is_some_and(|config| config.watches(kind))
    }

    pub fn rule(&self, source: &str, kind: LogKind) -> Option<&FilterRule> {
        self.sources.get(source)?.rule(kind)
    }

    /// Every log kind watched by at least one source, in a stable order.
    pub fn log_kinds(&self) -> BTreeSet<LogKind> {
        self.sources
            .values()
            .flat_map(|config| config.events.iter().map(|(kind, _)| *kind))
            .collect()
    }
}

//! BatchAggregator: turns a drained queue into a digest.
//!
//! Log flushes filter every entry, concatenate the included messages per
//! source and open the digest with a summary of counts. Lifecycle flushes are
//! not filtered; they count transitions per (source, kind) and append a JSON
//! dump of the whole batch.

use crate::digest::{Digest, SUMMARY_SECTION, Section};
use crate::events::{LifecycleKind, LogKind};
use crate::filter::{Classification, FilterEngine};
use crate::queue::{LifecycleEntry, LogEntry};
use crate::utils::{ContentBudgeter, RateEstimator};
use compact_str::CompactString;
use itertools::Itertools;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, warn};

/// Name of the section holding the lifecycle JSON dump.
pub const PROCESS_EVENTS_SECTION: &str = "Process events";

/// Result of one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    /// `None` when nothing is worth delivering.
    pub digest: Option<Digest>,
    /// Drained entries that arrived inside the rate window, filtered or not.
    pub recent_count: usize,
}

#[derive(Debug, Clone)]
pub struct BatchAggregator {
    budgeter: ContentBudgeter,
    estimator: RateEstimator,
}

/// Per-source accumulator. Sources are few per flush, so they are kept in
/// first-arrival order in a `Vec` and searched linearly.
struct SourceBuffer {
    source: CompactString,
    body: String,
    count: usize,
}

#[derive(Serialize)]
struct LifecycleRecord<'a> {
    event: LifecycleKind,
    name: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    at: OffsetDateTime,
}

impl BatchAggregator {
    pub fn new(budgeter: ContentBudgeter, estimator: RateEstimator) -> Self {
        Self {
            budgeter,
            estimator,
        }
    }

    /// Flush a log channel.
    ///
    /// `entries` must be everything drained from the queue, in arrival order.
    pub fn flush_logs(
        &self,
        kind: LogKind,
        entries: Vec<LogEntry>,
        filter: &FilterEngine,
        now: Instant,
    ) -> FlushOutcome {
        let mut buffers: Vec<SourceBuffer> = Vec::new();
        let mut total = 0usize;
        let mut recent_count = 0usize;

        for entry in entries {
            if self.estimator.is_recent(entry.arrived_at, now) {
                recent_count += 1;
            }

            match filter.classify(&entry.source, entry.kind, &entry.message) {
                Classification::Ignored => {
                    info!("Drop message from {}: {}", entry.source, entry.message);
                    continue;
                }
                Classification::Unmatched => continue,
                Classification::Included => {}
            }

            total += 1;
            match buffers.iter_mut().find(|b| b.source == entry.source) {
                Some(buffer) => {
                    buffer.body.push_str(&entry.message);
                    buffer.count += 1;
                }
                None => buffers.push(SourceBuffer {
                    source: entry.source,
                    body: entry.message,
                    count: 1,
                }),
            }
        }

        if total == 0 {
            return FlushOutcome {
                digest: None,
                recent_count,
            };
        }

        let summary = std::iter::once(format!("Total: {total} messages"))
            .chain(
                buffers
                    .iter()
                    .map(|b| format!("{} {kind}: {} messages", b.source, b.count)),
            )
            .join("\n");

        let mut sections = Vec::with_capacity(buffers.len() + 1);
        sections.push(Section::new(SUMMARY_SECTION, summary));
        for buffer in &buffers {
            sections.push(Section::new(
                format!("{} {kind}", buffer.source),
                self.budgeter.truncate_message(&buffer.body),
            ));
        }

        FlushOutcome {
            digest: Some(self.budgeter.truncate_digest(Digest::new(sections))),
            recent_count,
        }
    }

    /// Flush the lifecycle channel. Every non-empty batch yields a digest.
    pub fn flush_lifecycle(&self, entries: Vec<LifecycleEntry>, now: Instant) -> FlushOutcome {
        let recent_count = entries
            .iter()
            .filter(|entry| self.estimator.is_recent(entry.arrived_at, now))
            .count();

        if entries.is_empty() {
            return FlushOutcome {
                digest: None,
                recent_count,
            };
        }

        let counts = entries
            .iter()
            .map(|entry| (entry.source.as_str(), entry.kind))
            .counts();
        let summary = std::iter::once(format!("Total: {} process events", entries.len()))
            .chain(
                entries
                    .iter()
                    .map(|entry| (entry.source.as_str(), entry.kind))
                    .unique()
                    .map(|(source, kind)| {
                        format!("{source} {kind}: {}", counts[&(source, kind)])
                    }),
            )
            .join("\n");

        let records: Vec<LifecycleRecord<'_>> = entries
            .iter()
            .map(|entry| LifecycleRecord {
                event: entry.kind,
                name: &entry.source,
                at: entry.at,
            })
            .collect();

        let mut sections = vec![Section::new(SUMMARY_SECTION, summary)];
        match serde_json::to_string_pretty(&records) {
            Ok(dump) => sections.push(Section::new(PROCESS_EVENTS_SECTION, dump)),
            Err(e) => warn!(error = %e, "Failed to serialize process events, sending summary only"),
        }

        FlushOutcome {
            digest: Some(self.budgeter.truncate_digest(Digest::new(sections))),
            recent_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BudgetConfig, FilterRule, PatternList, SourceConfig, TargetConfig, ThrottleConfig,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn aggregator(budget: BudgetConfig) -> BatchAggregator {
        BatchAggregator::new(
            ContentBudgeter::new(budget),
            RateEstimator::new(ThrottleConfig::default()),
        )
    }

    fn filter() -> FilterEngine {
        let (ignores, _) = PatternList::compile(["DEBUG"]);
        FilterEngine::new(Arc::new(
            TargetConfig::new(true)
                .with_source(
                    "api",
                    SourceConfig::new().watch(LogKind::Stdout, FilterRule::default()),
                )
                .with_source(
                    "worker",
                    SourceConfig::new().watch(
                        LogKind::Stdout,
                        FilterRule {
                            ignores,
                            matches: None,
                        },
                    ),
                ),
        ))
    }

    fn entry(source: &str, message: &str, arrived_at: Instant) -> LogEntry {
        LogEntry {
            kind: LogKind::Stdout,
            source: source.into(),
            message: message.into(),
            arrived_at,
        }
    }

    fn lifecycle(source: &str, kind: LifecycleKind, arrived_at: Instant) -> LifecycleEntry {
        LifecycleEntry {
            kind,
            source: source.into(),
            at: OffsetDateTime::UNIX_EPOCH,
            arrived_at,
        }
    }

    #[test]
    fn test_messages_concatenate_per_source() {
        let now = Instant::now();
        let entries = ["a", "b", "c"]
            .into_iter()
            .map(|m| entry("api", m, now))
            .collect();

        let outcome =
            aggregator(BudgetConfig::default()).flush_logs(LogKind::Stdout, entries, &filter(), now);
        let digest = outcome.digest.unwrap();

        assert_eq!(outcome.recent_count, 3);
        assert_eq!(
            digest.sections,
            vec![
                Section::new("Summary", "Total: 3 messages\napi stdout: 3 messages"),
                Section::new("api stdout", "abc"),
            ]
        );
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_ignored_messages_are_logged_and_dropped() {
        let now = Instant::now();
        let entries = vec![entry("worker", "INFO ok", now), entry("worker", "DEBUG noisy", now)];

        let outcome =
            aggregator(BudgetConfig::default()).flush_logs(LogKind::Stdout, entries, &filter(), now);
        let digest = outcome.digest.unwrap();

        assert_eq!(digest.sections[0].text, "Total: 1 messages\nworker stdout: 1 messages");
        assert_eq!(digest.sections[1].text, "INFO ok");
        assert!(digest.sections.iter().all(|s| !s.text.contains("DEBUG noisy")));
        assert_eq!(outcome.recent_count, 2);
        assert!(logs_contain("Drop message from worker: DEBUG noisy"));
    }

    #[test]
    fn test_all_filtered_yields_no_digest() {
        let now = Instant::now();
        let outcome = aggregator(BudgetConfig::default()).flush_logs(
            LogKind::Stdout,
            vec![entry("worker", "DEBUG one", now), entry("worker", "DEBUG two", now)],
            &filter(),
            now,
        );
        assert!(outcome.digest.is_none());
        assert_eq!(outcome.recent_count, 2);
    }

    #[test]
    fn test_sources_keep_first_arrival_order() {
        let now = Instant::now();
        let entries = vec![
            entry("worker", "w1", now),
            entry("api", "a1", now),
            entry("worker", "w2", now),
        ];
        let digest = aggregator(BudgetConfig::default())
            .flush_logs(LogKind::Stdout, entries, &filter(), now)
            .digest
            .unwrap();

        assert_eq!(
            digest.sections[0].text,
            "Total: 3 messages\nworker stdout: 2 messages\napi stdout: 1 messages"
        );
        assert_eq!(digest.sections[1], Section::new("worker stdout", "w1w2"));
        assert_eq!(digest.sections[2], Section::new("api stdout", "a1"));
    }

    #[test]
    fn test_old_entries_do_not_count_as_recent() {
        let start = Instant::now();
        let now = start + Duration::from_secs(15);
        let entries = vec![entry("api", "old", start), entry("api", "new", now)];
        let outcome =
            aggregator(BudgetConfig::default()).flush_logs(LogKind::Stdout, entries, &filter(), now);
        assert_eq!(outcome.recent_count, 1);
    }

    #[test]
    fn test_on_time_flush_counts_whole_batch() {
        let armed_at = Instant::now();
        let deadline = armed_at + ThrottleConfig::default().base_delay;
        let entries = (0..50)
            .map(|i| entry("api", &format!("line {i}"), armed_at))
            .collect();

        let outcome = aggregator(BudgetConfig::default()).flush_logs(
            LogKind::Stdout,
            entries,
            &filter(),
            deadline,
        );
        assert_eq!(outcome.recent_count, 50);
    }

    #[test]
    fn test_per_source_body_is_truncated() {
        let now = Instant::now();
        let budget = BudgetConfig {
            max_message_length: 4,
            max_total_length: 1000,
            truncation_marker: "…".into(),
        };
        let digest = aggregator(budget)
            .flush_logs(
                LogKind::Stdout,
                vec![entry("api", "abc", now), entry("api", "def", now)],
                &filter(),
                now,
            )
            .digest
            .unwrap();
        assert_eq!(digest.sections[1].text, "abcd…");
    }

    #[test]
    fn test_oversized_log_digest_keeps_summary() {
        let now = Instant::now();
        let budget = BudgetConfig {
            max_message_length: 1000,
            max_total_length: 50,
            ..BudgetConfig::default()
        };
        let digest = aggregator(budget)
            .flush_logs(
                LogKind::Stdout,
                vec![entry("api", &"x".repeat(100), now)],
                &filter(),
                now,
            )
            .digest
            .unwrap();
        assert_eq!(digest.sections.len(), 1);
        assert!(digest.sections[0].text.starts_with("Total: 1 messages"));
    }

    #[test]
    fn test_lifecycle_digest_counts_pairs_and_dumps_json() {
        let now = Instant::now();
        let entries = vec![
            lifecycle("api", LifecycleKind::Exit, now),
            lifecycle("worker", LifecycleKind::RestartOverlimit, now),
            lifecycle("api", LifecycleKind::Exit, now),
        ];
        let outcome = aggregator(BudgetConfig::default()).flush_lifecycle(entries, now);
        let digest = outcome.digest.unwrap();

        assert_eq!(outcome.recent_count, 3);
        assert_eq!(
            digest.sections[0].text,
            "Total: 3 process events\napi exit: 2\nworker restart-overlimit: 1"
        );
        let dump: serde_json::Value = serde_json::from_str(&digest.sections[1].text).unwrap();
        assert_eq!(
            dump[1],
            serde_json::json!({
                "event": "restart-overlimit",
                "name": "worker",
                "at": "1970-01-01T00:00:00Z",
            })
        );
    }

    #[test]
    fn test_oversized_lifecycle_digest_keeps_summary() {
        let now = Instant::now();
        let budget = BudgetConfig {
            max_total_length: 80,
            ..BudgetConfig::default()
        };
        let entries = vec![
            lifecycle("api", LifecycleKind::Exit, now),
            lifecycle("api", LifecycleKind::Exit, now),
        ];
        let digest = aggregator(budget).flush_lifecycle(entries, now).digest.unwrap();

        assert_eq!(digest.sections.len(), 1);
        let summary = &digest.sections[0];
        assert_eq!(summary.name, "Summary");
        assert!(summary.text.starts_with("Total: 2 process events\napi exit: 2\n\n"));
        assert!(summary.text.contains("[Content truncated due to excessive size ("));
        assert!(!summary.text.contains("\"event\""));
    }

    #[test]
    fn test_empty_lifecycle_flush() {
        let outcome = aggregator(BudgetConfig::default()).flush_lifecycle(Vec::new(), Instant::now());
        assert_eq!(
            outcome,
            FlushOutcome {
                digest: None,
                recent_count: 0
            }
        );
    }
}

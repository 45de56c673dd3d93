//! Router: maps an inbound event to its channel queue.
//!
//! The router performs no I/O. It appends to a queue and reports whether a
//! timer must be armed; the engine owns the timers.

use crate::config::TargetConfig;
use crate::events::{ChannelId, InboundEvent};
use crate::queue::{ChannelSet, LifecycleEntry, LogEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Why an event was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The source is not monitored.
    UnknownSource,
    /// The source is monitored, but not on this log kind.
    UnwatchedKind,
    /// The kind is watched, but no channel was created for it at startup.
    NoChannel,
    /// An operator requested the transition.
    Manual,
    LifecycleDisabled,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DropReason::UnknownSource => "unknown source",
            DropReason::UnwatchedKind => "unwatched kind",
            DropReason::NoChannel => "no channel",
            DropReason::Manual => "manual",
            DropReason::LifecycleDisabled => "lifecycle disabled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Dropped(DropReason),
    /// Appended to a queue that already has a timer outstanding.
    Queued(ChannelId),
    /// Appended to an idle queue; a timer must be armed with `delay`.
    Armed { channel: ChannelId, delay: Duration },
}

#[derive(Debug, Clone)]
pub struct Router {
    targets: Arc<TargetConfig>,
}

impl Router {
    pub fn new(targets: Arc<TargetConfig>) -> Self {
        Self { targets }
    }

    pub fn set_targets(&mut self, targets: Arc<TargetConfig>) {
        self.targets = targets;
    }

    pub fn targets(&self) -> &TargetConfig {
        &self.targets
    }

    pub fn route(&self, channels: &mut ChannelSet, event: InboundEvent, now: Instant) -> Routed {
        if !self.targets.contains(event.source()) {
            return Routed::Dropped(DropReason::UnknownSource);
        }

        match event {
            InboundEvent::Log(event) => {
                if !self.targets.watches(&event.source, event.kind) {
                    return Routed::Dropped(DropReason::UnwatchedKind);
                }
                let channel = ChannelId::Log(event.kind);
                let Some(queue) = channels.log_mut(event.kind) else {
                    return Routed::Dropped(DropReason::NoChannel);
                };
                let armed = queue.enqueue(LogEntry {
                    kind: event.kind,
                    source: event.source,
                    message: event.message,
                    arrived_at: now,
                });
                outcome(channel, armed)
            }
            InboundEvent::Lifecycle(event) => {
                if event.manual {
                    return Routed::Dropped(DropReason::Manual);
                }
                if !self.targets.lifecycle {
                    return Routed::Dropped(DropReason::LifecycleDisabled);
                }
                let armed = channels.lifecycle_mut().enqueue(LifecycleEntry {
                    kind: event.kind,
                    source: event.source,
                    at: event.at,
                    arrived_at: now,
                });
                outcome(ChannelId::Lifecycle, armed)
            }
        }
    }
}

fn outcome(channel: ChannelId, armed: Option<Duration>) -> Routed {
    match armed {
        Some(delay) => Routed::Armed { channel, delay },
        None => Routed::Queued(channel),
    }
}

//! Channel queues and their flush state machine.
//!
//! A queue is `Idle` until its first entry arrives, which arms exactly one
//! timer. It stays `Scheduled` while that timer runs and while the resulting
//! flush is in flight; entries arriving meanwhile go to a fresh buffer. When
//! the flush completes the queue re-arms if that buffer is non-empty and
//! becomes `Idle` otherwise.

use crate::events::{ChannelId, LifecycleKind, LogKind};
use compact_str::CompactString;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

/// A queued log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: LogKind,
    pub source: CompactString,
    pub message: String,
    pub arrived_at: Instant,
}

/// A queued lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEntry {
    pub kind: LifecycleKind,
    pub source: CompactString,
    pub at: OffsetDateTime,
    pub arrived_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    /// A timer or the flush it triggered is outstanding.
    Scheduled,
}

#[derive(Debug)]
pub struct ChannelQueue<T> {
    channel: ChannelId,
    entries: Vec<T>,
    state: QueueState,
    current_delay: Duration,
}

impl<T> ChannelQueue<T> {
    pub fn new(channel: ChannelId, base_delay: Duration) -> Self {
        Self {
            channel,
            entries: Vec::new(),
            state: QueueState::Idle,
            current_delay: base_delay,
        }
    }

    /// Append an entry.
    ///
    /// Returns the delay of the timer to arm when this moved the queue out of
    /// `Idle`; `None` when a timer is already outstanding.
    pub fn enqueue(&mut self, entry: T) -> Option<Duration> {
        self.entries.push(entry);
        match self.state {
            QueueState::Idle => {
                self.state = QueueState::Scheduled;
                Some(self.current_delay)
            }
            QueueState::Scheduled => None,
        }
    }

    /// Detach everything queued so far, in arrival order.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries)
    }

    /// Record the end of a flush.
    ///
    /// Returns the delay of the next timer when entries arrived during the
    /// flush; the queue then stays `Scheduled`.
    pub fn complete_flush(&mut self, next_delay: Duration) -> Option<Duration> {
        self.current_delay = next_delay;
        if self.entries.is_empty() {
            self.state = QueueState::Idle;
            None
        } else {
            self.state = QueueState::Scheduled;
            Some(next_delay)
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every queue owned by the engine: one per configured log kind plus the
/// lifecycle queue.
#[derive(Debug)]
pub struct ChannelSet {
    logs: Vec<ChannelQueue<LogEntry>>,
    lifecycle: ChannelQueue<LifecycleEntry>,
}

impl ChannelSet {
    pub fn new(log_kinds: impl IntoIterator<Item = LogKind>, base_delay: Duration) -> Self {
        let mut logs: Vec<ChannelQueue<LogEntry>> = Vec::new();
        for kind in log_kinds {
            if !logs.iter().any(|queue| queue.channel() == ChannelId::Log(kind)) {
                logs.push(ChannelQueue::new(ChannelId::Log(kind), base_delay));
            }
        }
        Self {
            logs,
            lifecycle: ChannelQueue::new(ChannelId::Lifecycle, base_delay),
        }
    }

    pub fn log(&self, kind: LogKind) -> Option<&ChannelQueue<LogEntry>> {
        self.logs
            .iter()
            .find(|queue| queue.channel() == ChannelId::Log(kind))
    }

    pub fn log_mut(&mut self, kind: LogKind) -> Option<&mut ChannelQueue<LogEntry>> {
        self.logs
            .iter_mut()
            .find(|queue| queue.channel() == ChannelId::Log(kind))
    }

    pub fn lifecycle(&self) -> &ChannelQueue<LifecycleEntry> {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut ChannelQueue<LifecycleEntry> {
        &mut self.lifecycle
    }

    pub fn has_log_channel(&self, kind: LogKind) -> bool {
        self.log(kind).is_some()
    }

    /// Record the end of a flush on `channel`; see [`ChannelQueue::complete_flush`].
    pub fn complete_flush(&mut self, channel: ChannelId, next_delay: Duration) -> Option<Duration> {
        match channel {
            ChannelId::Log(kind) => self.log_mut(kind)?.complete_flush(next_delay),
            ChannelId::Lifecycle => self.lifecycle.complete_flush(next_delay),
        }
    }

    /// Entries queued across all channels.
    pub fn pending(&self) -> usize {
        self.logs.iter().map(ChannelQueue::len).sum::<usize>() + self.lifecycle.len()
    }

    pub fn log_kinds(&self) -> impl Iterator<Item = LogKind> + '_ {
        self.logs.iter().filter_map(|queue| match queue.channel() {
            ChannelId::Log(kind) => Some(kind),
            ChannelId::Lifecycle => None,
        })
    }
}

//! Event type definitions.
//!
//! Inbound events are the normalized form of what the PM2 bus publishes.
//! They own their payload and are consumed by the router.

use compact_str::CompactString;
use pmdigest_bus::{BusMessage, LogPacket, ProcessEventKind, ProcessEventPacket};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Output stream a log line was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    #[serde(alias = "log:out")]
    Stdout,
    #[serde(alias = "log:err")]
    Stderr,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Stdout => "stdout",
            LogKind::Stderr => "stderr",
        }
    }
}

impl std::str::FromStr for LogKind {
    type Err = UnknownLogKind;

    /// Accepts the stream names and the bus topics they arrive on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" | "log:out" => Ok(LogKind::Stdout),
            "stderr" | "log:err" => Ok(LogKind::Stderr),
            other => Err(UnknownLogKind(other.to_owned())),
        }
    }
}

/// A log kind name that is neither `stdout` nor `stderr`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log kind {0:?}, expected stdout, stderr, log:out or log:err")]
pub struct UnknownLogKind(pub String);

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleKind {
    Restart,
    Stop,
    Exit,
    Start,
    Online,
    RestartOverlimit,
    Delete,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Restart => "restart",
            LifecycleKind::Stop => "stop",
            LifecycleKind::Exit => "exit",
            LifecycleKind::Start => "start",
            LifecycleKind::Online => "online",
            LifecycleKind::RestartOverlimit => "restart-overlimit",
            LifecycleKind::Delete => "delete",
        }
    }

    /// Map a bus event kind; kinds the daemon does not notify map to `None`.
    pub fn from_bus(kind: ProcessEventKind) -> Option<Self> {
        Some(match kind {
            ProcessEventKind::Restart => LifecycleKind::Restart,
            ProcessEventKind::Delete => LifecycleKind::Delete,
            ProcessEventKind::Stop => LifecycleKind::Stop,
            ProcessEventKind::RestartOverlimit => LifecycleKind::RestartOverlimit,
            ProcessEventKind::Exit => LifecycleKind::Exit,
            ProcessEventKind::Start => LifecycleKind::Start,
            ProcessEventKind::Online => LifecycleKind::Online,
            ProcessEventKind::Other => return None,
        })
    }
}

impl std::fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies an independently throttled channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Log(LogKind),
    Lifecycle,
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Log(kind) => write!(f, "log:{kind}"),
            ChannelId::Lifecycle => f.write_str("lifecycle"),
        }
    }
}

/// A line written by a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub kind: LogKind,
    pub source: CompactString,
    pub message: String,
}

/// A lifecycle transition of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub source: CompactString,
    /// Requested by an operator rather than caused by the process.
    pub manual: bool,
    /// Supervisor-side timestamp.
    pub at: OffsetDateTime,
}

/// A normalized event consumed by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Log(LogEvent),
    Lifecycle(LifecycleEvent),
}

impl InboundEvent {
    pub fn source(&self) -> &str {
        match self {
            InboundEvent::Log(event) => &event.source,
            InboundEvent::Lifecycle(event) => &event.source,
        }
    }

    /// Normalize a bus message.
    ///
    /// Returns `None` for topics and event kinds the daemon does not consume.
    pub fn from_bus(message: BusMessage) -> Option<Self> {
        match message {
            BusMessage::LogOut(packet) => Some(Self::log(LogKind::Stdout, packet)),
            BusMessage::LogErr(packet) => Some(Self::log(LogKind::Stderr, packet)),
            BusMessage::ProcessEvent(packet) => Self::lifecycle(packet),
            BusMessage::Other { .. } => None,
        }
    }

    fn log(kind: LogKind, packet: LogPacket) -> Self {
        InboundEvent::Log(LogEvent {
            kind,
            source: packet.process.name.into(),
            message: packet.data,
        })
    }

    fn lifecycle(packet: ProcessEventPacket) -> Option<Self> {
        let kind = LifecycleKind::from_bus(packet.event)?;
        Some(InboundEvent::Lifecycle(LifecycleEvent {
            kind,
            source: packet.process.name.into(),
            manual: packet.manually,
            at: timestamp_from_millis(packet.at),
        }))
    }
}

/// Convert a bus timestamp in milliseconds, falling back to the local clock
/// when it is missing or out of range.
fn timestamp_from_millis(at: Option<i64>) -> OffsetDateTime {
    at.and_then(|millis| {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
    })
    .unwrap_or_else(OffsetDateTime::now_utc)
}

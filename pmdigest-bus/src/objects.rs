//! Bus packet types published by the PM2 daemon.

use crate::amp::{AmpFrame, AxonArg, CodecError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic carrying lines a process wrote to stdout.
pub const TOPIC_LOG_OUT: &str = "log:out";
/// Topic carrying lines a process wrote to stderr.
pub const TOPIC_LOG_ERR: &str = "log:err";
/// Topic carrying process lifecycle transitions.
pub const TOPIC_PROCESS_EVENT: &str = "process:event";

/// Errors raised while reading typed messages off the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to bus socket {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame error: {0}")]
    Codec(#[from] CodecError),

    #[error("frame has {0} arguments, expected a topic and a payload")]
    MissingArguments(usize),

    #[error("frame topic is not a string")]
    InvalidTopic,

    #[error("invalid payload on topic {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Process descriptor attached to every packet.
///
/// PM2 sends the full process environment here; only the fields the daemon
/// needs are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    #[serde(default)]
    pub pm_id: Option<i64>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Payload of `log:out` / `log:err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPacket {
    pub process: ProcessInfo,
    /// Milliseconds since the Unix epoch, as stamped by the daemon.
    #[serde(default)]
    pub at: Option<i64>,
    pub data: String,
}

/// Lifecycle transition reported on `process:event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessEventKind {
    Restart,
    Delete,
    Stop,
    #[serde(rename = "restart overlimit")]
    RestartOverlimit,
    Exit,
    Start,
    Online,
    #[serde(other)]
    Other,
}

/// Payload of `process:event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEventPacket {
    pub event: ProcessEventKind,
    /// Set when the transition was requested by an operator (`pm2 restart`, ...).
    #[serde(default)]
    pub manually: bool,
    pub process: ProcessInfo,
    #[serde(default)]
    pub at: Option<i64>,
}

/// A typed message read off the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    LogOut(LogPacket),
    LogErr(LogPacket),
    ProcessEvent(ProcessEventPacket),
    /// Any topic the daemon does not consume (`process:msg`, `pm2:kill`, ...).
    Other { topic: String },
}

impl BusMessage {
    /// Interpret an AMP frame as `[topic, payload]`.
    pub fn from_frame(frame: AmpFrame) -> Result<Self, BusError> {
        let argc = frame.args.len();
        let mut args = frame.args.into_iter();
        let (Some(topic), Some(payload)) = (args.next(), args.next()) else {
            return Err(BusError::MissingArguments(argc));
        };

        let topic = match AxonArg::unpack(topic) {
            Ok(AxonArg::Str(topic)) => topic,
            _ => return Err(BusError::InvalidTopic),
        };

        let parse = |topic: &str| -> Result<serde_json::Value, BusError> {
            match AxonArg::unpack(payload) {
                Ok(AxonArg::Json(value)) => Ok(value),
                Ok(AxonArg::Str(text)) => serde_json::from_str(&text).map_err(|source| {
                    BusError::Payload {
                        topic: topic.to_owned(),
                        source,
                    }
                }),
                Ok(AxonArg::Blob(bytes)) => serde_json::from_slice(&bytes).map_err(|source| {
                    BusError::Payload {
                        topic: topic.to_owned(),
                        source,
                    }
                }),
                Err(source) => Err(BusError::Payload {
                    topic: topic.to_owned(),
                    source,
                }),
            }
        };

        let payload_err = |topic: &str, source: serde_json::Error| BusError::Payload {
            topic: topic.to_owned(),
            source,
        };

        match topic.as_str() {
            TOPIC_LOG_OUT => serde_json::from_value(parse(topic.as_str())?)
                .map(BusMessage::LogOut)
                .map_err(|e| payload_err(topic.as_str(), e)),
            TOPIC_LOG_ERR => serde_json::from_value(parse(topic.as_str())?)
                .map(BusMessage::LogErr)
                .map_err(|e| payload_err(topic.as_str(), e)),
            TOPIC_PROCESS_EVENT => serde_json::from_value(parse(topic.as_str())?)
                .map(BusMessage::ProcessEvent)
                .map_err(|e| payload_err(topic.as_str(), e)),
            _ => Ok(BusMessage::Other {
                topic: topic.clone(),
            }),
        }
    }

    /// Build the frame PM2 would publish for this message.
    pub fn to_frame(&self) -> Result<AmpFrame, serde_json::Error> {
        let (topic, payload) = match self {
            BusMessage::LogOut(packet) => (TOPIC_LOG_OUT, serde_json::to_value(packet)?),
            BusMessage::LogErr(packet) => (TOPIC_LOG_ERR, serde_json::to_value(packet)?),
            BusMessage::ProcessEvent(packet) => {
                (TOPIC_PROCESS_EVENT, serde_json::to_value(packet)?)
            }
            BusMessage::Other { topic } => (topic.as_str(), serde_json::Value::Null),
        };
        Ok(AmpFrame::new(vec![
            AxonArg::Str(topic.to_owned()).pack(),
            AxonArg::Json(payload).pack(),
        ]))
    }

    pub fn topic(&self) -> &str {
        match self {
            BusMessage::LogOut(_) => TOPIC_LOG_OUT,
            BusMessage::LogErr(_) => TOPIC_LOG_ERR,
            BusMessage::ProcessEvent(_) => TOPIC_PROCESS_EVENT,
            BusMessage::Other { topic } => topic,
        }
    }
}

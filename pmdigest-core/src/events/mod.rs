//! Event system for the digest pipeline.
//!
//! # Event Flow
//!
//! 1. The bus ingester normalizes PM2 packets into [`InboundEvent`]s
//! 2. `DigestEngine` routes each event to its channel queue
//! 3. A fired channel timer drains the queue into a digest
//! 4. The digest is rendered and handed to the dispatcher

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, InboundEventReceiver, InboundEventSender, inbound_event_channel,
};

pub use types::{
    ChannelId, InboundEvent, LifecycleEvent, LifecycleKind, LogEvent, LogKind, UnknownLogKind,
};

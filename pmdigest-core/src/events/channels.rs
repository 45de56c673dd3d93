//! Event channel factories and handles.

use super::types::InboundEvent;
use tokio::sync::mpsc;

/// Default buffer size for the inbound event channel.
///
/// A full buffer pushes back on the bus reader rather than growing memory.
pub const DEFAULT_CHANNEL_BUFFER: usize = 1024;

/// Sender handle for inbound events.
pub type InboundEventSender = mpsc::Sender<InboundEvent>;
/// Receiver handle for inbound events.
pub type InboundEventReceiver = mpsc::Receiver<InboundEvent>;

/// Create a new inbound event channel.
///
/// Returns a (sender, receiver) pair. Multiple senders can be cloned from the
/// returned sender.
pub fn inbound_event_channel() -> (InboundEventSender, InboundEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

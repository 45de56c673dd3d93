//! Wire types and transport for the PM2 event bus.
//!
//! PM2 publishes process logs and lifecycle transitions on a Unix socket using
//! the axon pub/sub protocol, which frames messages with AMP. This crate holds
//! the frame codec ([`amp`]), the typed bus packets ([`objects`]) and, behind
//! the `client` feature, a socket subscriber ([`client`]).

#![forbid(unsafe_code)]

pub mod amp;
pub mod objects;

#[cfg(feature = "client")]
pub mod client;

pub use amp::{AmpCodec, AmpFrame, AxonArg, CodecError};
pub use objects::{BusError, BusMessage, LogPacket, ProcessEventKind, ProcessEventPacket, ProcessInfo};

//! Processors of the digest pipeline.
//!
//! - `Router`: places an `InboundEvent` on its channel queue
//! - `BatchAggregator`: turns drained entries into a `Digest`
//! - `DigestSender`: renders a digest and hands it to the dispatcher
//! - `DigestEngine`: owns the queues and drives timers and flushes

pub mod aggregator;
pub mod digest_sender;
pub mod engine;
pub mod router;

pub use aggregator::{BatchAggregator, FlushOutcome};
pub use digest_sender::{DigestSender, SendError};
pub use engine::DigestEngine;
pub use router::{DropReason, Routed, Router};

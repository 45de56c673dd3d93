//! BusIngester: forwards PM2 bus messages to the digest engine.
//!
//! Reconnects with exponential backoff when the daemon closes the socket,
//! for example while PM2 itself is restarting.

use pmdigest_bus::client::{BusSubscriber, reconnect_delay};
use pmdigest_core::events::{InboundEvent, InboundEventSender};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct BusIngester {
    subscriber: BusSubscriber,
    events: InboundEventSender,
}

impl BusIngester {
    pub fn new(subscriber: BusSubscriber, events: InboundEventSender) -> Self {
        Self { subscriber, events }
    }

    /// Run until shutdown is signaled or the engine stops receiving.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(socket = %self.subscriber.path().display(), "BusIngester started");

        loop {
            tokio::select! {
                biased;

                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        info!("BusIngester received shutdown signal");
                        break;
                    }
                }

                message = self.subscriber.next_message() => {
                    match message {
                        Some(Ok(message)) => {
                            let Some(event) = InboundEvent::from_bus(message) else {
                                continue;
                            };
                            match self.forward(event, &mut shutdown_rx).await {
                                Forwarded::Sent => {}
                                Forwarded::Closed => {
                                    warn!("Inbound event channel closed, stopping BusIngester");
                                    break;
                                }
                                Forwarded::Shutdown => {
                                    info!("BusIngester received shutdown signal");
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Skipping unreadable bus message");
                        }
                        None => {
                            warn!("PM2 bus connection closed");
                            let path = self.subscriber.path().to_path_buf();
                            match reconnect(path, &mut shutdown_rx).await {
                                Some(subscriber) => self.subscriber = subscriber,
                                None => break,
                            }
                        }
                    }
                }
            }
        }

        info!("BusIngester shutdown complete");
    }

    /// Wait for room in the engine's channel, giving up on shutdown.
    async fn forward(&self, event: InboundEvent, shutdown_rx: &mut watch::Receiver<bool>) -> Forwarded {
        tokio::select! {
            biased;

            _ = shutdown_requested(shutdown_rx) => Forwarded::Shutdown,

            permit = self.events.reserve() => match permit {
                Ok(permit) => {
                    permit.send(event);
                    Forwarded::Sent
                }
                Err(_) => Forwarded::Closed,
            },
        }
    }
}

enum Forwarded {
    Sent,
    Closed,
    Shutdown,
}

/// Completes once shutdown is signaled or its sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Retry the connection until it succeeds; `None` when shutdown interrupts it.
async fn reconnect(path: PathBuf, shutdown_rx: &mut watch::Receiver<bool>) -> Option<BusSubscriber> {
    let mut attempt = 0u32;
    loop {
        let delay = reconnect_delay(attempt);
        debug!(attempt, delay_secs = delay.as_secs(), "Waiting before reconnecting to PM2 bus");

        tokio::select! {
            biased;

            res = shutdown_rx.changed() => {
                if res.is_err() || *shutdown_rx.borrow() {
                    return None;
                }
            }

            _ = tokio::time::sleep(delay) => {
                match BusSubscriber::connect(&path).await {
                    Ok(subscriber) => {
                        info!(socket = %path.display(), "Reconnected to PM2 bus");
                        return Some(subscriber);
                    }
                    Err(e) => {
                        error!(error = %e, attempt, "Failed to reconnect to PM2 bus");
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        }
    }
}

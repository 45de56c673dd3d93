//! DigestEngine processor.
//!
//! The DigestEngine is responsible for:
//! - Receiving `InboundEvent`s and routing them to their channel queue
//! - Arming one timer per queue when it leaves `Idle`
//! - Draining a queue when its timer fires and spawning the delivery
//! - Counting recent arrivals against the timer's deadline, so a flush that
//!   fires on time sees its whole batch inside the window
//! - Recomputing the channel delay from the drained batch and re-arming
//! - Swapping target sources and filter rules when the config store changes
//!
//! Every queue is owned by the single task running [`DigestEngine::run`], so
//! no locks guard them. Timers and deliveries run as spawned tasks whose
//! results come back through `JoinSet`s.

use crate::config::{ConfigWatcher, EngineConfig, TargetConfig};
use crate::events::{ChannelId, InboundEvent, InboundEventReceiver};
use crate::filter::FilterEngine;
use crate::processors::aggregator::BatchAggregator;
use crate::processors::digest_sender::DigestSender;
use crate::processors::router::{Routed, Router};
use crate::queue::ChannelSet;
use crate::utils::{ContentBudgeter, RateEstimator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Owns every channel queue and drives the flush cycle.
///
/// All signal receivers (`shutdown_rx`, `event_rx`, `config_watcher`) are
/// injected when calling [`run()`](DigestEngine::run) rather than owned by the
/// struct.
pub struct DigestEngine {
    channels: ChannelSet,
    router: Router,
    filter: FilterEngine,
    aggregator: BatchAggregator,
    estimator: RateEstimator,
    sender: DigestSender,
}

impl DigestEngine {
    pub fn new(config: EngineConfig, targets: Arc<TargetConfig>, sender: DigestSender) -> Self {
        let estimator = RateEstimator::new(config.throttle);
        Self {
            channels: ChannelSet::new(config.log_kinds, estimator.base_delay()),
            router: Router::new(Arc::clone(&targets)),
            filter: FilterEngine::new(targets),
            aggregator: BatchAggregator::new(
                ContentBudgeter::new(config.budget),
                estimator.clone(),
            ),
            estimator,
            sender,
        }
    }

    /// Run the DigestEngine until shutdown is signaled.
    ///
    /// On shutdown, armed timers are aborted, in-flight deliveries are awaited
    /// and whatever is still queued is discarded.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut event_rx: InboundEventReceiver,
        mut config_watcher: ConfigWatcher<TargetConfig>,
    ) {
        let mut timers: JoinSet<(ChannelId, Instant)> = JoinSet::new();
        let mut flushes: JoinSet<(ChannelId, Duration)> = JoinSet::new();

        info!(
            channels = ?self.channels.log_kinds().collect::<Vec<_>>(),
            sources = self.router.targets().sources.len(),
            "DigestEngine started"
        );

        loop {
            tokio::select! {
                biased;

                // Shutdown has highest priority.
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        info!("DigestEngine received shutdown signal");
                        break;
                    }
                }

                // Config changed: swap the target snapshot.
                Ok(targets) = config_watcher.changed() => {
                    self.apply_targets(targets);
                }

                // A delivery finished: re-arm or go idle.
                Some(res) = flushes.join_next() => {
                    match res {
                        Ok((channel, next_delay)) => {
                            self.complete_flush(channel, next_delay, &mut timers);
                        }
                        Err(e) => error!(error = %e, "Flush task failed"),
                    }
                }

                // A channel timer fired.
                Some(res) = timers.join_next() => {
                    match res {
                        Ok((channel, deadline)) => {
                            self.start_flush(channel, deadline, &mut timers, &mut flushes);
                        }
                        Err(e) => error!(error = %e, "Timer task failed"),
                    }
                }

                Some(event) = event_rx.recv() => {
                    self.handle_event(event, &mut timers);
                }

                // All senders dropped and nothing left in flight.
                else => {
                    info!("Inbound event channel closed");
                    break;
                }
            }
        }

        // -- Cleanup --------------------------------------------------------
        timers.shutdown().await;
        while let Some(res) = flushes.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Flush task failed during shutdown");
            }
        }

        let pending = self.channels.pending();
        if pending > 0 {
            warn!(pending, "Discarding queued entries on shutdown");
        }

        info!("DigestEngine shutdown complete");
    }

    // -- Private helpers ----------------------------------------------------

    fn handle_event(&mut self, event: InboundEvent, timers: &mut JoinSet<(ChannelId, Instant)>) {
        let now = Instant::now();
        match self.router.route(&mut self.channels, event, now) {
            Routed::Armed { channel, delay } => {
                debug!(%channel, delay_ms = delay.as_millis() as u64, "Armed channel timer");
                // The deadline is taken from the arrival that armed the timer.
                arm_timer(timers, channel, now + delay);
            }
            Routed::Queued(_) => {}
            Routed::Dropped(reason) => {
                debug!(%reason, "Dropped inbound event");
            }
        }
    }

    /// Drain `channel` and hand its digest to a delivery task.
    ///
    /// Recency is measured from `deadline`, the instant the timer was due.
    /// Only a flush that ran late loses entries from the window.
    fn start_flush(
        &mut self,
        channel: ChannelId,
        deadline: Instant,
        timers: &mut JoinSet<(ChannelId, Instant)>,
        flushes: &mut JoinSet<(ChannelId, Duration)>,
    ) {
        let outcome = match channel {
            ChannelId::Log(kind) => {
                let Some(queue) = self.channels.log_mut(kind) else {
                    warn!(%channel, "Timer fired for a channel that does not exist");
                    return;
                };
                let entries = queue.drain();
                self.aggregator.flush_logs(kind, entries, &self.filter, deadline)
            }
            ChannelId::Lifecycle => {
                let entries = self.channels.lifecycle_mut().drain();
                self.aggregator.flush_lifecycle(entries, deadline)
            }
        };

        let next_delay = self.estimator.next_delay(outcome.recent_count);
        if next_delay > self.estimator.base_delay() {
            info!(
                %channel,
                recent = outcome.recent_count,
                delay_ms = next_delay.as_millis() as u64,
                "Throttling channel"
            );
        }

        let Some(digest) = outcome.digest else {
            debug!(%channel, "Nothing to deliver");
            self.complete_flush(channel, next_delay, timers);
            return;
        };

        let flush_id = Uuid::now_v7();
        info!(
            %channel,
            %flush_id,
            sections = digest.sections.len(),
            length = digest.total_length,
            "Flushing digest"
        );

        let sender = self.sender.clone();
        flushes.spawn(async move {
            // The delivery runs in its own task so a panic there still
            // reports the channel back to the engine.
            let delivery = tokio::spawn(async move { sender.send(channel, digest).await });
            match delivery.await {
                Ok(Ok(())) => info!(%channel, %flush_id, "Digest delivered"),
                Ok(Err(e)) => error!(%channel, %flush_id, error = %e, "Failed to deliver digest"),
                Err(e) => error!(%channel, %flush_id, error = %e, "Delivery task panicked"),
            }
            (channel, next_delay)
        });
    }

    fn complete_flush(
        &mut self,
        channel: ChannelId,
        next_delay: Duration,
        timers: &mut JoinSet<(ChannelId, Instant)>,
    ) {
        match self.channels.complete_flush(channel, next_delay) {
            Some(delay) => {
                debug!(%channel, delay_ms = delay.as_millis() as u64, "Re-armed channel timer");
                arm_timer(timers, channel, Instant::now() + delay);
            }
            None => debug!(%channel, "Channel idle"),
        }
    }

    fn apply_targets(&mut self, targets: Arc<TargetConfig>) {
        for kind in targets.log_kinds() {
            if !self.channels.has_log_channel(kind) {
                warn!(%kind, "Reloaded config watches a log kind without a channel, ignoring it until restart");
            }
        }
        info!(sources = targets.sources.len(), "DigestEngine reloaded targets");
        self.router.set_targets(Arc::clone(&targets));
        self.filter.set_targets(targets);
    }
}

fn arm_timer(timers: &mut JoinSet<(ChannelId, Instant)>, channel: ChannelId, deadline: Instant) {
    timers.spawn(async move {
        tokio::time::sleep_until(deadline).await;
        (channel, deadline)
    });
}

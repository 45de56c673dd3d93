use async_trait::async_trait;
use pmdigest_core::config::{
    ConfigStore, EngineConfig, FilterRule, PatternList, SourceConfig, TargetConfig,
};
use pmdigest_core::digest::{
    DeliveryError, Digest, DigestRenderer, Dispatcher, MailBody, OutboundMail, RenderError,
};
use pmdigest_core::events::{
    InboundEvent, InboundEventSender, LifecycleEvent, LifecycleKind, LogEvent, LogKind,
    inbound_event_channel,
};
use pmdigest_core::processors::{DigestEngine, DigestSender};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct PlainRenderer;

impl DigestRenderer for PlainRenderer {
    fn render(&self, digest: &Digest) -> Result<String, RenderError> {
        Ok(digest.to_plain_text())
    }
}

struct Delivery {
    at: Instant,
    mail: OutboundMail,
}

impl Delivery {
    fn body(&self) -> &str {
        match &self.mail.body {
            MailBody::Html(body) | MailBody::Text(body) => body,
        }
    }
}

/// Records every delivery attempt; the first `failures` attempts fail.
struct Recorder {
    tx: mpsc::UnboundedSender<Delivery>,
    failures: AtomicUsize,
    latency: Duration,
}

#[async_trait]
impl Dispatcher for Recorder {
    async fn deliver(&self, mail: OutboundMail) -> Result<(), DeliveryError> {
        let _ = self.tx.send(Delivery {
            at: Instant::now(),
            mail,
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DeliveryError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

struct Harness {
    started: Instant,
    events: InboundEventSender,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    shutdown: watch::Sender<bool>,
    store: ConfigStore<TargetConfig>,
    engine: JoinHandle<()>,
}

impl Harness {
    fn start(targets: TargetConfig) -> Self {
        Self::start_with(targets, 0, Duration::ZERO)
    }

    fn start_with(targets: TargetConfig, failures: usize, latency: Duration) -> Self {
        let (tx, deliveries) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            tx,
            failures: AtomicUsize::new(failures),
            latency,
        });
        let sender = DigestSender::new(
            Arc::new(PlainRenderer),
            recorder,
            Some("Process Error".into()),
        );

        let store = ConfigStore::new(targets);
        let config = EngineConfig {
            log_kinds: vec![LogKind::Stdout, LogKind::Stderr],
            ..EngineConfig::default()
        };
        let engine = DigestEngine::new(config, store.load(), sender);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (events, event_rx) = inbound_event_channel();
        let engine = tokio::spawn(engine.run(shutdown_rx, event_rx, store.subscribe()));

        Self {
            started: Instant::now(),
            events,
            deliveries,
            shutdown,
            store,
            engine,
        }
    }

    async fn log(&self, source: &str, kind: LogKind, message: &str) {
        self.events
            .send(InboundEvent::Log(LogEvent {
                kind,
                source: source.into(),
                message: message.into(),
            }))
            .await
            .unwrap();
    }

    async fn lifecycle(&self, source: &str, kind: LifecycleKind, manual: bool) {
        self.events
            .send(InboundEvent::Lifecycle(LifecycleEvent {
                kind,
                source: source.into(),
                manual,
                at: OffsetDateTime::UNIX_EPOCH,
            }))
            .await
            .unwrap();
    }

    async fn next_delivery(&mut self) -> Delivery {
        self.deliveries.recv().await.unwrap()
    }

    async fn stop(self) -> mpsc::UnboundedReceiver<Delivery> {
        self.shutdown.send(true).unwrap();
        self.engine.await.unwrap();
        self.deliveries
    }
}

fn targets() -> TargetConfig {
    TargetConfig::new(true).with_source(
        "api",
        SourceConfig::new()
            .watch(LogKind::Stdout, FilterRule::default())
            .watch(LogKind::Stderr, FilterRule::default()),
    )
}

fn assert_elapsed(from: Instant, to: Instant, secs: u64) {
    let elapsed = to - from;
    assert!(
        elapsed >= Duration::from_secs(secs) && elapsed < Duration::from_secs(secs + 1),
        "expected ~{secs}s, got {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_batches_events_into_one_digest() {
    let mut harness = Harness::start(targets());

    for message in ["a", "b", "c"] {
        harness.log("api", LogKind::Stdout, message).await;
    }

    let delivery = harness.next_delivery().await;
    assert_elapsed(harness.started, delivery.at, 10);
    assert_eq!(delivery.mail.subject, None);
    assert_eq!(
        delivery.mail.body,
        MailBody::Html("Total: 3 messages\napi stdout: 3 messages\n\nabc".into())
    );

    let mut deliveries = harness.stop().await;
    assert!(deliveries.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_channels_flush_independently() {
    let mut harness = Harness::start(targets());

    harness.log("api", LogKind::Stdout, "out").await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    harness.log("api", LogKind::Stderr, "err").await;

    let first = harness.next_delivery().await;
    let second = harness.next_delivery().await;
    assert_elapsed(harness.started, first.at, 10);
    assert_elapsed(harness.started, second.at, 13);
    assert!(first.body().ends_with("out"));
    assert!(second.body().ends_with("err"));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_instant_burst_throttles_next_flush() {
    let mut harness = Harness::start(targets());

    // A crash dump: every line arrives at once.
    for i in 0..50 {
        harness.log("api", LogKind::Stderr, &format!("line {i}\n")).await;
    }

    let burst = harness.next_delivery().await;
    assert_elapsed(harness.started, burst.at, 10);
    assert!(burst.body().starts_with("Total: 50 messages\napi stderr: 50 messages"));

    // 50 arrivals inside the window: 10s * (50 / 10) * 6 = 300s.
    harness.log("api", LogKind::Stderr, "after\n").await;
    let throttled = harness.next_delivery().await;
    assert_elapsed(burst.at, throttled.at, 300);
    assert!(throttled.body().ends_with("after\n"));

    // That flush saw a single arrival, so the channel relaxes back to base.
    harness.log("api", LogKind::Stderr, "calm\n").await;
    let relaxed = harness.next_delivery().await;
    assert_elapsed(throttled.at, relaxed.at, 10);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_spread_over_window_counts_every_arrival() {
    let mut harness = Harness::start(targets());

    harness.log("api", LogKind::Stdout, "first\n").await;
    tokio::time::sleep(Duration::from_secs(9)).await;
    for i in 0..10 {
        harness.log("api", LogKind::Stdout, &format!("line {i}\n")).await;
    }

    let burst = harness.next_delivery().await;
    assert_elapsed(harness.started, burst.at, 10);

    // 11 arrivals inside the window: 10s * (11 / 10) * 6 = 66s.
    harness.log("api", LogKind::Stdout, "after\n").await;
    let throttled = harness.next_delivery().await;
    assert_elapsed(burst.at, throttled.at, 66);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_restart_is_never_notified() {
    let mut harness = Harness::start(targets());

    harness.lifecycle("api", LifecycleKind::Restart, true).await;
    harness.lifecycle("api", LifecycleKind::Exit, false).await;

    let delivery = harness.next_delivery().await;
    assert_eq!(delivery.mail.subject.as_deref(), Some("Process Error"));
    let MailBody::Text(body) = &delivery.mail.body else {
        panic!("lifecycle digests are plain text");
    };
    assert!(body.starts_with("Total: 1 process events\napi exit: 1\n\n["));
    assert!(!body.contains("restart"));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_filters_and_unknown_sources() {
    let (ignores, _) = PatternList::compile(["DEBUG"]);
    let targets = TargetConfig::new(true).with_source(
        "api",
        SourceConfig::new().watch(
            LogKind::Stdout,
            FilterRule {
                ignores,
                matches: None,
            },
        ),
    );
    let mut harness = Harness::start(targets);

    harness.log("cron", LogKind::Stdout, "unknown").await;
    harness.log("api", LogKind::Stderr, "unwatched").await;
    harness.log("api", LogKind::Stdout, "DEBUG noisy").await;
    harness.log("api", LogKind::Stdout, "ok").await;

    let delivery = harness.next_delivery().await;
    assert_eq!(
        delivery.body(),
        "Total: 1 messages\napi stdout: 1 messages\n\nok"
    );

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_fully_filtered_flush_sends_nothing() {
    let (matches, _) = PatternList::compile(["ERROR"]);
    let targets = TargetConfig::new(true).with_source(
        "api",
        SourceConfig::new().watch(
            LogKind::Stdout,
            FilterRule {
                ignores: None,
                matches,
            },
        ),
    );
    let mut harness = Harness::start(targets);

    harness.log("api", LogKind::Stdout, "INFO ok").await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    harness.log("api", LogKind::Stdout, "ERROR bad").await;

    let delivery = harness.next_delivery().await;
    assert_elapsed(harness.started, delivery.at, 21);
    assert!(delivery.body().ends_with("ERROR bad"));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failure_does_not_stall_channel() {
    let mut harness = Harness::start_with(targets(), 1, Duration::ZERO);

    harness.log("api", LogKind::Stdout, "lost").await;
    let failed = harness.next_delivery().await;
    assert!(failed.body().ends_with("lost"));

    harness.log("api", LogKind::Stdout, "kept").await;
    let delivered = harness.next_delivery().await;
    assert!(delivered.body().ends_with("kept"));
    assert!(!delivered.body().contains("lost"));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_entries_during_flush_rearm_after_completion() {
    let mut harness = Harness::start_with(targets(), 0, Duration::from_secs(5));

    harness.log("api", LogKind::Stdout, "a").await;
    tokio::time::sleep(Duration::from_secs(12)).await;
    // The first delivery is still in flight until t=15.
    harness.log("api", LogKind::Stdout, "b").await;

    let first = harness.next_delivery().await;
    let second = harness.next_delivery().await;
    assert_elapsed(harness.started, first.at, 10);
    assert_elapsed(harness.started, second.at, 25);
    assert!(second.body().ends_with("\n\nb"));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reload_swaps_targets() {
    let mut harness = Harness::start(targets());

    harness.store.update(TargetConfig::new(false).with_source(
        "worker",
        SourceConfig::new().watch(LogKind::Stderr, FilterRule::default()),
    ));
    harness.log("api", LogKind::Stderr, "gone").await;
    harness.lifecycle("worker", LifecycleKind::Exit, false).await;
    harness.log("worker", LogKind::Stderr, "boom").await;

    let delivery = harness.next_delivery().await;
    assert_eq!(
        delivery.body(),
        "Total: 1 messages\nworker stderr: 1 messages\n\nboom"
    );

    let mut deliveries = harness.stop().await;
    assert!(deliveries.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reload_drops_entries_of_removed_sources() {
    let mut harness = Harness::start(targets());

    harness.log("api", LogKind::Stdout, "queued before reload").await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    harness.store.update(TargetConfig::new(true).with_source(
        "worker",
        SourceConfig::new().watch(LogKind::Stdout, FilterRule::default()),
    ));
    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.log("worker", LogKind::Stdout, "kept").await;

    let delivery = harness.next_delivery().await;
    assert_elapsed(harness.started, delivery.at, 10);
    assert_eq!(
        delivery.body(),
        "Total: 1 messages\nworker stdout: 1 messages\n\nkept"
    );

    let mut deliveries = harness.stop().await;
    assert!(deliveries.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_pending_entries() {
    let harness = Harness::start(targets());

    harness.log("api", LogKind::Stdout, "pending").await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let mut deliveries = harness.stop().await;
    assert!(deliveries.try_recv().is_err());
}

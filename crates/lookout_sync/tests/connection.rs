use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use lookout_core::SessionStore;
use lookout_sync::{
    ConnectionManager, ConnectionState, MessageRouter, NotificationSink, OutboundFrame,
    SyncNotification, SyncSettings, Transport, TransportChannel, TransportError,
};
use tokio::sync::mpsc;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(sync_logging::initialize_for_tests);
}

/// Wires handed to the test when the transport accepts an open: push
/// inbound frames, observe outbound frames, and check for teardown.
struct Wires {
    inbound_tx: mpsc::UnboundedSender<Result<String, TransportError>>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

struct FakeChannel {
    inbound_rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportChannel for FakeChannel {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.outbound_tx
            .send(frame)
            .map_err(|_| TransportError::Io("peer gone".to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound_rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound_rx.close();
    }
}

/// Scripted transport: each open consumes one acceptance from the plan;
/// with the plan exhausted every open is refused.
#[derive(Default)]
struct FakeTransport {
    accepts: Mutex<VecDeque<FakeChannel>>,
    opened_urls: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues one accepted open and returns the test-side wires.
    fn plan_accept(&self) -> Wires {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.accepts.lock().unwrap().push_back(FakeChannel {
            inbound_rx,
            outbound_tx,
            closed: closed.clone(),
        });
        Wires {
            inbound_tx,
            outbound_rx,
            closed,
        }
    }

    fn open_count(&self) -> usize {
        self.opened_urls.lock().unwrap().len()
    }

    fn opened_urls(&self) -> Vec<String> {
        self.opened_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportChannel>, TransportError> {
        self.opened_urls.lock().unwrap().push(url.to_string());
        match self.accepts.lock().unwrap().pop_front() {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(TransportError::Open("connection refused".to_string())),
        }
    }
}

struct Harness {
    manager: ConnectionManager,
    store: Arc<Mutex<SessionStore>>,
    notifications: mpsc::UnboundedReceiver<SyncNotification>,
}

fn settings_for_tests() -> SyncSettings {
    SyncSettings {
        max_reconnect_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        // Deterministic delays under paused time.
        jitter_factor: 0.0,
        connect_timeout: Duration::from_secs(1),
        outbound_queue_limit: 8,
        ..SyncSettings::default()
    }
}

fn spawn(transport: Arc<FakeTransport>, settings: SyncSettings) -> Harness {
    init_logging();
    let store = Arc::new(Mutex::new(SessionStore::new()));
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn NotificationSink> =
        Arc::new(lookout_sync::ChannelNotificationSink::new(tx));
    let router = MessageRouter::new(store.clone(), sink.clone());
    let manager = ConnectionManager::spawn(settings, transport, router, sink);
    Harness {
        manager,
        store,
        notifications: rx,
    }
}

async fn wait_for_state(harness: &Harness, state: ConnectionState) {
    let mut rx = harness.manager.subscribe();
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if rx.borrow_and_update().state == state {
                return;
            }
            rx.changed().await.expect("actor alive");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached state {state}"));
}

fn drain(notifications: &mut mpsc::UnboundedReceiver<SyncNotification>) -> Vec<SyncNotification> {
    let mut out = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        out.push(notification);
    }
    out
}

fn stop_frame(id: &str) -> OutboundFrame {
    OutboundFrame::StopScrape {
        session_id: id.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn connect_reaches_connected_with_attempt_reset() {
    let transport = FakeTransport::new();
    let _wires = transport.plan_accept();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);

    let snapshot = harness.manager.state();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.attempt, 0);
    assert_eq!(snapshot.session_id.as_deref(), Some("s1"));
    assert!(transport.opened_urls()[0].ends_with("/ws/sessions/s1"));
}

#[tokio::test(start_paused = true)]
async fn empty_session_id_is_ignored() {
    let transport = FakeTransport::new();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("");
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(harness.manager.state().state, ConnectionState::Disconnected);
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_to_same_id_is_noop() {
    let transport = FakeTransport::new();
    let _wires = transport.plan_accept();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);
    harness.manager.connect("s1");
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(harness.manager.state().state, ConnectionState::Connected);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_to_new_id_tears_down_current_channel() {
    let transport = FakeTransport::new();
    let wires_a = transport.plan_accept();
    let _wires_b = transport.plan_accept();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("a");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);
    harness.manager.connect("b");

    tokio::time::timeout(Duration::from_secs(10), async {
        while transport.open_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second open");

    assert!(wires_a.closed.load(Ordering::SeqCst));
    assert!(transport.opened_urls()[1].ends_with("/ws/sessions/b"));
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);
    assert_eq!(harness.manager.state().session_id.as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_flow_into_the_store() {
    let transport = FakeTransport::new();
    let wires = transport.plan_accept();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);

    wires
        .inbound_tx
        .send(Ok(
            r#"{"type":"status_update","session_id":"s1","data":{"pages_scraped":12}}"#.to_string(),
        ))
        .unwrap();
    wires
        .inbound_tx
        .send(Ok(
            r#"{"type":"status_update","session_id":"s1","data":{"pages_scraped":10}}"#.to_string(),
        ))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if harness
                .store
                .lock()
                .unwrap()
                .get("s1")
                .is_some_and(|s| s.progress.pages_scraped > 0)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("store updated");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Out-of-order frame could not regress the counter.
    assert_eq!(
        harness.store.lock().unwrap().get("s1").unwrap().progress.pages_scraped,
        12
    );
}

#[tokio::test(start_paused = true)]
async fn sends_while_disconnected_flush_once_in_order() {
    let transport = FakeTransport::new();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.send(&stop_frame("f1"));
    harness.manager.send(&stop_frame("f2"));
    harness.manager.send(&stop_frame("f3"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut wires = transport.plan_accept();
    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);

    let mut sent = Vec::new();
    for _ in 0..3 {
        let frame = tokio::time::timeout(Duration::from_secs(5), wires.outbound_rx.recv())
            .await
            .expect("flushed frame")
            .unwrap();
        sent.push(frame);
    }
    assert!(sent[0].contains("f1"));
    assert!(sent[1].contains("f2"));
    assert!(sent[2].contains("f3"));

    // Exactly once: nothing further shows up.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(wires.outbound_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn outbound_queue_drops_oldest_when_full() {
    let transport = FakeTransport::new();
    let settings = SyncSettings {
        outbound_queue_limit: 2,
        ..settings_for_tests()
    };
    let harness = spawn(transport.clone(), settings);

    harness.manager.send(&stop_frame("f1"));
    harness.manager.send(&stop_frame("f2"));
    harness.manager.send(&stop_frame("f3"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut wires = transport.plan_accept();
    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);

    let first = tokio::time::timeout(Duration::from_secs(5), wires.outbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), wires.outbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(first.contains("f2"));
    assert!(second.contains("f3"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(wires.outbound_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_transport_loss_and_resets_attempts() {
    let transport = FakeTransport::new();
    let wires_first = transport.plan_accept();
    let _wires_second = transport.plan_accept();
    let mut harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);
    drain(&mut harness.notifications);

    // Backend side drops the channel.
    drop(wires_first.inbound_tx);
    wait_for_state(&harness, ConnectionState::Reconnecting).await;
    wait_for_state(&harness, ConnectionState::Connected).await;

    let snapshot = harness.manager.state();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.attempt, 0);
    assert_eq!(transport.open_count(), 2);

    let lifecycle = drain(&mut harness.notifications);
    assert!(lifecycle.iter().any(|n| matches!(
        n,
        SyncNotification::Lifecycle { state: ConnectionState::Reconnecting, attempt: 1 }
    )));
}

#[tokio::test(start_paused = true)]
async fn gives_up_with_error_state_after_max_attempts() {
    let transport = FakeTransport::new();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("s1");
    wait_for_state(&harness, ConnectionState::Error).await;

    // Initial connect plus three reconnect attempts.
    assert_eq!(transport.open_count(), 4);
    assert_eq!(harness.manager.state().attempt, 3);

    // Terminal: no further automatic attempt is ever scheduled.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.open_count(), 4);

    // An explicit user-triggered connect starts over.
    let _wires = transport.plan_accept();
    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect_timer() {
    let transport = FakeTransport::new();
    let settings = SyncSettings {
        base_delay: Duration::from_secs(60),
        ..settings_for_tests()
    };
    let harness = spawn(transport.clone(), settings);

    harness.manager.connect("s1");
    wait_for_state(&harness, ConnectionState::Reconnecting).await;
    harness.manager.disconnect();
    wait_for_state(&harness, ConnectionState::Disconnected).await;

    // The backoff timer died with the disconnect.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_during_backoff_restarts_immediately() {
    let transport = FakeTransport::new();
    let settings = SyncSettings {
        base_delay: Duration::from_secs(60),
        ..settings_for_tests()
    };
    let mut harness = spawn(transport.clone(), settings);

    harness.manager.connect("s1");
    wait_for_state(&harness, ConnectionState::Reconnecting).await;
    drain(&mut harness.notifications);

    let _wires = transport.plan_accept();
    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);

    // The fresh connect cancelled the timer and went through Connecting,
    // not through the scheduled reconnect.
    let lifecycle = drain(&mut harness.notifications);
    assert!(lifecycle.iter().any(|n| matches!(
        n,
        SyncNotification::Lifecycle { state: ConnectionState::Connecting, attempt: 0 }
    )));
}

#[tokio::test(start_paused = true)]
async fn disconnect_then_connect_leaves_single_live_channel() {
    let transport = FakeTransport::new();
    let wires_first = transport.plan_accept();
    let _wires_second = transport.plan_accept();
    let harness = spawn(transport.clone(), settings_for_tests());

    harness.manager.connect("s1");
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);

    harness.manager.disconnect();
    harness.manager.connect("s1");
    tokio::time::timeout(Duration::from_secs(10), async {
        while transport.open_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second open");

    // The first channel was torn down before the second came up.
    assert!(wires_first.closed.load(Ordering::SeqCst));
    assert!(harness.manager.wait_until_connected(Duration::from_secs(5)).await);
    assert_eq!(transport.open_count(), 2);
}

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use sync_logging::{sync_debug, sync_error, sync_info, sync_warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use lookout_core::SessionId;

use crate::backoff;
use crate::notify::{NotificationSink, SyncNotification};
use crate::protocol::{encode_frame, OutboundFrame};
use crate::router::MessageRouter;
use crate::settings::SyncSettings;
use crate::transport::{Transport, TransportChannel};
use crate::types::{ConnectionSnapshot, ConnectionState};

enum Command {
    Connect { session_id: SessionId },
    Disconnect,
    Send { frame: String },
}

/// Handle to the connection actor that owns the transport and the
/// connection state machine.
///
/// All operations are non-blocking command sends; the actor advances the
/// state machine from transport events and timer completions only. Failures
/// surface as lifecycle notifications, never as errors to callers.
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionManager {
    pub fn spawn(
        settings: SyncSettings,
        transport: Arc<dyn Transport>,
        router: MessageRouter,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());
        let actor = Actor {
            settings,
            transport,
            router,
            sink,
            cmd_rx,
            snapshot_tx,
            queue: VecDeque::new(),
        };
        tokio::spawn(actor.run());
        Self {
            cmd_tx,
            snapshot_rx,
        }
    }

    /// Opens the channel for `session_id`, cancelling any pending reconnect
    /// timer. A no-op while already connected to the same id; a different id
    /// tears the current connection down first.
    pub fn connect(&self, session_id: &str) {
        if session_id.is_empty() {
            sync_warn!("ignoring connect with empty session id");
            return;
        }
        let _ = self.cmd_tx.send(Command::Connect {
            session_id: session_id.to_string(),
        });
    }

    /// Closes the channel and cancels all pending timers.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Writes the frame immediately when connected, otherwise queues it for
    /// replay on reconnect (bounded, drop-oldest).
    pub fn send(&self, frame: &OutboundFrame) {
        match encode_frame(frame) {
            Ok(text) => {
                let _ = self.cmd_tx.send(Command::Send { frame: text });
            }
            Err(err) => sync_error!("dropping outbound frame: {}", err),
        }
    }

    pub fn state(&self) -> ConnectionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Waits for the next `Connected` transition, up to `timeout`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.snapshot_rx.clone();
        let wait = async move {
            loop {
                if rx.borrow_and_update().state == ConnectionState::Connected {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

enum SessionExit {
    Disconnected,
    Switch(SessionId),
    Failed,
    Shutdown,
}

enum PumpExit {
    Lost,
    Disconnect,
    Switch(SessionId),
    Shutdown,
}

enum WaitExit {
    Elapsed,
    Reconnect,
    Switch(SessionId),
    Disconnect,
    Shutdown,
}

struct Actor {
    settings: SyncSettings,
    transport: Arc<dyn Transport>,
    router: MessageRouter,
    sink: Arc<dyn NotificationSink>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
    queue: VecDeque<String>,
}

impl Actor {
    async fn run(mut self) {
        let mut pending: Option<SessionId> = None;
        loop {
            let session_id = match pending.take() {
                Some(id) => id,
                None => match self.cmd_rx.recv().await {
                    None => return,
                    Some(Command::Connect { session_id }) => session_id,
                    Some(Command::Send { frame }) => {
                        self.enqueue(frame);
                        continue;
                    }
                    // No connection to close; this also clears a terminal
                    // error state back to disconnected.
                    Some(Command::Disconnect) => {
                        self.publish_idle();
                        continue;
                    }
                },
            };
            match self.run_session(session_id).await {
                SessionExit::Switch(next) => pending = Some(next),
                SessionExit::Disconnected | SessionExit::Failed => {}
                SessionExit::Shutdown => return,
            }
        }
    }

    /// Drives one session id until explicit disconnect, a switch to another
    /// id, or reconnection gives up.
    async fn run_session(&mut self, session_id: SessionId) -> SessionExit {
        // 0 on the initial connect, then the 1-based reconnect attempt.
        let mut attempt: u32 = 0;
        loop {
            if attempt == 0 {
                self.publish(&session_id, ConnectionState::Connecting, 0);
            } else {
                if attempt > self.settings.max_reconnect_attempts {
                    sync_error!(
                        "giving up on session {} after {} reconnect attempts",
                        session_id,
                        attempt - 1
                    );
                    self.publish(&session_id, ConnectionState::Error, attempt - 1);
                    return SessionExit::Failed;
                }
                self.publish(&session_id, ConnectionState::Reconnecting, attempt);
                match self.backoff_wait(&session_id, attempt).await {
                    WaitExit::Elapsed => {}
                    WaitExit::Reconnect => {
                        attempt = 0;
                        continue;
                    }
                    WaitExit::Switch(next) => return SessionExit::Switch(next),
                    WaitExit::Disconnect => {
                        self.publish_idle();
                        return SessionExit::Disconnected;
                    }
                    WaitExit::Shutdown => return SessionExit::Shutdown,
                }
            }

            let url = self.settings.channel_url(&session_id);
            let opened = tokio::time::timeout(
                self.settings.connect_timeout,
                self.transport.open(&url),
            )
            .await;
            let mut channel = match opened {
                Ok(Ok(channel)) => channel,
                Ok(Err(err)) => {
                    sync_warn!("channel open failed for {}: {}", session_id, err);
                    attempt += 1;
                    continue;
                }
                Err(_) => {
                    sync_warn!("channel open timed out for {}", session_id);
                    attempt += 1;
                    continue;
                }
            };

            sync_info!("channel open for session {}", session_id);
            self.publish(&session_id, ConnectionState::Connected, 0);
            attempt = 0;

            if !self.flush_queue(channel.as_mut()).await {
                attempt = 1;
                continue;
            }
            match self.pump(&session_id, channel.as_mut()).await {
                PumpExit::Lost => {
                    attempt = 1;
                    continue;
                }
                PumpExit::Disconnect => {
                    self.publish_idle();
                    return SessionExit::Disconnected;
                }
                PumpExit::Switch(next) => return SessionExit::Switch(next),
                PumpExit::Shutdown => return SessionExit::Shutdown,
            }
        }
    }

    /// Sleeps out the backoff delay while staying responsive to commands.
    /// At most one timer exists at a time; any command that changes course
    /// cancels it.
    async fn backoff_wait(&mut self, session_id: &str, attempt: u32) -> WaitExit {
        let delay = backoff::delay_for_attempt(
            attempt - 1,
            self.settings.base_delay,
            self.settings.max_delay,
            self.settings.jitter_factor,
        );
        sync_debug!(
            "reconnect attempt {} for {} in {:?}",
            attempt,
            session_id,
            delay
        );
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return WaitExit::Elapsed,
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return WaitExit::Shutdown,
                    Some(Command::Disconnect) => return WaitExit::Disconnect,
                    Some(Command::Connect { session_id: next }) => {
                        if next == session_id {
                            return WaitExit::Reconnect;
                        }
                        return WaitExit::Switch(next);
                    }
                    Some(Command::Send { frame }) => self.enqueue(frame),
                },
            }
        }
    }

    /// Multiplexes inbound frames and commands while connected.
    async fn pump(&mut self, session_id: &str, channel: &mut dyn TransportChannel) -> PumpExit {
        loop {
            tokio::select! {
                inbound = channel.next_frame() => match inbound {
                    Some(Ok(raw)) => self.router.route(&raw),
                    Some(Err(err)) => {
                        sync_warn!("channel error for {}: {}", session_id, err);
                        return PumpExit::Lost;
                    }
                    None => {
                        sync_info!("channel closed by backend for {}", session_id);
                        return PumpExit::Lost;
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    None => {
                        channel.close().await;
                        return PumpExit::Shutdown;
                    }
                    Some(Command::Disconnect) => {
                        channel.close().await;
                        return PumpExit::Disconnect;
                    }
                    Some(Command::Connect { session_id: next }) => {
                        if next == session_id {
                            sync_debug!("already connected to {}", session_id);
                        } else {
                            channel.close().await;
                            return PumpExit::Switch(next);
                        }
                    }
                    Some(Command::Send { frame }) => {
                        if let Err(err) = channel.send(frame.clone()).await {
                            sync_warn!("send failed, queueing frame for replay: {}", err);
                            self.enqueue(frame);
                            return PumpExit::Lost;
                        }
                    }
                },
            }
        }
    }

    /// Replays queued outbound frames in enqueue order. A failed send keeps
    /// the frame at the head for the next reconnect.
    async fn flush_queue(&mut self, channel: &mut dyn TransportChannel) -> bool {
        while let Some(frame) = self.queue.pop_front() {
            if let Err(err) = channel.send(frame.clone()).await {
                sync_warn!("flush failed, re-queueing frame: {}", err);
                self.queue.push_front(frame);
                return false;
            }
        }
        true
    }

    fn enqueue(&mut self, frame: String) {
        if self.queue.len() >= self.settings.outbound_queue_limit {
            self.queue.pop_front();
            sync_warn!("outbound queue full, dropping oldest frame");
        }
        self.queue.push_back(frame);
    }

    fn publish(&self, session_id: &str, state: ConnectionState, attempt: u32) {
        self.publish_snapshot(ConnectionSnapshot {
            state,
            attempt,
            session_id: Some(session_id.to_string()),
        });
    }

    fn publish_idle(&self) {
        self.publish_snapshot(ConnectionSnapshot::default());
    }

    fn publish_snapshot(&self, snapshot: ConnectionSnapshot) {
        if *self.snapshot_tx.borrow() == snapshot {
            return;
        }
        self.sink.notify(SyncNotification::Lifecycle {
            state: snapshot.state,
            attempt: snapshot.attempt,
        });
        self.snapshot_tx.send_replace(snapshot);
    }
}

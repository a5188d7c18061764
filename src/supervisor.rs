//! Connection supervisor: owns the single live connection, its reconnect
//! state machine and the backoff policy.
//!
//! The supervisor runs as one driver task. Every public call is turned into a
//! command for that task, so state transitions are strictly serialized and
//! observers see each one exactly once, in order.

use crate::error::AppError;
use crate::ws::protocol::ClientFrame;
use crate::ws::router::Router;
use crate::ws::transport::{Connector, Link, LinkEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Observable connection status. `unreachable` is the terminal give-up flag;
/// it stays set until a manual connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempts: u32,
    pub unreachable: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            unreachable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Transitions a subscriber may fall behind by before it sees
/// `RecvError::Lagged`.
pub const TRANSITION_BUFFER: usize = 256;

/// Reconnect policy: `delay(n) = min(cap, base * 2^n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub base_ms: u64,
    pub cap_ms: u64,
    /// Automatic reconnect attempts before giving up
    pub max_attempts: u32,
    /// An attempt that has not opened by then counts as failed
    pub connect_timeout_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            cap_ms: 15000,
            max_attempts: 10,
            connect_timeout_ms: 10000,
        }
    }
}

impl Backoff {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }
}

pub type OnConnected = Box<dyn FnOnce() + Send>;

enum Command {
    Connect { on_connected: Option<OnConnected> },
    Disconnect,
    Send(String),
    Shutdown,
}

/// Cheap, cloneable access to a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<Transition>,
}

impl SupervisorHandle {
    /// Open the live connection unless one is open or being opened.
    ///
    /// From the disconnected or given-up state this is a manual connect: the
    /// attempt counter is reset first.
    pub fn connect(&self) {
        self.command(Command::Connect { on_connected: None });
    }

    /// Like [`connect`](Self::connect), running `on_connected` once the
    /// connection opens. While already connected the callback is discarded.
    pub fn connect_then<F>(&self, on_connected: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.command(Command::Connect {
            on_connected: Some(Box::new(on_connected)),
        });
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Fire-and-forget text frame. Dropped with a warning when not connected.
    pub fn send(&self, frame: String) {
        self.command(Command::Send(frame));
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Every state transition, in order.
    ///
    /// The channel holds [`TRANSITION_BUFFER`] transitions. A receiver that
    /// falls further behind gets `RecvError::Lagged` and should resync from
    /// [`watch_status`](Self::watch_status).
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.events.subscribe()
    }

    fn command(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!("connection supervisor already stopped; command ignored");
        }
    }
}

/// Owner of the driver task. Dropping it aborts the task.
pub struct Supervisor {
    handle: SupervisorHandle,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn spawn(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        backoff: Backoff,
        router: Router,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (events_tx, _) = broadcast::channel(TRANSITION_BUFFER);

        let driver = Driver {
            url: url.into(),
            connector,
            backoff,
            router,
            commands: commands_rx,
            status: status_tx,
            events: events_tx.clone(),
            state: ConnectionState::Disconnected,
            attempts: 0,
            unreachable: false,
            on_connected: None,
        };
        let task = tokio::spawn(driver.run());

        Self {
            handle: SupervisorHandle {
                commands: commands_tx,
                status: status_rx,
                events: events_tx,
            },
            task: Some(task),
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Close the connection, stop the driver and wait for it to finish.
    pub async fn dispose(mut self) {
        self.handle.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("connection supervisor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Phase {
    Idle,
    Connecting,
    Connected(Link),
    Waiting(Instant),
    Stopped,
}

struct Driver {
    url: String,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    router: Router,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<Transition>,
    state: ConnectionState,
    attempts: u32,
    unreachable: bool,
    on_connected: Option<OnConnected>,
}

impl Driver {
    async fn run(mut self) {
        info!("Connection supervisor started for {}", self.url);
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Connected(link) => self.connected(link).await,
                Phase::Waiting(deadline) => self.waiting(deadline).await,
                Phase::Stopped => break,
            };
        }
        info!("Connection supervisor stopped");
    }

    /// Disconnected with nothing scheduled: either never started, manually
    /// disconnected, or given up.
    async fn idle(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                None | Some(Command::Shutdown) => return Phase::Stopped,
                Some(Command::Connect { on_connected }) => {
                    self.on_connected = on_connected;
                    self.attempts = 0;
                    self.unreachable = false;
                    return self.begin_attempt();
                }
                Some(Command::Disconnect) => debug!("disconnect ignored: not connected"),
                Some(Command::Send(_)) => warn!("not connected; outbound frame dropped"),
            }
        }
    }

    async fn connecting(&mut self) -> Phase {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let limit = self.backoff.connect_timeout();
        let attempt = tokio::time::timeout(limit, connector.connect(&url));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    let error = match result {
                        Ok(Ok(link)) => return self.opened(link),
                        Ok(Err(e)) => e,
                        Err(_) => AppError::Timeout(limit.as_millis() as u64),
                    };
                    warn!(attempt = self.attempts, "connection attempt failed: {}", error);
                    self.transition(ConnectionState::Disconnected);
                    return self.schedule_retry();
                }
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        self.transition(ConnectionState::Disconnected);
                        return Phase::Stopped;
                    }
                    Some(Command::Disconnect) => {
                        info!("connection attempt cancelled by disconnect");
                        self.transition(ConnectionState::Disconnected);
                        return Phase::Idle;
                    }
                    Some(Command::Connect { on_connected }) => {
                        debug!("connect ignored: attempt already in progress");
                        if on_connected.is_some() {
                            self.on_connected = on_connected;
                        }
                    }
                    Some(Command::Send(_)) => warn!("not connected yet; outbound frame dropped"),
                },
            }
        }
    }

    fn opened(&mut self, link: Link) -> Phase {
        self.attempts = 0;
        self.unreachable = false;
        self.transition(ConnectionState::Connected);

        // Handshake goes out before any inbound frame is processed
        match ClientFrame::hello().to_json() {
            Ok(hello) => {
                if let Err(e) = link.send(hello) {
                    warn!("handshake not sent: {}", e);
                }
            }
            Err(e) => warn!("failed to encode handshake: {}", e),
        }

        if let Some(callback) = self.on_connected.take() {
            callback();
        }
        Phase::Connected(link)
    }

    async fn connected(&mut self, mut link: Link) -> Phase {
        loop {
            tokio::select! {
                event = link.recv() => match event {
                    Some(LinkEvent::Frame(raw)) => {
                        self.router.route(&raw);
                    }
                    Some(LinkEvent::Closed(reason)) => {
                        warn!("live channel closed: {}", reason.as_deref().unwrap_or("no reason"));
                        self.transition(ConnectionState::Disconnected);
                        return self.schedule_retry();
                    }
                    None => {
                        warn!("live channel transport ended");
                        self.transition(ConnectionState::Disconnected);
                        return self.schedule_retry();
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        self.close(link);
                        return Phase::Stopped;
                    }
                    Some(Command::Disconnect) => {
                        info!("live channel disconnected manually");
                        self.close(link);
                        return Phase::Idle;
                    }
                    Some(Command::Connect { .. }) => debug!("connect ignored: already connected"),
                    Some(Command::Send(frame)) => {
                        if let Err(e) = link.send(frame) {
                            warn!("outbound frame dropped: {}", e);
                        }
                    }
                },
            }
        }
    }

    async fn waiting(&mut self, deadline: Instant) -> Phase {
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => return self.begin_attempt(),
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => return Phase::Stopped,
                    Some(Command::Disconnect) => {
                        info!("pending reconnect cancelled");
                        return Phase::Idle;
                    }
                    Some(Command::Connect { on_connected }) => {
                        if on_connected.is_some() {
                            self.on_connected = on_connected;
                        }
                        self.attempts = 0;
                        return self.begin_attempt();
                    }
                    Some(Command::Send(_)) => warn!("not connected; outbound frame dropped"),
                },
            }
        }
    }

    fn begin_attempt(&mut self) -> Phase {
        self.transition(ConnectionState::Connecting);
        Phase::Connecting
    }

    fn close(&mut self, link: Link) {
        self.transition(ConnectionState::Closing);
        drop(link);
        self.transition(ConnectionState::Disconnected);
    }

    fn schedule_retry(&mut self) -> Phase {
        if self.attempts >= self.backoff.max_attempts {
            error!(
                "{}; live channel unreachable until a manual reconnect",
                AppError::ExhaustedRetries(self.attempts)
            );
            self.unreachable = true;
            self.publish_status();
            return Phase::Idle;
        }

        let delay = self.backoff.delay(self.attempts);
        self.attempts += 1;
        info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.publish_status();
        Phase::Waiting(Instant::now() + delay)
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(?from, ?to, "connection state changed");
        // Err only means nobody is subscribed
        let _ = self.events.send(Transition { from, to });
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(ConnectionStatus {
            state: self.state,
            attempts: self.attempts,
            unreachable: self.unreachable,
        });
    }
}

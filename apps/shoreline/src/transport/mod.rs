pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::protocol::{Frame, FrameCodec, Inbound, WireMessage};
use crate::telemetry::logging::hexdump;

pub use memory::{MemoryConnector, MemoryHost, MemoryPeer};
pub use websocket::WebSocketConnector;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        })
    }
}

/// One established physical connection.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Next message from the host. `None` once the host closed the link.
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>>;

    async fn close(&mut self);
}

/// Opens links to an endpoint; called again for every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn Link>, TransportError>;
}

/// Fixed delay between connection attempts, retried forever. Jitter is off
/// unless configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let max = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=max);
        self.delay + Duration::from_millis(extra)
    }
}

#[derive(Debug)]
pub enum TransportCommand {
    Send(Frame),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting { attempt: u64 },
    /// `resumed` is true when a previous connection had been open.
    Connected { resumed: bool },
    Disconnected { reason: String },
    Frame(Frame),
    /// Inbound bytes that did not decode as a frame.
    Raw(Vec<u8>),
}

/// Cheap, cloneable front door to a running [`TransportConnection`].
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    /// Hands a frame to the connection loop. It goes out immediately when the
    /// connection is open and is queued otherwise. Returns false only when
    /// the loop has shut down.
    pub fn send(&self, frame: Frame) -> bool {
        match self.commands.send(TransportCommand::Send(frame)) {
            Ok(()) => true,
            Err(err) => {
                if let TransportCommand::Send(frame) = err.0 {
                    debug!(
                        target: "shoreline::transport",
                        kind = frame.kind(),
                        session_id = frame.session_id(),
                        "transport stopped; dropping frame"
                    );
                }
                false
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(TransportCommand::Shutdown);
    }

    /// A handle with no connection loop behind it. Commands land on the
    /// returned receiver, which makes it useful for driving a workspace
    /// without a network.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (_state_tx, state) = watch::channel(ConnectionState::Closed);
        (Self { commands, state }, receiver)
    }
}

enum Flow {
    Reconnect(String),
    Shutdown,
}

/// Owns the physical connection and the queue of frames waiting for it.
pub struct TransportConnection {
    endpoint: Url,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    codec: FrameCodec,
    pending: VecDeque<Frame>,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    attempts: u64,
    opened_before: bool,
}

impl TransportConnection {
    pub fn new(
        endpoint: Url,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (
        Self,
        TransportHandle,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let connection = Self {
            endpoint,
            connector,
            policy,
            codec: FrameCodec::new(),
            pending: VecDeque::new(),
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            attempts: 0,
            opened_before: false,
        };
        let handle = TransportHandle {
            commands: command_tx,
            state: state_rx,
        };
        (connection, handle, event_rx)
    }

    /// Starts the connection loop on the current tokio runtime.
    pub fn spawn(
        endpoint: Url,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (
        TransportHandle,
        mpsc::UnboundedReceiver<TransportEvent>,
        JoinHandle<()>,
    ) {
        let (connection, handle, events) = Self::new(endpoint, connector, policy);
        let task = tokio::spawn(connection.run());
        (handle, events, task)
    }

    pub async fn run(mut self) {
        loop {
            self.attempts += 1;
            self.set_state(ConnectionState::Connecting);
            self.emit(TransportEvent::Connecting {
                attempt: self.attempts,
            });
            debug!(
                target: "shoreline::transport",
                endpoint = %self.endpoint,
                attempt = self.attempts,
                "connecting"
            );

            let connector = Arc::clone(&self.connector);
            let endpoint = self.endpoint.clone();
            let mut connect = connector.connect(&endpoint);
            let outcome = loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    command = self.commands.recv() => match command {
                        Some(TransportCommand::Send(frame)) => self.enqueue(frame),
                        Some(TransportCommand::Shutdown) | None => break None,
                    },
                }
            };

            let reason = match outcome {
                None => break,
                Some(Ok(link)) => match self.serve(link).await {
                    Flow::Shutdown => break,
                    Flow::Reconnect(reason) => reason,
                },
                Some(Err(err)) => {
                    warn!(
                        target: "shoreline::transport",
                        endpoint = %self.endpoint,
                        attempt = self.attempts,
                        error = %err,
                        "connection attempt failed"
                    );
                    err.to_string()
                }
            };

            self.set_state(ConnectionState::Closed);
            self.emit(TransportEvent::Disconnected { reason });
            if !self.wait_for_retry().await {
                break;
            }
        }

        self.set_state(ConnectionState::Closed);
        debug!(
            target: "shoreline::transport",
            dropped = self.pending.len(),
            "transport loop stopped"
        );
    }

    async fn serve(&mut self, mut link: Box<dyn Link>) -> Flow {
        let resumed = self.opened_before;
        self.opened_before = true;
        self.set_state(ConnectionState::Open);
        info!(
            target: "shoreline::transport",
            endpoint = %self.endpoint,
            resumed,
            queued = self.pending.len(),
            "connection open"
        );
        self.emit(TransportEvent::Connected { resumed });

        if let Err(err) = self.flush(link.as_mut()).await {
            return Flow::Reconnect(err.to_string());
        }

        loop {
            tokio::select! {
                inbound = link.recv() => match inbound {
                    Some(Ok(message)) => self.dispatch(message),
                    Some(Err(err)) => {
                        warn!(
                            target: "shoreline::transport",
                            error = %err,
                            "connection error"
                        );
                        return Flow::Reconnect(err.to_string());
                    }
                    None => {
                        info!(target: "shoreline::transport", "connection closed by host");
                        return Flow::Reconnect("closed by host".to_string());
                    }
                },
                command = self.commands.recv() => match command {
                    Some(TransportCommand::Send(frame)) => {
                        if let Err(err) = self.transmit(link.as_mut(), frame).await {
                            return Flow::Reconnect(err.to_string());
                        }
                    }
                    Some(TransportCommand::Shutdown) | None => {
                        link.close().await;
                        return Flow::Shutdown;
                    }
                },
            }
        }
    }

    async fn flush(&mut self, link: &mut dyn Link) -> Result<(), TransportError> {
        while let Some(frame) = self.pending.pop_front() {
            self.transmit(link, frame).await?;
        }
        Ok(())
    }

    /// Writes one frame. A frame whose write fails goes back to the head of
    /// the queue so the next connection sends it first.
    async fn transmit(&mut self, link: &mut dyn Link, frame: Frame) -> Result<(), TransportError> {
        let text = match self.codec.encode(&frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    target: "shoreline::transport",
                    kind = frame.kind(),
                    error = %err,
                    "dropping unencodable frame"
                );
                return Ok(());
            }
        };
        trace!(
            target: "shoreline::transport",
            kind = frame.kind(),
            session_id = frame.session_id(),
            bytes = text.len(),
            "send"
        );
        if let Err(err) = link.send(WireMessage::Text(text)).await {
            self.pending.push_front(frame);
            return Err(err);
        }
        Ok(())
    }

    fn dispatch(&mut self, message: WireMessage) {
        match self.codec.classify(message) {
            Inbound::Frame(frame) => {
                trace!(
                    target: "shoreline::transport",
                    kind = frame.kind(),
                    session_id = frame.session_id(),
                    "recv"
                );
                self.emit(TransportEvent::Frame(frame));
            }
            Inbound::Raw(bytes) => {
                trace!(
                    target: "shoreline::transport",
                    bytes = bytes.len(),
                    dump = %hexdump(&bytes),
                    "undecodable message; passing through raw"
                );
                self.emit(TransportEvent::Raw(bytes));
            }
        }
    }

    /// Sleeps out the reconnect delay while still accepting frames. Returns
    /// false when asked to shut down.
    async fn wait_for_retry(&mut self) -> bool {
        let delay = self.policy.next_delay();
        debug!(
            target: "shoreline::transport",
            delay_ms = delay.as_millis() as u64,
            queued = self.pending.len(),
            "reconnect scheduled"
        );
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(TransportCommand::Send(frame)) => self.enqueue(frame),
                    Some(TransportCommand::Shutdown) | None => return false,
                },
            }
        }
    }

    fn enqueue(&mut self, frame: Frame) {
        trace!(
            target: "shoreline::transport",
            kind = frame.kind(),
            session_id = frame.session_id(),
            queued = self.pending.len() + 1,
            "queued while not open"
        );
        self.pending.push_back(frame);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::input::InputRouter;
use crate::protocol::{SessionId, SessionStatus};
use crate::session::{RegistryError, RegistryOptions, RouteOutcome, SessionRegistry};
use crate::transport::{ConnectionState, TransportEvent, TransportHandle};

const EVENT_CAPACITY: usize = 256;

/// Display surface for the active session.
pub trait Renderer: Send {
    fn write(&mut self, bytes: &[u8]);

    /// Clears the display before another session's output is replayed.
    fn reset(&mut self) {}
}

/// Notifications for surrounding UI (tab badges, connection indicator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    SessionCreated { session_id: SessionId, name: String },
    SessionClosed { session_id: SessionId },
    ActiveChanged { session_id: SessionId },
    StatusChanged { session_id: SessionId, status: SessionStatus },
    /// The host repeated a status we already had, e.g. after a resume.
    StatusConfirmed { session_id: SessionId, status: SessionStatus },
    WorkingDirectoryChanged { session_id: SessionId, path: String },
    Connection(ConnectionState),
    /// Reconnected after a previous connection; statuses are unconfirmed
    /// until the host reports them again.
    Resumed,
    CloseRejected { session_id: SessionId, reason: String },
}

/// Requests the workspace loop accepts from the UI side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Keystroke(Vec<u8>),
    CreateSession(Option<String>),
    Close(SessionId),
    CloseActive,
    SetActive(SessionId),
    Select(usize),
    Next,
    Previous,
    SendCommand(String),
    Restart(SessionId),
    RestartActive,
    Shutdown,
}

/// Everything a client has open against one project: the sessions, the
/// keystroke router, the renderer, and the transport they share.
pub struct Workspace<R: Renderer> {
    registry: SessionRegistry,
    router: InputRouter,
    renderer: R,
    events: broadcast::Sender<WorkspaceEvent>,
}

impl<R: Renderer> Workspace<R> {
    pub fn new(transport: TransportHandle, options: RegistryOptions, renderer: R) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry: SessionRegistry::new(transport, options),
            router: InputRouter::new(),
            renderer,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn create_session(&mut self, name: Option<&str>) -> SessionId {
        let id = self.registry.create_session(name);
        let name = self
            .registry
            .get(&id)
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| id.clone());
        self.emit(WorkspaceEvent::SessionCreated {
            session_id: id.clone(),
            name,
        });
        self.show_active();
        id
    }

    pub fn close_session(&mut self, id: &str) -> Result<(), RegistryError> {
        let was_active = self.registry.active_id() == id;
        if let Err(err) = self.registry.close_session(id) {
            self.emit(WorkspaceEvent::CloseRejected {
                session_id: id.to_string(),
                reason: err.to_string(),
            });
            return Err(err);
        }
        self.emit(WorkspaceEvent::SessionClosed {
            session_id: id.to_string(),
        });
        if was_active {
            self.show_active();
        }
        Ok(())
    }

    pub fn close_active(&mut self) -> Result<(), RegistryError> {
        let id = self.registry.active_id().to_string();
        self.close_session(&id)
    }

    /// Switches sessions and replays the new one's buffered output. Unknown
    /// ids are ignored.
    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.registry.set_active(id) {
            return false;
        }
        self.show_active();
        true
    }

    pub fn select(&mut self, index: usize) -> bool {
        if !self.registry.set_active_index(index) {
            return false;
        }
        self.show_active();
        true
    }

    pub fn next(&mut self) -> bool {
        let len = self.registry.len();
        self.select((self.registry.active_index() + 1) % len)
    }

    pub fn previous(&mut self) -> bool {
        let len = self.registry.len();
        self.select((self.registry.active_index() + len - 1) % len)
    }

    /// Runs a command line in the active session as if it had been typed.
    pub fn send_command(&mut self, text: &str) -> bool {
        let command = text.trim();
        if command.is_empty() {
            return false;
        }
        let id = self.registry.active_id().to_string();
        self.registry.active_mut().history_mut().append(command);
        self.registry.send_input(&id, format!("{command}\r"))
    }

    pub fn restart_session(&mut self, id: &str) -> Result<(), RegistryError> {
        self.registry.restart(id)
    }

    pub fn handle_keystroke(&mut self, bytes: &[u8]) {
        let id = self.registry.active_id().to_string();
        if let Some(payload) = self.router.route(self.registry.active_mut(), bytes) {
            self.registry.send_input(&id, payload);
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting { attempt } => {
                debug!(target: "shoreline::workspace", attempt, "connecting");
                self.emit(WorkspaceEvent::Connection(ConnectionState::Connecting));
            }
            TransportEvent::Connected { resumed } => {
                self.emit(WorkspaceEvent::Connection(ConnectionState::Open));
                if resumed {
                    info!(
                        target: "shoreline::workspace",
                        sessions = self.registry.len(),
                        "connection resumed; awaiting fresh session status"
                    );
                    self.registry.mark_all_unconfirmed();
                    self.emit(WorkspaceEvent::Resumed);
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!(target: "shoreline::workspace", %reason, "disconnected");
                self.emit(WorkspaceEvent::Connection(ConnectionState::Closed));
            }
            TransportEvent::Frame(frame) => {
                let outcome = self.registry.route_inbound(frame);
                self.apply(outcome);
            }
            TransportEvent::Raw(bytes) => {
                let outcome = self.registry.route_raw(bytes);
                self.apply(outcome);
            }
        }
    }

    pub fn handle_control(&mut self, control: Control) {
        match control {
            Control::Keystroke(bytes) => self.handle_keystroke(&bytes),
            Control::CreateSession(name) => {
                self.create_session(name.as_deref());
            }
            Control::Close(id) => {
                let _ = self.close_session(&id);
            }
            Control::CloseActive => {
                let _ = self.close_active();
            }
            Control::SetActive(id) => {
                self.set_active(&id);
            }
            Control::Select(index) => {
                self.select(index);
            }
            Control::Next => {
                self.next();
            }
            Control::Previous => {
                self.previous();
            }
            Control::SendCommand(text) => {
                self.send_command(&text);
            }
            Control::Restart(id) => {
                if let Err(err) = self.restart_session(&id) {
                    debug!(target: "shoreline::workspace", error = %err, "restart ignored");
                }
            }
            Control::RestartActive => {
                let id = self.registry.active_id().to_string();
                let _ = self.restart_session(&id);
            }
            Control::Shutdown => {}
        }
    }

    /// Drives the workspace until the UI asks to stop or the transport goes
    /// away, then shuts the transport down.
    pub async fn run(
        mut self,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut controls: mpsc::UnboundedReceiver<Control>,
    ) -> Self {
        loop {
            tokio::select! {
                event = transport_events.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        debug!(target: "shoreline::workspace", "transport events ended");
                        break;
                    }
                },
                control = controls.recv() => match control {
                    Some(Control::Shutdown) | None => break,
                    Some(control) => self.handle_control(control),
                },
            }
        }
        self.registry.transport().shutdown();
        self
    }

    fn apply(&mut self, outcome: RouteOutcome) {
        match outcome {
            RouteOutcome::Display { bytes, active, .. } => {
                if active {
                    self.renderer.write(&bytes);
                }
            }
            RouteOutcome::StatusChanged {
                session_id, status, ..
            } => self.emit(WorkspaceEvent::StatusChanged { session_id, status }),
            RouteOutcome::StatusConfirmed { session_id, status } => {
                self.emit(WorkspaceEvent::StatusConfirmed { session_id, status })
            }
            RouteOutcome::WorkingDirectory { session_id, path } => {
                self.emit(WorkspaceEvent::WorkingDirectoryChanged { session_id, path })
            }
            RouteOutcome::Dropped { .. } | RouteOutcome::Ignored => {}
        }
    }

    fn show_active(&mut self) {
        let active = self.registry.active();
        let session_id = active.id().to_string();
        self.renderer.reset();
        if !active.output().is_empty() {
            self.renderer.write(active.output().as_bytes());
        }
        self.emit(WorkspaceEvent::ActiveChanged { session_id });
    }

    fn emit(&self, event: WorkspaceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

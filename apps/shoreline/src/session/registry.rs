use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{DEFAULT_SCROLLBACK_BYTES, Session, style_error};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::protocol::{Direction, Frame, SessionId, SessionStatus};
use crate::transport::TransportHandle;

pub const DEFAULT_SESSION_ID: &str = "main";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("cannot close the last remaining session")]
    LastSession,
    #[error("unknown session `{0}`")]
    UnknownSession(SessionId),
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub default_session_id: SessionId,
    pub default_session_name: String,
    pub history_capacity: usize,
    pub scrollback_bytes: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            default_session_id: DEFAULT_SESSION_ID.to_string(),
            default_session_name: DEFAULT_SESSION_ID.to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
        }
    }
}

/// What routing an inbound frame did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Bytes to show for a session. `active` says whether the renderer is
    /// currently showing that session.
    Display {
        session_id: SessionId,
        bytes: Vec<u8>,
        active: bool,
    },
    StatusChanged {
        session_id: SessionId,
        previous: SessionStatus,
        status: SessionStatus,
    },
    /// Status report that matched what we already had; it still confirms the
    /// status after a resume.
    StatusConfirmed {
        session_id: SessionId,
        status: SessionStatus,
    },
    WorkingDirectory {
        session_id: SessionId,
        path: String,
    },
    /// Frame for a session we do not know. Expected right after a close.
    Dropped { session_id: SessionId, kind: &'static str },
    /// Client-bound frame kinds echoed back, or no-op updates.
    Ignored,
}

/// Sole owner of every [`Session`] plus the active selection. Always holds at
/// least one session.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    active: usize,
    transport: TransportHandle,
    options: RegistryOptions,
}

impl SessionRegistry {
    /// Starts with the default session, whose id the host already knows.
    pub fn new(transport: TransportHandle, options: RegistryOptions) -> Self {
        let default = Session::new(
            options.default_session_id.clone(),
            options.default_session_name.clone(),
            options.history_capacity,
            options.scrollback_bytes,
        );
        Self {
            sessions: vec![default],
            active: 0,
            transport,
            options,
        }
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Never true; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn active(&self) -> &Session {
        &self.sessions[self.active]
    }

    pub fn active_mut(&mut self) -> &mut Session {
        &mut self.sessions[self.active]
    }

    pub fn active_id(&self) -> &str {
        self.active().id()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Adds a running session and makes it active. The name defaults to the
    /// generated id.
    pub fn create_session(&mut self, name: Option<&str>) -> SessionId {
        let id = self.generate_id();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());
        info!(
            target: "shoreline::registry",
            session_id = %id,
            name = %name,
            "session created"
        );
        self.sessions.push(Session::new(
            id.clone(),
            name,
            self.options.history_capacity,
            self.options.scrollback_bytes,
        ));
        self.active = self.sessions.len() - 1;
        id
    }

    /// Removes a session and asks the host to tear it down. When the active
    /// session goes away the first remaining session becomes active.
    pub fn close_session(&mut self, id: &str) -> Result<(), RegistryError> {
        let index = self
            .position(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))?;
        if self.sessions.len() == 1 {
            warn!(
                target: "shoreline::registry",
                session_id = %id,
                "refusing to close the last session"
            );
            return Err(RegistryError::LastSession);
        }

        let session = self.sessions.remove(index);
        self.transport.send(Frame::close_session(session.id()));
        if index == self.active {
            self.active = 0;
        } else if index < self.active {
            self.active -= 1;
        }
        info!(
            target: "shoreline::registry",
            session_id = %session.id(),
            active = %self.active_id(),
            remaining = self.sessions.len(),
            "session closed"
        );
        Ok(())
    }

    /// Switches the active session. Unknown ids are ignored; returns whether
    /// the selection changed.
    pub fn set_active(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(index) if index != self.active => {
                self.active = index;
                debug!(target: "shoreline::registry", session_id = %id, "active session changed");
                true
            }
            Some(_) => false,
            None => {
                debug!(
                    target: "shoreline::registry",
                    session_id = %id,
                    "ignoring switch to unknown session"
                );
                false
            }
        }
    }

    pub fn set_active_index(&mut self, index: usize) -> bool {
        match self.sessions.get(index).map(|s| s.id().to_string()) {
            Some(id) => self.set_active(&id),
            None => false,
        }
    }

    /// Applies a host frame to the session it names.
    pub fn route_inbound(&mut self, frame: Frame) -> RouteOutcome {
        let kind = frame.kind();
        if frame.direction() == Direction::ToHost {
            debug!(
                target: "shoreline::registry",
                session_id = %frame.session_id(),
                kind,
                "ignoring host-bound frame kind from host"
            );
            return RouteOutcome::Ignored;
        }
        let active_id = self.active_id().to_string();
        let Some(session) = self.get_mut(frame.session_id()) else {
            warn!(
                target: "shoreline::registry",
                session_id = %frame.session_id(),
                kind,
                "dropping frame for unknown session"
            );
            return RouteOutcome::Dropped {
                session_id: frame.session_id().to_string(),
                kind,
            };
        };

        match frame {
            Frame::Output {
                session_id,
                payload,
            } => {
                let bytes = payload.into_bytes();
                session.record_output(&bytes);
                let active = session_id == active_id;
                RouteOutcome::Display {
                    session_id,
                    bytes,
                    active,
                }
            }
            Frame::Error {
                session_id,
                payload,
            } => {
                let bytes = style_error(&payload);
                session.record_output(&bytes);
                let active = session_id == active_id;
                RouteOutcome::Display {
                    session_id,
                    bytes,
                    active,
                }
            }
            Frame::SessionStatus {
                session_id,
                payload,
            } => match session.apply_status(payload) {
                Some(previous) => {
                    info!(
                        target: "shoreline::registry",
                        session_id = %session_id,
                        from = %previous,
                        to = %payload,
                        "session status changed"
                    );
                    RouteOutcome::StatusChanged {
                        session_id,
                        previous,
                        status: payload,
                    }
                }
                None => RouteOutcome::StatusConfirmed {
                    session_id,
                    status: payload,
                },
            },
            Frame::WorkingDirectory {
                session_id,
                payload,
            } => {
                if session.set_working_directory(payload.clone()) {
                    RouteOutcome::WorkingDirectory {
                        session_id,
                        path: payload,
                    }
                } else {
                    RouteOutcome::Ignored
                }
            }
            // Rejected by direction above.
            Frame::Input { .. } | Frame::CloseSession { .. } | Frame::Restart { .. } => {
                RouteOutcome::Ignored
            }
        }
    }

    /// Bytes that did not decode as a frame belong to whatever is on screen.
    pub fn route_raw(&mut self, bytes: Vec<u8>) -> RouteOutcome {
        let session = self.active_mut();
        session.record_output(&bytes);
        RouteOutcome::Display {
            session_id: session.id().to_string(),
            bytes,
            active: true,
        }
    }

    /// Sends keystroke text for a session. Unknown ids are dropped.
    pub fn send_input(&mut self, id: &str, payload: impl Into<String>) -> bool {
        let payload = payload.into();
        if payload.is_empty() {
            return false;
        }
        let Some(session) = self.get_mut(id) else {
            warn!(
                target: "shoreline::registry",
                session_id = %id,
                "dropping input for unknown session"
            );
            return false;
        };
        session.touch();
        self.transport.send(Frame::input(id, payload))
    }

    /// Asks the host to restart a session's process. Local status is left
    /// alone until the host reports back.
    pub fn restart(&mut self, id: &str) -> Result<(), RegistryError> {
        let session = self
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))?;
        session.touch();
        info!(target: "shoreline::registry", session_id = %id, "restart requested");
        self.transport.send(Frame::restart(id));
        Ok(())
    }

    /// After a hard resume no status is trusted until the host reports again.
    pub fn mark_all_unconfirmed(&mut self) {
        for session in &mut self.sessions {
            session.mark_unconfirmed();
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id() == id)
    }

    fn generate_id(&self) -> SessionId {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let base = format!("session-{millis}");
        if !self.contains(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportCommand;
    use tokio::sync::mpsc;

    fn registry() -> (SessionRegistry, mpsc::UnboundedReceiver<TransportCommand>) {
        let (handle, commands) = TransportHandle::detached();
        (SessionRegistry::new(handle, RegistryOptions::default()), commands)
    }

    fn sent(commands: &mut mpsc::UnboundedReceiver<TransportCommand>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(command) = commands.try_recv() {
            if let TransportCommand::Send(frame) = command {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn starts_with_default_session_active() {
        let (registry, _commands) = registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_id(), "main");
    }

    #[test]
    fn new_sessions_become_active_with_unique_ids() {
        let (mut registry, _commands) = registry();
        let first = registry.create_session(None);
        let second = registry.create_session(Some("build"));
        assert_ne!(first, second);
        assert!(first.starts_with("session-"));
        assert_eq!(registry.active_id(), second);
        assert_eq!(registry.active().name(), "build");
        assert_eq!(registry.get(&first).unwrap().name(), first);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn closing_the_last_session_is_rejected() {
        let (mut registry, mut commands) = registry();
        assert_eq!(registry.close_session("main"), Err(RegistryError::LastSession));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_id(), "main");
        assert!(sent(&mut commands).is_empty());
    }

    #[test]
    fn closing_active_moves_to_first_remaining() {
        let (mut registry, mut commands) = registry();
        let a = registry.create_session(None);
        let b = registry.create_session(None);
        registry.set_active(&a);
        registry.close_session(&a).unwrap();
        assert_eq!(registry.active_id(), "main");
        assert_eq!(sent(&mut commands), vec![Frame::close_session(a.clone())]);

        registry.set_active(&b);
        registry.close_session("main").unwrap();
        assert_eq!(registry.active_id(), b);
        assert_eq!(registry.session_ids(), vec![b.clone()]);
    }

    #[test]
    fn closing_an_earlier_session_keeps_the_active_one() {
        let (mut registry, _commands) = registry();
        let a = registry.create_session(None);
        let b = registry.create_session(None);
        registry.close_session(&a).unwrap();
        assert_eq!(registry.active_id(), b);
        assert_eq!(
            registry.close_session("nope"),
            Err(RegistryError::UnknownSession("nope".into()))
        );
    }

    #[test]
    fn set_active_ignores_unknown_ids() {
        let (mut registry, _commands) = registry();
        let id = registry.create_session(None);
        assert!(!registry.set_active("gone"));
        assert_eq!(registry.active_id(), id);
        assert!(registry.set_active("main"));
        assert!(!registry.set_active("main"));
    }

    #[test]
    fn unknown_session_frames_are_dropped_without_changing_size() {
        let (mut registry, _commands) = registry();
        for frame in [
            Frame::output("ghost", "hi"),
            Frame::error("ghost", "bad"),
            Frame::status("ghost", SessionStatus::Error),
            Frame::working_directory("ghost", "/tmp"),
        ] {
            let outcome = registry.route_inbound(frame);
            assert!(matches!(outcome, RouteOutcome::Dropped { .. }));
            assert_eq!(registry.len(), 1);
        }
    }

    #[test]
    fn output_for_inactive_session_is_buffered_only() {
        let (mut registry, _commands) = registry();
        let second = registry.create_session(None);
        let outcome = registry.route_inbound(Frame::output("main", "build ok\r\n"));
        assert_eq!(
            outcome,
            RouteOutcome::Display {
                session_id: "main".into(),
                bytes: b"build ok\r\n".to_vec(),
                active: false,
            }
        );
        assert_eq!(registry.get("main").unwrap().output().as_bytes(), b"build ok\r\n");
        assert!(registry.get(&second).unwrap().output().is_empty());
    }

    #[test]
    fn status_round_trips_through_error() {
        let (mut registry, _commands) = registry();
        let outcome = registry.route_inbound(Frame::status("main", SessionStatus::Error));
        assert!(matches!(outcome, RouteOutcome::StatusChanged { .. }));
        assert_eq!(registry.active().status(), SessionStatus::Error);
        registry.route_inbound(Frame::status("main", SessionStatus::Running));
        assert_eq!(registry.active().status(), SessionStatus::Running);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn working_directory_updates_are_reported_once() {
        let (mut registry, _commands) = registry();
        let first = registry.route_inbound(Frame::working_directory("main", "/srv"));
        assert_eq!(
            first,
            RouteOutcome::WorkingDirectory {
                session_id: "main".into(),
                path: "/srv".into()
            }
        );
        let repeat = registry.route_inbound(Frame::working_directory("main", "/srv"));
        assert_eq!(repeat, RouteOutcome::Ignored);
        assert_eq!(registry.active().working_directory(), "/srv");
    }

    #[test]
    fn restart_sends_request_without_local_change() {
        let (mut registry, mut commands) = registry();
        registry.route_inbound(Frame::status("main", SessionStatus::Stopped));
        registry.restart("main").unwrap();
        assert_eq!(registry.active().status(), SessionStatus::Stopped);
        assert_eq!(sent(&mut commands), vec![Frame::restart("main")]);
        assert!(registry.restart("gone").is_err());
    }

    #[test]
    fn raw_bytes_go_to_the_active_session() {
        let (mut registry, _commands) = registry();
        let second = registry.create_session(None);
        let outcome = registry.route_raw(b"plain".to_vec());
        assert!(matches!(outcome, RouteOutcome::Display { active: true, .. }));
        assert_eq!(registry.get(&second).unwrap().output().as_bytes(), b"plain");
    }

    fn refreshes_main(
        registry: &mut SessionRegistry,
        action: impl FnOnce(&mut SessionRegistry),
    ) -> bool {
        let session = registry.get_mut("main").unwrap();
        session.backdate(time::Duration::hours(1));
        let before = session.last_activity();
        action(registry);
        registry.get("main").unwrap().last_activity() > before
    }

    #[test]
    fn every_frame_for_a_session_refreshes_last_activity() {
        let (mut registry, _commands) = registry();
        let other = registry.create_session(None);

        assert!(refreshes_main(&mut registry, |r| {
            r.route_inbound(Frame::output("main", "x"));
        }));
        assert!(refreshes_main(&mut registry, |r| {
            r.route_inbound(Frame::error("main", "boom"));
        }));
        assert!(refreshes_main(&mut registry, |r| {
            r.route_inbound(Frame::status("main", SessionStatus::Running));
        }));
        assert!(refreshes_main(&mut registry, |r| {
            r.route_inbound(Frame::working_directory("main", "/srv"));
        }));
        assert!(refreshes_main(&mut registry, |r| {
            r.send_input("main", "ls\r");
        }));
        assert!(refreshes_main(&mut registry, |r| {
            r.restart("main").unwrap();
        }));

        assert!(!refreshes_main(&mut registry, |r| {
            r.route_inbound(Frame::output(other.clone(), "elsewhere"));
        }));
    }

    #[test]
    fn host_bound_frame_kinds_from_the_host_are_ignored() {
        let (mut registry, _commands) = registry();
        for frame in [
            Frame::input("main", "rm -rf /\r"),
            Frame::close_session("main"),
            Frame::restart("main"),
            Frame::input("ghost", "x"),
        ] {
            assert_eq!(registry.route_inbound(frame), RouteOutcome::Ignored);
        }
        assert_eq!(registry.len(), 1);
        assert!(registry.active().output().is_empty());
        assert!(!refreshes_main(&mut registry, |r| {
            r.route_inbound(Frame::restart("main"));
        }));
    }
}

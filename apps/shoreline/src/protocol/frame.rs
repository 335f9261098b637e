use serde::{Deserialize, Serialize};
use std::fmt;

pub type SessionId = String;

/// Lifecycle state of the host process behind a session, as reported by the
/// host. There is no terminal state: a stopped or failed session may run
/// again after the host restarts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToHost,
    FromHost,
}

/// One typed message on the workspace connection. The JSON form is
/// `{"type": "...", "sessionId": "...", "payload": ...}`; `data` is accepted
/// as an alias for `payload` on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Input {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(alias = "data")]
        payload: String,
    },
    Output {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(alias = "data")]
        payload: String,
    },
    Error {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(alias = "data")]
        payload: String,
    },
    SessionStatus {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(alias = "data", alias = "status")]
        payload: SessionStatus,
    },
    WorkingDirectory {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(alias = "data", alias = "path")]
        payload: String,
    },
    CloseSession {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    Restart {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

impl Frame {
    pub fn input(session_id: impl Into<SessionId>, payload: impl Into<String>) -> Self {
        Frame::Input {
            session_id: session_id.into(),
            payload: payload.into(),
        }
    }

    pub fn output(session_id: impl Into<SessionId>, payload: impl Into<String>) -> Self {
        Frame::Output {
            session_id: session_id.into(),
            payload: payload.into(),
        }
    }

    pub fn error(session_id: impl Into<SessionId>, payload: impl Into<String>) -> Self {
        Frame::Error {
            session_id: session_id.into(),
            payload: payload.into(),
        }
    }

    pub fn status(session_id: impl Into<SessionId>, status: SessionStatus) -> Self {
        Frame::SessionStatus {
            session_id: session_id.into(),
            payload: status,
        }
    }

    pub fn working_directory(session_id: impl Into<SessionId>, path: impl Into<String>) -> Self {
        Frame::WorkingDirectory {
            session_id: session_id.into(),
            payload: path.into(),
        }
    }

    pub fn close_session(session_id: impl Into<SessionId>) -> Self {
        Frame::CloseSession {
            session_id: session_id.into(),
        }
    }

    pub fn restart(session_id: impl Into<SessionId>) -> Self {
        Frame::Restart {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Frame::Input { session_id, .. }
            | Frame::Output { session_id, .. }
            | Frame::Error { session_id, .. }
            | Frame::SessionStatus { session_id, .. }
            | Frame::WorkingDirectory { session_id, .. }
            | Frame::CloseSession { session_id }
            | Frame::Restart { session_id } => session_id,
        }
    }

    /// The wire name of the frame type.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Input { .. } => "input",
            Frame::Output { .. } => "output",
            Frame::Error { .. } => "error",
            Frame::SessionStatus { .. } => "session_status",
            Frame::WorkingDirectory { .. } => "working_directory",
            Frame::CloseSession { .. } => "close_session",
            Frame::Restart { .. } => "restart",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Frame::Input { .. } | Frame::CloseSession { .. } | Frame::Restart { .. } => {
                Direction::ToHost
            }
            Frame::Output { .. }
            | Frame::Error { .. }
            | Frame::SessionStatus { .. }
            | Frame::WorkingDirectory { .. } => Direction::FromHost,
        }
    }
}

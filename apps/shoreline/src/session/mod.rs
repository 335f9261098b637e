pub mod registry;

use time::OffsetDateTime;

use crate::history::CommandHistoryBuffer;
use crate::protocol::{SessionId, SessionStatus};

pub use registry::{RegistryError, RegistryOptions, RouteOutcome, SessionRegistry};

pub const DEFAULT_WORKING_DIRECTORY: &str = "/";
pub const DEFAULT_SCROLLBACK_BYTES: usize = 256 * 1024;

const SGR_RED: &[u8] = b"\x1b[31m";
const SGR_RESET: &[u8] = b"\x1b[0m";

/// Wraps host-reported error text in red so it stands apart from output.
pub fn style_error(payload: &str) -> Vec<u8> {
    let mut styled = Vec::with_capacity(payload.len() + SGR_RED.len() + SGR_RESET.len());
    styled.extend_from_slice(SGR_RED);
    styled.extend_from_slice(payload.as_bytes());
    styled.extend_from_slice(SGR_RESET);
    styled
}

/// Most recent output bytes of a session, kept for replay when the user
/// switches back to it.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.limit == 0 {
            return;
        }
        if chunk.len() >= self.limit {
            self.bytes.clear();
            self.bytes.extend_from_slice(&chunk[chunk.len() - self.limit..]);
            return;
        }
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.limit);
        if overflow > 0 {
            self.bytes.drain(..overflow);
        }
        self.bytes.extend_from_slice(chunk);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One remote shell as seen from the client. Status only ever changes in
/// response to a host `session_status` frame.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    name: String,
    status: SessionStatus,
    status_confirmed: bool,
    working_directory: String,
    last_activity: OffsetDateTime,
    history: CommandHistoryBuffer,
    input_line: String,
    output: OutputBuffer,
}

impl Session {
    pub fn new(
        id: impl Into<SessionId>,
        name: impl Into<String>,
        history_capacity: usize,
        scrollback_bytes: usize,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: SessionStatus::Running,
            status_confirmed: true,
            working_directory: DEFAULT_WORKING_DIRECTORY.to_string(),
            last_activity: OffsetDateTime::now_utc(),
            history: CommandHistoryBuffer::new(history_capacity),
            input_line: String::new(),
            output: OutputBuffer::new(scrollback_bytes),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// False after a hard resume until the host reports status again.
    pub fn status_confirmed(&self) -> bool {
        self.status_confirmed
    }

    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    pub fn last_activity(&self) -> OffsetDateTime {
        self.last_activity
    }

    pub fn history(&self) -> &CommandHistoryBuffer {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut CommandHistoryBuffer {
        &mut self.history
    }

    pub fn input_line(&self) -> &str {
        &self.input_line
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Applies a host-reported status. Returns the previous status when it
    /// changed.
    pub fn apply_status(&mut self, status: SessionStatus) -> Option<SessionStatus> {
        self.touch();
        self.status_confirmed = true;
        if self.status == status {
            return None;
        }
        let previous = self.status;
        self.status = status;
        Some(previous)
    }

    pub fn set_working_directory(&mut self, path: impl Into<String>) -> bool {
        self.touch();
        let path = path.into();
        if self.working_directory == path {
            return false;
        }
        self.working_directory = path;
        true
    }

    pub fn record_output(&mut self, bytes: &[u8]) {
        self.touch();
        self.output.push(bytes);
    }

    pub fn mark_unconfirmed(&mut self) {
        self.status_confirmed = false;
    }

    pub fn touch(&mut self) {
        self.last_activity = OffsetDateTime::now_utc();
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: time::Duration) {
        self.last_activity -= by;
    }

    pub(crate) fn push_input(&mut self, ch: char) {
        self.input_line.push(ch);
    }

    pub(crate) fn pop_input(&mut self) {
        self.input_line.pop();
    }

    pub(crate) fn set_input(&mut self, line: &str) {
        self.input_line.clear();
        self.input_line.push_str(line);
    }

    /// Clears the mirror and leaves history navigation.
    pub(crate) fn clear_input(&mut self) {
        self.input_line.clear();
        self.history.reset_cursor();
    }

    /// Commits the mirror to history and clears it.
    pub(crate) fn commit_input(&mut self) -> bool {
        let line = std::mem::take(&mut self.input_line);
        self.history.append(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("main", "main", 50, 16)
    }

    #[test]
    fn starts_running_in_root() {
        let session = session();
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.working_directory(), "/");
        assert!(session.status_confirmed());
    }

    #[test]
    fn status_has_no_terminal_state() {
        let mut session = session();
        assert_eq!(
            session.apply_status(SessionStatus::Error),
            Some(SessionStatus::Running)
        );
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(
            session.apply_status(SessionStatus::Running),
            Some(SessionStatus::Error)
        );
        assert_eq!(session.apply_status(SessionStatus::Running), None);
    }

    #[test]
    fn status_report_confirms_after_resume() {
        let mut session = session();
        session.mark_unconfirmed();
        assert!(!session.status_confirmed());
        session.apply_status(SessionStatus::Running);
        assert!(session.status_confirmed());
    }

    #[test]
    fn output_buffer_keeps_the_tail() {
        let mut session = session();
        session.record_output(b"0123456789");
        session.record_output(b"abcdefghij");
        assert_eq!(session.output().as_bytes(), b"456789abcdefghij");
        session.record_output(b"this chunk is longer than the limit");
        assert_eq!(session.output().as_bytes(), b"r than the limit");
        assert_eq!(session.output().len(), 16);
    }

    #[test]
    fn commit_input_feeds_history() {
        let mut session = session();
        for ch in "git status".chars() {
            session.push_input(ch);
        }
        session.pop_input();
        assert!(session.commit_input());
        assert_eq!(session.input_line(), "");
        assert_eq!(
            session.history().entries().collect::<Vec<_>>(),
            vec!["git statu"]
        );
        assert!(!session.commit_input());
    }

    #[test]
    fn style_error_wraps_in_red() {
        assert_eq!(style_error("boom"), b"\x1b[31mboom\x1b[0m".to_vec());
    }
}

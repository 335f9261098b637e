use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use std::io::{self, Write};
use tracing::debug;

use crate::workspace::Renderer;

/// Writes session output straight to the local terminal.
pub struct StdoutRenderer {
    out: io::Stdout,
}

impl StdoutRenderer {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for StdoutRenderer {
    fn write(&mut self, bytes: &[u8]) {
        let mut out = self.out.lock();
        if let Err(err) = out.write_all(bytes).and_then(|()| out.flush()) {
            debug!(target: "shoreline::terminal", error = %err, "stdout write failed");
        }
    }

    fn reset(&mut self) {
        if let Err(err) = execute!(self.out, Clear(ClearType::All), MoveTo(0, 0)) {
            debug!(target: "shoreline::terminal", error = %err, "failed to clear screen");
        }
    }
}

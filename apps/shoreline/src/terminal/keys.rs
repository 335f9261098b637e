//! Local key bindings. Everything typed goes to the active session except
//! what follows the Ctrl-A prefix.

use crate::workspace::Control;

pub const PREFIX: u8 = 0x01;

pub const HELP: &str =
    "C-a c new | C-a n/p next/prev | C-a 1-9 select | C-a x close | C-a r restart | C-a d detach";

#[derive(Debug, Default)]
pub struct PrefixDecoder {
    armed: bool,
}

impl PrefixDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a chunk of stdin into keystrokes for the session and local
    /// controls, preserving their order. A prefix at the end of a chunk
    /// carries over to the next one.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Control> {
        let mut out = Vec::new();
        let mut passthrough = Vec::new();
        for &byte in bytes {
            if !self.armed {
                if byte == PREFIX {
                    self.armed = true;
                } else {
                    passthrough.push(byte);
                }
                continue;
            }

            self.armed = false;
            let control = match byte {
                PREFIX => {
                    passthrough.push(PREFIX);
                    continue;
                }
                b'c' => Control::CreateSession(None),
                b'n' => Control::Next,
                b'p' => Control::Previous,
                b'1'..=b'9' => Control::Select(usize::from(byte - b'1')),
                b'x' => Control::CloseActive,
                b'r' => Control::RestartActive,
                b'd' => Control::Shutdown,
                _ => continue,
            };
            if !passthrough.is_empty() {
                out.push(Control::Keystroke(std::mem::take(&mut passthrough)));
            }
            out.push(control);
        }
        if !passthrough.is_empty() {
            out.push(Control::Keystroke(passthrough));
        }
        out
    }
}

//! Keystroke interception for the active session.
//!
//! The host echoes and owns the visible line. The client keeps a mirror of
//! what was typed only so committed lines can go into history, and it
//! swallows up/down arrows to recall history entries itself.

use crate::session::Session;

/// Ctrl-U: the shell's kill-line, used to replace the host's line when
/// recalling history.
pub const KILL_LINE: char = '\u{15}';
const INTERRUPT: char = '\u{03}';
const ESC: char = '\u{1b}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Up,
    Down,
}

impl Navigation {
    /// Cursor keys in both normal (`ESC [`) and application (`ESC O`) mode.
    pub fn from_sequence(seq: &str) -> Option<Self> {
        match seq {
            "\x1b[A" | "\x1bOA" => Some(Navigation::Up),
            "\x1b[B" | "\x1bOB" => Some(Navigation::Down),
            _ => None,
        }
    }
}

/// Escape sequences longer than this are forwarded even without a final
/// byte, so a stray `ESC [` cannot hold input back indefinitely.
const MAX_ESCAPE_CHARS: usize = 32;

/// Routes keystroke chunks as they come off stdin. A read can end in the
/// middle of a UTF-8 character or an escape sequence; those trailing bytes
/// are held until the next chunk completes them.
#[derive(Debug, Clone, Default)]
pub struct InputRouter {
    pending: Vec<u8>,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back from the previous chunk.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Updates the session's mirror and history cursor for a chunk of
    /// keystrokes and returns the text to forward as one `input` frame, if
    /// any.
    pub fn route(&mut self, session: &mut Session, bytes: &[u8]) -> Option<String> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);
        let cut = utf8_boundary(&buf);
        let tail = buf.split_off(cut);
        let text = String::from_utf8_lossy(&buf);
        let chars: Vec<char> = text.chars().collect();
        let mut forward = String::with_capacity(buf.len());
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            if ch == ESC {
                let len = match escape_len(&chars[i..]) {
                    Some(len) => len,
                    None if chars.len() - i < MAX_ESCAPE_CHARS => {
                        let held: String = chars[i..].iter().collect();
                        self.pending.extend_from_slice(held.as_bytes());
                        break;
                    }
                    None => chars.len() - i,
                };
                let seq: String = chars[i..i + len].iter().collect();
                match Navigation::from_sequence(&seq) {
                    Some(nav) => recall(session, nav, &mut forward),
                    None => forward.push_str(&seq),
                }
                i += len;
                continue;
            }

            match ch {
                '\r' | '\n' => {
                    session.commit_input();
                    forward.push(ch);
                }
                '\u{7f}' | '\u{08}' => {
                    session.pop_input();
                    forward.push(ch);
                }
                INTERRUPT | KILL_LINE => {
                    session.clear_input();
                    forward.push(ch);
                }
                c if c.is_control() => forward.push(c),
                c => {
                    session.push_input(c);
                    forward.push(c);
                }
            }
            i += 1;
        }
        self.pending.extend_from_slice(&tail);

        if forward.is_empty() {
            None
        } else {
            Some(forward)
        }
    }
}

fn recall(session: &mut Session, nav: Navigation, forward: &mut String) {
    let entry = match nav {
        Navigation::Up => session.history_mut().navigate_up(),
        Navigation::Down => session.history_mut().navigate_down(),
    }
    .map(str::to_string);
    // Nothing further in that direction: the key is swallowed.
    let Some(entry) = entry else {
        return;
    };
    session.set_input(&entry);
    forward.push(KILL_LINE);
    forward.push_str(&entry);
}

/// Offset where a trailing, still incomplete UTF-8 sequence starts.
/// Invalid bytes before it are left for lossy decoding.
fn utf8_boundary(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(err) => match err.error_len() {
                None => return start + err.valid_up_to(),
                Some(invalid) => start += err.valid_up_to() + invalid,
            },
        }
    }
}

/// Length in chars of the escape sequence at the start of `chars`, or
/// `None` when the chunk ends before the sequence does.
fn escape_len(chars: &[char]) -> Option<usize> {
    match chars.get(1)? {
        '[' => chars[2..]
            .iter()
            .position(|c| ('\u{40}'..='\u{7e}').contains(c))
            .map(|pos| pos + 3),
        'O' => (chars.len() >= 3).then_some(3),
        _ => Some(2),
    }
}

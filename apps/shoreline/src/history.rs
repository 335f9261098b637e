use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Bounded list of submitted command lines with up/down navigation.
///
/// The cursor ranges over `[0, len]`; `len` is "past the end", meaning no
/// entry is selected and the live input line is shown.
#[derive(Debug, Clone)]
pub struct CommandHistoryBuffer {
    entries: VecDeque<String>,
    capacity: usize,
    cursor: usize,
}

impl Default for CommandHistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommandHistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Stores a trimmed command, evicting the oldest past capacity. Returns
    /// false for blank input, which is not stored. The cursor is reset
    /// either way.
    pub fn append(&mut self, command: &str) -> bool {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            self.reset_cursor();
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(trimmed.to_string());
        self.reset_cursor();
        true
    }

    /// Moves one entry toward the oldest and returns it. `None` when empty or
    /// already at the oldest entry.
    pub fn navigate_up(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Moves one entry toward the newest. Reaching past-the-end yields an
    /// empty line; `None` means the cursor was already past the end.
    pub fn navigate_down(&mut self) -> Option<&str> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(self.entries.get(self.cursor).map(String::as_str).unwrap_or(""))
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = self.entries.len();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_past_end(&self) -> bool {
        self.cursor == self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

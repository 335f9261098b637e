use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

/// Puts the local terminal in raw mode for as long as it lives, so every
/// keystroke reaches the remote shell unprocessed.
pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new(enable: bool) -> Self {
        if !enable {
            return Self(false);
        }
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(err) => {
                eprintln!("⚠️  failed to enable raw mode: {err}");
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

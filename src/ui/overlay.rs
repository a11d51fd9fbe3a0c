//! Modal overlays that claim keys ahead of the window manager: the quit
//! dialog, the rename prompt and the tape manager. Also the clipboard seam.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, info};

/// What the quit dialog decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitChoice {
    Pending,
    Cancel,
    Confirm,
}

/// Yes/no confirmation shown before quitting
#[derive(Debug, Default)]
pub struct QuitDialog {
    visible: bool,
    yes_selected: bool,
}

impl QuitDialog {
    pub fn open(&mut self) {
        self.visible = true;
        self.yes_selected = false;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn yes_selected(&self) -> bool {
        self.yes_selected
    }

    pub fn handle_key(&mut self, key: &KeyEvent) -> QuitChoice {
        let choice = match key.code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => QuitChoice::Cancel,
            KeyCode::Char('y') | KeyCode::Char('Y') => QuitChoice::Confirm,
            KeyCode::Enter if self.yes_selected => QuitChoice::Confirm,
            KeyCode::Enter => QuitChoice::Cancel,
            KeyCode::Left | KeyCode::Char('h') => {
                self.yes_selected = true;
                QuitChoice::Pending
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.yes_selected = false;
                QuitChoice::Pending
            }
            _ => QuitChoice::Pending,
        };
        if choice != QuitChoice::Pending {
            self.visible = false;
        }
        choice
    }
}

/// Result of a key in rename mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Editing,
    Commit(String),
    Cancel,
}

/// Text buffer for renaming the focused window
#[derive(Debug, Default)]
pub struct RenameBuffer {
    active: bool,
    text: String,
}

impl RenameBuffer {
    pub fn start(&mut self, current: &str) {
        self.active = true;
        self.text = current.to_string();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn handle_key(&mut self, key: &KeyEvent) -> RenameOutcome {
        match key.code {
            KeyCode::Enter => {
                self.active = false;
                RenameOutcome::Commit(std::mem::take(&mut self.text))
            }
            KeyCode::Esc => {
                self.active = false;
                self.text.clear();
                RenameOutcome::Cancel
            }
            KeyCode::Backspace => {
                self.text.pop();
                RenameOutcome::Editing
            }
            KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                self.text.push(c);
                RenameOutcome::Editing
            }
            _ => RenameOutcome::Editing,
        }
    }
}

/// Input macro recorder with a manager overlay
pub trait TapeManager {
    fn is_visible(&self) -> bool;
    fn show(&mut self);
    fn hide(&mut self);
    /// Route a key to the overlay. False when the overlay does not use it.
    fn handle_key(&mut self, key: &KeyEvent) -> bool;
    fn start_recording(&mut self) -> bool;
    fn stop_recording(&mut self) -> bool;
    fn is_recording(&self) -> bool;
    /// Feed input sent to a window while recording
    fn record(&mut self, bytes: &[u8]);
    /// Bytes of the selected tape, to replay into the focused window
    fn play(&mut self) -> Option<Vec<u8>>;
}

/// In-memory [`TapeManager`]
#[derive(Debug, Default)]
pub struct TapeDeck {
    tapes: Vec<Vec<u8>>,
    recording: Option<Vec<u8>>,
    selected: usize,
    visible: bool,
}

impl TapeDeck {
    pub fn tapes(&self) -> &[Vec<u8>] {
        &self.tapes
    }

    pub fn selected(&self) -> usize {
        self.selected
    }
}

impl TapeManager for TapeDeck {
    fn is_visible(&self) -> bool {
        self.visible
    }

    fn show(&mut self) {
        self.visible = true;
    }

    fn hide(&mut self) {
        self.visible = false;
    }

    fn handle_key(&mut self, key: &KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.hide(),
            KeyCode::Up | KeyCode::Char('k') => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.tapes.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('d') => {
                if self.selected < self.tapes.len() {
                    self.tapes.remove(self.selected);
                    self.selected = self.selected.min(self.tapes.len().saturating_sub(1));
                }
            }
            _ => return false,
        }
        true
    }

    fn start_recording(&mut self) -> bool {
        if self.recording.is_some() {
            return false;
        }
        info!("tape recording started");
        self.recording = Some(Vec::new());
        true
    }

    fn stop_recording(&mut self) -> bool {
        let Some(tape) = self.recording.take() else {
            return false;
        };
        info!(bytes = tape.len(), "tape recording stopped");
        if !tape.is_empty() {
            self.tapes.push(tape);
            self.selected = self.tapes.len() - 1;
        }
        true
    }

    fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    fn record(&mut self, bytes: &[u8]) {
        if let Some(ref mut tape) = self.recording {
            tape.extend_from_slice(bytes);
        }
    }

    fn play(&mut self) -> Option<Vec<u8>> {
        let tape = self.tapes.get(self.selected)?.clone();
        debug!(tape = self.selected, bytes = tape.len(), "tape played");
        Some(tape)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(#[from] arboard::Error),
}

/// Destination for yanked and selected text
pub trait ClipboardSink {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// System clipboard, opened on first use
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        if self.inner.is_none() {
            self.inner = Some(arboard::Clipboard::new()?);
        }
        if let Some(ref mut clipboard) = self.inner {
            clipboard.set_text(text.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(c: KeyCode) -> KeyEvent {
        KeyEvent::new(c, KeyModifiers::NONE)
    }

    #[test]
    fn test_quit_dialog() {
        let mut dialog = QuitDialog::default();
        dialog.open();
        assert_eq!(dialog.handle_key(&key(KeyCode::Char('x'))), QuitChoice::Pending);
        assert_eq!(dialog.handle_key(&key(KeyCode::Left)), QuitChoice::Pending);
        assert!(dialog.yes_selected());
        assert_eq!(dialog.handle_key(&key(KeyCode::Char('l'))), QuitChoice::Pending);
        assert_eq!(dialog.handle_key(&key(KeyCode::Enter)), QuitChoice::Cancel);
        assert!(!dialog.is_visible());

        dialog.open();
        assert_eq!(dialog.handle_key(&key(KeyCode::Char('y'))), QuitChoice::Confirm);
        dialog.open();
        dialog.handle_key(&key(KeyCode::Char('h')));
        assert_eq!(dialog.handle_key(&key(KeyCode::Enter)), QuitChoice::Confirm);
        dialog.open();
        assert_eq!(dialog.handle_key(&key(KeyCode::Esc)), QuitChoice::Cancel);
    }

    #[test]
    fn test_rename_buffer() {
        let mut rename = RenameBuffer::default();
        rename.start("shell");
        rename.handle_key(&key(KeyCode::Backspace));
        rename.handle_key(&key(KeyCode::Char('!')));
        assert_eq!(rename.text(), "shel!");
        rename.handle_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert_eq!(rename.handle_key(&key(KeyCode::Enter)), RenameOutcome::Commit("shel!".into()));
        assert!(!rename.is_active());

        rename.start("x");
        assert_eq!(rename.handle_key(&key(KeyCode::Esc)), RenameOutcome::Cancel);
        assert_eq!(rename.text(), "");
    }

    #[test]
    fn test_tape_deck() {
        let mut deck = TapeDeck::default();
        deck.record(b"ignored");
        assert!(deck.start_recording());
        assert!(!deck.start_recording());
        deck.record(b"ls ");
        deck.record(b"-la\r");
        assert!(deck.stop_recording());
        assert!(!deck.stop_recording());
        assert_eq!(deck.play().as_deref(), Some(&b"ls -la\r"[..]));

        deck.start_recording();
        deck.stop_recording();
        assert_eq!(deck.tapes().len(), 1);

        deck.show();
        assert!(deck.handle_key(&key(KeyCode::Char('d'))));
        assert!(deck.play().is_none());
        assert!(!deck.handle_key(&key(KeyCode::Char('z'))));
        assert!(deck.handle_key(&key(KeyCode::Esc)));
        assert!(!deck.is_visible());
    }
}

//! VT emulator seam
//!
//! The window engine never parses terminal output itself. It talks to an
//! emulator through [`VtEmulator`]; [`Vt100Emulator`] is the concrete
//! implementation on top of the `vt100` crate.
//!
//! Emulator-generated replies (device status, cursor position reports) are
//! queued on a channel that the emulator-to-PTY copy loop drains. Closing
//! the emulator drops the sending side, which unblocks that loop.

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use tracing::trace;

/// Cursor shape requested by the child with DECSCUSR (`CSI Ps SP q`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorStyle {
    #[default]
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

impl CursorStyle {
    pub fn from_param(param: u16) -> Self {
        match param {
            1 => CursorStyle::BlinkingBlock,
            2 => CursorStyle::SteadyBlock,
            3 => CursorStyle::BlinkingUnderline,
            4 => CursorStyle::SteadyUnderline,
            5 => CursorStyle::BlinkingBar,
            6 => CursorStyle::SteadyBar,
            _ => CursorStyle::Default,
        }
    }

    pub fn param(self) -> u16 {
        match self {
            CursorStyle::Default => 0,
            CursorStyle::BlinkingBlock => 1,
            CursorStyle::SteadyBlock => 2,
            CursorStyle::BlinkingUnderline => 3,
            CursorStyle::SteadyUnderline => 4,
            CursorStyle::BlinkingBar => 5,
            CursorStyle::SteadyBar => 6,
        }
    }

    /// The DECSCUSR sequence the emulator swallowed, for re-emission to the
    /// host terminal.
    pub fn to_sequence(self) -> Vec<u8> {
        format!("\x1b[{} q", self.param()).into_bytes()
    }
}

/// RGB colour used by theme palettes
pub type Rgb = (u8, u8, u8);

/// Sixteen-colour palette applied to an emulator. `None` means passthrough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub ansi: [Rgb; 16],
    pub foreground: Rgb,
    pub background: Rgb,
}

/// Hooks invoked from inside the emulator while it consumes output.
pub struct EmulatorCallbacks {
    pub on_alt_screen: Box<dyn Fn(bool) + Send + Sync>,
    pub on_cursor_style: Box<dyn Fn(CursorStyle) + Send + Sync>,
    pub on_title: Box<dyn Fn(String) + Send + Sync>,
}

impl EmulatorCallbacks {
    pub fn noop() -> Self {
        Self {
            on_alt_screen: Box::new(|_| {}),
            on_cursor_style: Box::new(|_| {}),
            on_title: Box::new(|_| {}),
        }
    }
}

/// Terminal state machine consumed by the window engine.
///
/// All methods take `&self`; implementations synchronise internally so the
/// copy loops can hold a shared handle while writers resize or close.
pub trait VtEmulator: Send + Sync {
    /// Feed child output into the emulator.
    fn write(&self, data: &[u8]);
    /// Resize the grid to `cols` x `rows`.
    fn resize(&self, cols: u16, rows: u16);
    /// Grid size as (cols, rows)
    fn size(&self) -> (u16, u16);
    /// Cursor position as (x, y), zero based
    fn cursor_position(&self) -> (u16, u16);
    fn has_mouse_mode(&self) -> bool;
    fn supports_motion_events(&self) -> bool;
    fn sgr_mouse(&self) -> bool;
    fn application_cursor_keys(&self) -> bool;
    fn alternate_screen(&self) -> bool;
    fn set_theme_colors(&self, palette: Option<Palette>);
    fn set_callbacks(&self, callbacks: EmulatorCallbacks);
    /// Hand out the reply queue. Only the first caller gets it.
    fn take_responses(&self) -> Option<Receiver<Vec<u8>>>;
    /// Text of a visible row at the current scrollback offset
    fn line_text(&self, row: u16) -> String;
    fn scrollback_offset(&self) -> usize;
    /// Scroll the view; returns the offset actually applied.
    fn set_scrollback_offset(&self, offset: usize) -> usize;
    /// Formatted screen contents, used to fill the render cache.
    fn snapshot(&self) -> Vec<u8>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

struct Hooks {
    callbacks: EmulatorCallbacks,
    responses: Option<Sender<Vec<u8>>>,
}

impl Hooks {
    fn reply(&self, bytes: Vec<u8>) {
        if let Some(ref tx) = self.responses {
            let _ = tx.send(bytes);
        }
    }
}

impl vt100::Callbacks for Hooks {
    fn set_window_title(&mut self, _: &mut vt100::Screen, title: &[u8]) {
        (self.callbacks.on_title)(String::from_utf8_lossy(title).into_owned());
    }

    fn unhandled_csi(
        &mut self,
        screen: &mut vt100::Screen,
        i1: Option<u8>,
        _i2: Option<u8>,
        params: &[&[u16]],
        c: char,
    ) {
        let first = params.first().and_then(|p| p.first()).copied().unwrap_or(0);
        match (i1, c) {
            // DECSCUSR
            (Some(b' '), 'q') => (self.callbacks.on_cursor_style)(CursorStyle::from_param(first)),
            // Device status report
            (None, 'n') if first == 5 => self.reply(b"\x1b[0n".to_vec()),
            // Cursor position report, taken from the screen at the point the
            // request was parsed rather than after the whole chunk
            (None, 'n') if first == 6 => {
                let (row, col) = screen.cursor_position();
                self.reply(format!("\x1b[{};{}R", row + 1, col + 1).into_bytes());
            }
            // Primary device attributes
            (None, 'c') if first == 0 => self.reply(b"\x1b[?1;2c".to_vec()),
            _ => trace!(?i1, %c, "unhandled csi"),
        }
    }
}

struct Inner {
    parser: vt100::Parser<Hooks>,
    palette: Option<Palette>,
    closed: bool,
}

/// [`VtEmulator`] backed by `vt100::Parser`
pub struct Vt100Emulator {
    inner: Mutex<Inner>,
    responses_rx: Mutex<Option<Receiver<Vec<u8>>>>,
}

impl Vt100Emulator {
    pub fn new(cols: u16, rows: u16, scrollback: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        let hooks = Hooks {
            callbacks: EmulatorCallbacks::noop(),
            responses: Some(tx),
        };
        Self {
            inner: Mutex::new(Inner {
                parser: vt100::Parser::new_with_callbacks(rows.max(1), cols.max(1), scrollback, hooks),
                palette: None,
                closed: false,
            }),
            responses_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn palette(&self) -> Option<Palette> {
        self.inner.lock().palette.clone()
    }
}

impl VtEmulator for Vt100Emulator {
    fn write(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let was_alt = inner.parser.screen().alternate_screen();
        inner.parser.process(data);
        let is_alt = inner.parser.screen().alternate_screen();
        if was_alt != is_alt {
            (inner.parser.callbacks().callbacks.on_alt_screen)(is_alt);
        }
    }

    fn resize(&self, cols: u16, rows: u16) {
        let mut inner = self.inner.lock();
        inner.parser.screen_mut().set_size(rows.max(1), cols.max(1));
    }

    fn size(&self) -> (u16, u16) {
        let (rows, cols) = self.inner.lock().parser.screen().size();
        (cols, rows)
    }

    fn cursor_position(&self) -> (u16, u16) {
        let (row, col) = self.inner.lock().parser.screen().cursor_position();
        (col, row)
    }

    fn has_mouse_mode(&self) -> bool {
        self.inner.lock().parser.screen().mouse_protocol_mode() != vt100::MouseProtocolMode::None
    }

    fn supports_motion_events(&self) -> bool {
        matches!(
            self.inner.lock().parser.screen().mouse_protocol_mode(),
            vt100::MouseProtocolMode::ButtonMotion | vt100::MouseProtocolMode::AnyMotion
        )
    }

    fn sgr_mouse(&self) -> bool {
        self.inner.lock().parser.screen().mouse_protocol_encoding() == vt100::MouseProtocolEncoding::Sgr
    }

    fn application_cursor_keys(&self) -> bool {
        self.inner.lock().parser.screen().application_cursor()
    }

    fn alternate_screen(&self) -> bool {
        self.inner.lock().parser.screen().alternate_screen()
    }

    fn set_theme_colors(&self, palette: Option<Palette>) {
        self.inner.lock().palette = palette;
    }

    fn set_callbacks(&self, callbacks: EmulatorCallbacks) {
        self.inner.lock().parser.callbacks_mut().callbacks = callbacks;
    }

    fn take_responses(&self) -> Option<Receiver<Vec<u8>>> {
        self.responses_rx.lock().take()
    }

    fn line_text(&self, row: u16) -> String {
        let inner = self.inner.lock();
        let screen = inner.parser.screen();
        let (_, cols) = screen.size();
        let text = screen.rows(0, cols).nth(row as usize).unwrap_or_default();
        text
    }

    fn scrollback_offset(&self) -> usize {
        self.inner.lock().parser.screen().scrollback()
    }

    fn set_scrollback_offset(&self, offset: usize) -> usize {
        let mut inner = self.inner.lock();
        inner.parser.screen_mut().set_scrollback(offset);
        inner.parser.screen().scrollback()
    }

    fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().parser.screen().contents_formatted()
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        // Dropping the sender ends the reply loop
        inner.parser.callbacks_mut().responses = None;
        inner.parser.callbacks_mut().callbacks = EmulatorCallbacks::noop();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_cursor_position_report() {
        let emu = Vt100Emulator::new(80, 24, 100);
        let rx = emu.take_responses().expect("reply queue");
        assert!(emu.take_responses().is_none());

        emu.write(b"\x1b[5;10H\x1b[6n");
        assert_eq!(rx.try_recv().ok(), Some(b"\x1b[5;10R".to_vec()));
    }

    #[test]
    fn test_callbacks_fire() {
        let emu = Vt100Emulator::new(80, 24, 0);
        let alt = Arc::new(AtomicBool::new(false));
        let title = Arc::new(Mutex::new(String::new()));
        let style = Arc::new(Mutex::new(CursorStyle::Default));

        let (a, t, s) = (alt.clone(), title.clone(), style.clone());
        emu.set_callbacks(EmulatorCallbacks {
            on_alt_screen: Box::new(move |on| a.store(on, Ordering::SeqCst)),
            on_cursor_style: Box::new(move |cs| *s.lock() = cs),
            on_title: Box::new(move |name| *t.lock() = name),
        });

        emu.write(b"\x1b]2;build\x07\x1b[?1049h\x1b[6 q");
        assert!(alt.load(Ordering::SeqCst));
        assert_eq!(title.lock().as_str(), "build");
        assert_eq!(*style.lock(), CursorStyle::SteadyBar);

        emu.write(b"\x1b[?1049l");
        assert!(!alt.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_ends_reply_queue() {
        let emu = Vt100Emulator::new(10, 5, 0);
        let rx = emu.take_responses().expect("reply queue");
        emu.close();
        assert!(emu.is_closed());
        assert!(matches!(rx.recv(), Err(_)));

        // Writes after close are ignored
        emu.write(b"hello");
        assert_eq!(emu.line_text(0), "");
    }

    #[test]
    fn test_line_text() {
        let emu = Vt100Emulator::new(20, 3, 0);
        emu.write(b"first\r\nsecond");
        assert_eq!(emu.line_text(0), "first");
        assert_eq!(emu.line_text(1), "second");
        assert_eq!(emu.line_text(7), "");
    }

    #[test]
    fn test_modes() {
        let emu = Vt100Emulator::new(80, 24, 0);
        assert!(!emu.application_cursor_keys());
        assert!(!emu.has_mouse_mode());

        emu.write(b"\x1b[?1h\x1b[?1002h\x1b[?1006h");
        assert!(emu.application_cursor_keys());
        assert!(emu.has_mouse_mode());
        assert!(emu.supports_motion_events());
        assert!(emu.sgr_mouse());
    }

    #[test]
    fn test_cursor_style_sequence() {
        assert_eq!(CursorStyle::SteadyBlock.to_sequence(), b"\x1b[2 q".to_vec());
        assert_eq!(CursorStyle::from_param(9), CursorStyle::Default);
    }
}

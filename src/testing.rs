//! Test doubles shared by the unit tests

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::daemon::{self, DaemonChannel, DaemonError, DaemonOutput};
use crate::core::term::{CursorStyle, EmulatorCallbacks, Palette, VtEmulator};
use crate::ui::overlay::{ClipboardError, ClipboardSink};
use crate::ui::router::WindowFactory;
use crate::wm::{Rect, SessionState, TerminalWindow, WindowOptions};

/// Observable state of a [`RecordingEmulator`]
pub struct EmulatorState {
    pub written: Vec<u8>,
    pub resizes: Vec<(u16, u16)>,
    pub cols: u16,
    pub rows: u16,
    pub cursor: (u16, u16),
    pub mouse: bool,
    pub motion: bool,
    pub sgr: bool,
    pub app_cursor: bool,
    pub alt: bool,
    pub palette: Option<Palette>,
    pub lines: Vec<String>,
    pub scrollback: usize,
    pub closed: bool,
    callbacks: EmulatorCallbacks,
    responses_tx: Option<Sender<Vec<u8>>>,
    responses_rx: Option<Receiver<Vec<u8>>>,
}

impl EmulatorState {
    /// Lines beyond the screen are history; with no scripted lines the
    /// emulator pretends to hold 100 lines of it.
    fn max_scrollback(&self) -> usize {
        if self.lines.is_empty() {
            100
        } else {
            self.lines.len().saturating_sub(self.rows as usize)
        }
    }
}

/// Emulator that records what it is fed. Clones share state, so a test can
/// hand one clone to a window and inspect the other.
#[derive(Clone)]
pub struct RecordingEmulator {
    state: Arc<Mutex<EmulatorState>>,
}

impl RecordingEmulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            state: Arc::new(Mutex::new(EmulatorState {
                written: Vec::new(),
                resizes: Vec::new(),
                cols,
                rows,
                cursor: (0, 0),
                mouse: false,
                motion: false,
                sgr: false,
                app_cursor: false,
                alt: false,
                palette: None,
                lines: Vec::new(),
                scrollback: 0,
                closed: false,
                callbacks: EmulatorCallbacks::noop(),
                responses_tx: Some(tx),
                responses_rx: Some(rx),
            })),
        }
    }

    pub fn boxed(&self) -> Box<dyn VtEmulator> {
        Box::new(self.clone())
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, EmulatorState> {
        self.state.lock()
    }

    pub fn with_mouse(self, motion: bool, sgr: bool) -> Self {
        {
            let mut s = self.state.lock();
            s.mouse = true;
            s.motion = motion;
            s.sgr = sgr;
        }
        self
    }

    /// Script the buffer, oldest line first. The last `rows` lines are the
    /// screen.
    pub fn with_lines(self, lines: &[&str]) -> Self {
        self.state.lock().lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().written).into_owned()
    }

    /// Queue a reply as if the emulator answered a query
    pub fn reply(&self, bytes: &[u8]) {
        if let Some(ref tx) = self.state.lock().responses_tx {
            let _ = tx.send(bytes.to_vec());
        }
    }

    pub fn fire_alt_screen(&self, on: bool) {
        let s = self.state.lock();
        (s.callbacks.on_alt_screen)(on);
    }

    pub fn fire_cursor_style(&self, style: CursorStyle) {
        let s = self.state.lock();
        (s.callbacks.on_cursor_style)(style);
    }

    pub fn fire_title(&self, title: &str) {
        let s = self.state.lock();
        (s.callbacks.on_title)(title.to_string());
    }
}

impl VtEmulator for RecordingEmulator {
    fn write(&self, data: &[u8]) {
        let mut s = self.state.lock();
        if !s.closed {
            s.written.extend_from_slice(data);
        }
    }

    fn resize(&self, cols: u16, rows: u16) {
        let mut s = self.state.lock();
        s.cols = cols;
        s.rows = rows;
        s.resizes.push((cols, rows));
    }

    fn size(&self) -> (u16, u16) {
        let s = self.state.lock();
        (s.cols, s.rows)
    }

    fn cursor_position(&self) -> (u16, u16) {
        self.state.lock().cursor
    }

    fn has_mouse_mode(&self) -> bool {
        self.state.lock().mouse
    }

    fn supports_motion_events(&self) -> bool {
        self.state.lock().motion
    }

    fn sgr_mouse(&self) -> bool {
        self.state.lock().sgr
    }

    fn application_cursor_keys(&self) -> bool {
        self.state.lock().app_cursor
    }

    fn alternate_screen(&self) -> bool {
        self.state.lock().alt
    }

    fn set_theme_colors(&self, palette: Option<Palette>) {
        self.state.lock().palette = palette;
    }

    fn set_callbacks(&self, callbacks: EmulatorCallbacks) {
        self.state.lock().callbacks = callbacks;
    }

    fn take_responses(&self) -> Option<Receiver<Vec<u8>>> {
        self.state.lock().responses_rx.take()
    }

    fn line_text(&self, row: u16) -> String {
        let s = self.state.lock();
        let rows = s.rows as usize;
        let idx = if s.lines.len() <= rows {
            row as usize
        } else {
            s.lines.len() - rows - s.scrollback + row as usize
        };
        s.lines.get(idx).cloned().unwrap_or_default()
    }

    fn scrollback_offset(&self) -> usize {
        self.state.lock().scrollback
    }

    fn set_scrollback_offset(&self, offset: usize) -> usize {
        let mut s = self.state.lock();
        s.scrollback = offset.min(s.max_scrollback());
        s.scrollback
    }

    fn snapshot(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    fn close(&self) {
        let mut s = self.state.lock();
        s.closed = true;
        s.responses_tx = None;
        s.callbacks = EmulatorCallbacks::noop();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Daemon channel that records requests
#[derive(Default)]
pub struct RecordingDaemon {
    pub input: Mutex<Vec<u8>>,
    pub resizes: Mutex<Vec<(u16, u16)>>,
    pub closes: Mutex<usize>,
    pub kills: Mutex<usize>,
    /// Accept at most this many bytes per write
    pub accept_limit: Mutex<Option<usize>>,
}

impl RecordingDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn input_text(&self) -> String {
        String::from_utf8_lossy(&self.input.lock()).into_owned()
    }
}

impl DaemonChannel for RecordingDaemon {
    fn write(&self, data: &[u8]) -> daemon::Result<usize> {
        if *self.closes.lock() > 0 {
            return Err(DaemonError::Disconnected);
        }
        let n = match *self.accept_limit.lock() {
            Some(limit) => limit.min(data.len()),
            None => data.len(),
        };
        self.input.lock().extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn resize(&self, cols: u16, rows: u16) -> daemon::Result<()> {
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    fn close(&self) {
        *self.closes.lock() += 1;
    }

    fn kill_session(&self) -> daemon::Result<()> {
        *self.kills.lock() += 1;
        Ok(())
    }
}

/// A detached window with a recording emulator sized to `rect`'s interior
pub fn window(id: &str, rect: Rect) -> (TerminalWindow, RecordingEmulator) {
    let interior = rect.interior();
    let emu = RecordingEmulator::new(interior.0, interior.1);
    let win = TerminalWindow::detached(id, rect, emu.boxed());
    (win, emu)
}

/// Session state over a 120x40 screen holding detached windows
pub fn state_with(rects: &[(&str, Rect)]) -> (SessionState, Vec<RecordingEmulator>) {
    let mut state = SessionState::new(120, 40);
    let mut emulators = Vec::new();
    for (id, rect) in rects {
        let (win, emu) = window(id, *rect);
        state.add_window(win);
        emulators.push(emu);
    }
    (state, emulators)
}

/// A daemon-backed window fed by `emu`, recording what the daemon receives
pub fn daemon_window(
    id: &str,
    rect: Rect,
    emu: &RecordingEmulator,
) -> (TerminalWindow, Arc<RecordingDaemon>, DaemonOutput) {
    let daemon = RecordingDaemon::new();
    let (win, output) = TerminalWindow::with_daemon_emulator(
        id,
        &format!("session-{}", id),
        rect,
        emu.boxed(),
        daemon.clone(),
        &WindowOptions::default(),
    );
    (win, daemon, output)
}

/// Factory producing detached windows; keeps their emulators
#[derive(Clone, Default)]
pub struct DetachedFactory {
    pub emulators: Arc<Mutex<Vec<RecordingEmulator>>>,
    pub fail: Arc<Mutex<bool>>,
}

impl WindowFactory for DetachedFactory {
    fn create(&mut self, id: &str, rect: Rect) -> anyhow::Result<TerminalWindow> {
        if *self.fail.lock() {
            anyhow::bail!("spawn refused");
        }
        let (win, emu) = window(id, rect);
        self.emulators.lock().push(emu);
        Ok(win)
    }
}

/// Clipboard that keeps every text it receives
#[derive(Clone, Default)]
pub struct RecordingClipboard {
    pub texts: Arc<Mutex<Vec<String>>>,
}

impl RecordingClipboard {
    pub fn last(&self) -> Option<String> {
        self.texts.lock().last().cloned()
    }
}

impl ClipboardSink for RecordingClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.texts.lock().push(text.to_string());
        Ok(())
    }
}

//! TerminalWindow - one shell session with its geometry and render caches

use std::sync::Arc;

use crossterm::event::KeyEvent;
use tracing::{debug, info};

use crate::copymode::{self, CopyMode, CopyOutcome};
use crate::core::daemon::{DaemonChannel, DaemonOutput};
use crate::core::pty::ShellCommand;
use crate::core::session::{self, ExitOutcome, ResizeOutcome, Session, SessionOptions};
use crate::core::term::{CursorStyle, Vt100Emulator, VtEmulator};

pub use crate::core::session::WindowError;

/// Unique identifier for a window
pub type WindowId = String;

/// Create a fresh window id
pub fn new_window_id() -> WindowId {
    uuid::Uuid::new_v4().to_string()
}

/// Window rectangle in viewport cells. Width and height include the
/// one-cell border on every side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Usable terminal area (cols, rows), floored at 1
    pub fn interior(&self) -> (u16, u16) {
        (interior_len(self.w), interior_len(self.h))
    }
}

fn interior_len(outer: i32) -> u16 {
    (outer - 2).clamp(1, u16::MAX as i32) as u16
}

/// Hit/miss counters of the rendered-content cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Rendered content placed at a window position
#[derive(Debug, Clone)]
pub struct Layer {
    pub rect: Rect,
    pub content: Arc<Vec<u8>>,
}

/// Mouse selection granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    Char,
    Word,
    Line,
}

/// Mouse selection in terminal-relative cells (col, row), inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub kind: SelectionKind,
    pub anchor: (u16, u16),
    pub head: (u16, u16),
    /// Still following the pointer
    pub dragging: bool,
}

impl Selection {
    /// Start and end in reading order
    pub fn ordered(&self) -> ((u16, u16), (u16, u16)) {
        let (a, b) = (self.anchor, self.head);
        if (a.1, a.0) <= (b.1, b.0) {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == SelectionKind::Char && self.anchor == self.head
    }
}

/// Settings applied when launching a window's session
#[derive(Clone)]
pub struct WindowOptions {
    pub scrollback: usize,
    pub session: SessionOptions,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            scrollback: 10_000,
            session: SessionOptions::default(),
        }
    }
}

/// A terminal window hosting one shell session
pub struct TerminalWindow {
    pub id: WindowId,
    /// Title reported by the child
    pub title: String,
    /// Name given by the user, shown instead of the title
    pub custom_name: Option<String>,
    pub rect: Rect,
    /// Paint order, higher is frontmost
    pub z: i32,
    pub workspace: u8,
    pub minimized: bool,
    /// Minimize animation in flight
    pub minimizing: bool,
    pub process_exited: bool,
    /// Drag or resize in progress
    pub manipulating: bool,
    /// Rectangle to restore when leaving maximized state
    pub restore_rect: Option<Rect>,
    pub selection: Option<Selection>,
    copy_mode: Option<CopyMode>,
    session: Session,
    dirty: bool,
    content_dirty: bool,
    position_dirty: bool,
    cached_content: Option<Arc<Vec<u8>>>,
    cached_layer: Option<Layer>,
    cache_stats: CacheStats,
    host_sequences: Vec<u8>,
    redraw_signals: u32,
    /// Emulator was resized visually; the pseudo-terminal lags behind
    size_pending: bool,
}

impl TerminalWindow {
    fn from_session(id: &str, rect: Rect, session: Session) -> Self {
        Self {
            id: id.to_string(),
            title: String::new(),
            custom_name: None,
            rect,
            z: 0,
            workspace: 1,
            minimized: false,
            minimizing: false,
            process_exited: false,
            manipulating: false,
            restore_rect: None,
            selection: None,
            copy_mode: None,
            session,
            dirty: true,
            content_dirty: true,
            position_dirty: true,
            cached_content: None,
            cached_layer: None,
            cache_stats: CacheStats::default(),
            host_sequences: Vec::new(),
            redraw_signals: 0,
            size_pending: false,
        }
    }

    /// Launch `command` in a new local pseudo-terminal.
    pub fn spawn_local(
        id: &str,
        rect: Rect,
        command: &ShellCommand,
        options: &WindowOptions,
    ) -> session::Result<Self> {
        let (cols, rows) = rect.interior();
        let emulator = Box::new(Vt100Emulator::new(cols, rows, options.scrollback));
        let session = Session::spawn_local(id, emulator, command, options.session.clone())?;
        info!(window = id, cols, rows, "window created");
        Ok(Self::from_session(id, rect, session))
    }

    /// Attach to a session owned by the daemon.
    pub fn spawn_daemon(
        id: &str,
        session_id: &str,
        rect: Rect,
        channel: Arc<dyn DaemonChannel>,
        options: &WindowOptions,
    ) -> (Self, DaemonOutput) {
        let (cols, rows) = rect.interior();
        let emulator = Box::new(Vt100Emulator::new(cols, rows, options.scrollback));
        Self::with_daemon_emulator(id, session_id, rect, emulator, channel, options)
    }

    pub(crate) fn with_daemon_emulator(
        id: &str,
        session_id: &str,
        rect: Rect,
        emulator: Box<dyn VtEmulator>,
        channel: Arc<dyn DaemonChannel>,
        options: &WindowOptions,
    ) -> (Self, DaemonOutput) {
        let (session, output) =
            Session::spawn_daemon(id, session_id, emulator, channel, options.session.clone());
        (Self::from_session(id, rect, session), output)
    }

    /// A window with an emulator but no process, e.g. a restored scrollback
    pub fn detached(id: &str, rect: Rect, emulator: Box<dyn VtEmulator>) -> Self {
        Self::from_session(id, rect, Session::detached(id, emulator))
    }

    /// Name shown in the title bar and dock
    pub fn display_title(&self) -> &str {
        match self.custom_name {
            Some(ref name) => name,
            None if !self.title.is_empty() => &self.title,
            None => "shell",
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_daemon(&self) -> bool {
        self.session.is_daemon()
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        self.session.exit_outcome()
    }

    pub fn with_emulator<R>(&self, f: impl FnOnce(&dyn VtEmulator) -> R) -> Option<R> {
        self.session.with_emulator(f)
    }

    /// Whether the child asked for mouse reports
    pub fn tracks_mouse(&self) -> bool {
        self.with_emulator(|e| e.has_mouse_mode()).unwrap_or(false)
    }

    pub fn application_cursor_keys(&self) -> bool {
        self.with_emulator(|e| e.application_cursor_keys()).unwrap_or(false)
    }

    /// Send input bytes to the child.
    pub fn send_input(&mut self, data: &[u8]) -> session::Result<()> {
        self.session.write(data)?;
        // Caches are refreshed at render time
        self.dirty = true;
        self.content_dirty = true;
        Ok(())
    }

    /// Resize the window, its emulator and its pseudo-terminal.
    pub fn resize(&mut self, width: i32, height: i32) -> session::Result<ResizeOutcome> {
        self.rect.w = width;
        self.rect.h = height;
        let (cols, rows) = self.rect.interior();
        self.mark_moved();
        self.mark_content_dirty();
        self.size_pending = false;

        let outcome = self.session.resize(cols, rows)?;
        if outcome.redraw_signalled {
            self.redraw_signals += 1;
        }
        debug!(window = %self.id, cols, rows, changed = outcome.changed, "window resized");
        Ok(outcome)
    }

    /// Resize for display only; the pseudo-terminal keeps its size until a
    /// real [`resize`](Self::resize).
    pub fn resize_visual(&mut self, width: i32, height: i32) {
        self.rect.w = width;
        self.rect.h = height;
        let (cols, rows) = self.rect.interior();
        self.session.resize_emulator(cols, rows);
        self.size_pending = true;
        self.mark_moved();
    }

    /// A visual resize has not been committed yet
    pub fn has_pending_size(&self) -> bool {
        self.size_pending
    }

    pub fn move_to(&mut self, x: i32, y: i32) {
        if self.rect.x != x || self.rect.y != y {
            self.rect.x = x;
            self.rect.y = y;
            self.mark_moved();
        }
    }

    /// Move and resize in one step, committing the size.
    pub fn set_rect(&mut self, rect: Rect) -> session::Result<ResizeOutcome> {
        self.move_to(rect.x, rect.y);
        if rect.w != self.rect.w || rect.h != self.rect.h || self.size_pending {
            self.resize(rect.w, rect.h)
        } else {
            Ok(ResizeOutcome::default())
        }
    }

    /// Tear down the session and drop every cache. Idempotent.
    pub fn close(&mut self) {
        self.session.close();
        self.copy_mode = None;
        self.selection = None;
        self.cached_content = None;
        self.cached_layer = None;
        self.dirty = true;
    }

    /// Terminate the session for good; daemon sessions are killed instead of
    /// detached.
    pub fn kill(&mut self) -> session::Result<()> {
        let result = self.session.kill();
        self.close();
        result
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Number of redraw signals sent to the child
    pub fn redraw_signals(&self) -> u32 {
        self.redraw_signals
    }

    /// Absorb state published by the I/O tasks and emulator callbacks.
    /// Returns whether the window needs repainting.
    pub fn poll(&mut self) -> bool {
        let signals = self.session.signals().clone();
        let mut changed = false;
        if signals.take_output() {
            self.mark_content_dirty();
            changed = true;
        }
        if let Some(title) = signals.take_title() {
            self.title = title;
            self.dirty = true;
            changed = true;
        }
        if let Some(style) = signals.take_cursor_style() {
            self.queue_cursor_style(style);
        }
        if !self.process_exited && signals.process_exited.load(std::sync::atomic::Ordering::Acquire) {
            self.process_exited = true;
            changed = true;
        }
        changed
    }

    pub fn alternate_screen(&self) -> bool {
        self.session
            .signals()
            .alt_screen
            .load(std::sync::atomic::Ordering::Acquire)
    }

    fn queue_cursor_style(&mut self, style: CursorStyle) {
        self.host_sequences.extend_from_slice(&style.to_sequence());
    }

    /// Escape sequences the emulator absorbed that the host terminal must
    /// see (cursor shape changes).
    pub fn take_host_sequences(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.host_sequences)
    }

    // -- dirty tracking and caches --

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_content_dirty(&self) -> bool {
        self.content_dirty
    }

    pub fn is_position_dirty(&self) -> bool {
        self.position_dirty
    }

    pub fn mark_content_dirty(&mut self) {
        self.dirty = true;
        self.content_dirty = true;
    }

    /// Position changed; content cache stays valid
    pub fn mark_moved(&mut self) {
        self.dirty = true;
        self.position_dirty = true;
    }

    /// Force the next render to rebuild everything
    pub fn invalidate_cache(&mut self) {
        self.mark_content_dirty();
        self.mark_moved();
        self.drop_content_cache();
    }

    /// Drop the caches and have a local child repaint itself
    pub fn force_redraw(&mut self) {
        self.invalidate_cache();
        if self.session.signal_redraw() {
            self.redraw_signals += 1;
        }
    }

    fn drop_content_cache(&mut self) {
        debug_assert!(self.content_dirty || self.position_dirty);
        if self.cached_content.take().is_some() {
            self.cache_stats.invalidations += 1;
        }
        self.cached_layer = None;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache_stats
    }

    pub fn reset_cache_stats(&mut self) {
        self.cache_stats = CacheStats::default();
    }

    pub fn has_cached_content(&self) -> bool {
        self.cached_content.is_some()
    }

    /// Rendered content, rebuilt from the emulator when content changed.
    pub fn content(&mut self) -> Arc<Vec<u8>> {
        if self.content_dirty {
            self.drop_content_cache();
            self.content_dirty = false;
        }
        match self.cached_content {
            Some(ref cached) => {
                self.cache_stats.hits += 1;
                cached.clone()
            }
            None => {
                self.cache_stats.misses += 1;
                let snapshot = Arc::new(self.with_emulator(|e| e.snapshot()).unwrap_or_default());
                self.cached_content = Some(snapshot.clone());
                snapshot
            }
        }
    }

    /// Content placed at the current position. Moves only rebuild the layer.
    pub fn layer(&mut self) -> Layer {
        let content = self.content();
        if self.position_dirty {
            self.cached_layer = None;
            self.position_dirty = false;
        }
        let rect = self.rect;
        let layer = self.cached_layer.get_or_insert_with(|| Layer { rect, content });
        self.dirty = false;
        layer.clone()
    }

    // -- copy mode and selection --

    pub fn copy_mode(&self) -> Option<&CopyMode> {
        self.copy_mode.as_ref()
    }

    pub fn in_copy_mode(&self) -> bool {
        self.copy_mode.is_some()
    }

    pub fn enter_copy_mode(&mut self) {
        let Some(mode) = self.with_emulator(|e| CopyMode::enter(e)) else {
            return;
        };
        self.copy_mode = Some(mode);
        self.selection = None;
        self.mark_content_dirty();
    }

    /// Leave copy mode and return to the live tail of the output.
    pub fn exit_copy_mode(&mut self) {
        self.copy_mode = None;
        self.with_emulator(|e| e.set_scrollback_offset(0));
        self.mark_content_dirty();
    }

    /// Route a key to copy mode. Returns yanked text, if any.
    pub fn copy_mode_key(&mut self, key: &KeyEvent) -> Option<String> {
        let mut mode = self.copy_mode.take()?;
        let outcome = self
            .with_emulator(|e| mode.handle_key(key, e))
            .unwrap_or(CopyOutcome::Exit);
        self.copy_mode = Some(mode);
        self.mark_content_dirty();
        match outcome {
            CopyOutcome::Continue => None,
            CopyOutcome::Exit => {
                self.exit_copy_mode();
                None
            }
            CopyOutcome::Yank(text) => {
                self.exit_copy_mode();
                Some(text)
            }
        }
    }

    /// Scroll the history view by `delta` lines (positive is older).
    pub fn scroll_history(&mut self, delta: i32) {
        let applied = self.with_emulator(|e| {
            let current = e.scrollback_offset() as i64;
            let target = (current + delta as i64).max(0) as usize;
            e.set_scrollback_offset(target)
        });
        if applied.is_some() {
            self.mark_content_dirty();
        }
    }

    /// Text under a mouse selection
    pub fn selection_text(&self) -> Option<String> {
        let sel = self.selection?;
        if sel.is_empty() {
            return None;
        }
        let ((c1, r1), (c2, r2)) = sel.ordered();
        self.with_emulator(|e| {
            let mut lines = Vec::new();
            for row in r1..=r2 {
                let line = e.line_text(row);
                let text = match sel.kind {
                    SelectionKind::Line => line,
                    _ => {
                        let from = if row == r1 { c1 } else { 0 };
                        let to = if row == r2 { Some(c2) } else { None };
                        copymode::slice_cells(&line, from, to)
                    }
                };
                lines.push(text.trim_end().to_string());
            }
            lines.join("\n")
        })
    }
}

impl Drop for TerminalWindow {
    fn drop(&mut self) {
        self.close();
    }
}

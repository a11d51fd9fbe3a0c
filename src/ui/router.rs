//! Input router - decides who gets each key and mouse event.
//!
//! Keys are offered, in order, to the quit dialog, the tape manager, the
//! rename prompt, the informational overlays, copy mode, the leader
//! prefix and finally the current mode. Mouse events go to an active
//! drag or resize first, then the dock, title buttons, selections, the
//! focused child (terminal mode) and window focus.

use std::time::{Duration, Instant};

use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use tracing::{debug, error, info, warn};

use super::actions::{Action, ConfigKeybinds, KeybindRegistry};
use super::keymapper::KeyMapper;
use super::overlay::{
    ClipboardSink, QuitChoice, QuitDialog, RenameBuffer, RenameOutcome, SystemClipboard, TapeDeck,
    TapeManager,
};
use crate::config::Config;
use crate::wm::geometry::{self, Button};
use crate::wm::{
    new_window_id, ChildPrefix, GeometryEngine, GeometrySettings, Interaction, Mode, Preselection,
    Rect, SessionState, SplitTree, TerminalWindow, TilingEngine, WindowError, WindowId,
};

/// Quits without the dialog when nothing else claims it in
/// window-management mode
pub const EMERGENCY_QUIT: &str = "ctrl+q";
/// Lines scrolled per wheel notch
const WHEEL_LINES: i32 = 3;

/// Creates the terminal behind a new window
pub trait WindowFactory {
    fn create(&mut self, id: &str, rect: Rect) -> anyhow::Result<TerminalWindow>;
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub leader: String,
    pub exit_key: String,
    pub prefix_timeout: Duration,
    pub mode_switch_guard: Duration,
    pub default_size: (i32, i32),
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            leader: config.leader.clone(),
            exit_key: config.terminal.exit_key.clone(),
            prefix_timeout: config.prefix_timeout(),
            mode_switch_guard: config.mode_switch_guard(),
            default_size: (config.window.default_width, config.window.default_height),
        }
    }
}

pub struct InputRouter {
    settings: RouterSettings,
    keybinds: Box<dyn KeybindRegistry>,
    geometry: GeometryEngine,
    tiling: Box<dyn TilingEngine>,
    factory: Box<dyn WindowFactory>,
    tape: Box<dyn TapeManager>,
    clipboard: Box<dyn ClipboardSink>,
    quit_dialog: QuitDialog,
    rename: RenameBuffer,
    /// Lines back from the newest log entry
    log_scroll: usize,
    /// Window whose mouse selection follows the pointer
    selecting: Option<WindowId>,
}

impl InputRouter {
    pub fn new(config: &Config, factory: Box<dyn WindowFactory>) -> Self {
        Self {
            settings: RouterSettings::from_config(config),
            keybinds: Box::new(ConfigKeybinds::from_config(config)),
            geometry: GeometryEngine::new(GeometrySettings::from_config(config)),
            tiling: Box::new(SplitTree::new(config.window.min_width, config.window.min_height)),
            factory,
            tape: Box::new(TapeDeck::default()),
            clipboard: Box::new(SystemClipboard::default()),
            quit_dialog: QuitDialog::default(),
            rename: RenameBuffer::default(),
            log_scroll: 0,
            selecting: None,
        }
    }

    pub fn with_clipboard(mut self, clipboard: Box<dyn ClipboardSink>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn with_tape(mut self, tape: Box<dyn TapeManager>) -> Self {
        self.tape = tape;
        self
    }

    pub fn with_keybinds(mut self, keybinds: Box<dyn KeybindRegistry>) -> Self {
        self.keybinds = keybinds;
        self
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn tiling(&self) -> &dyn TilingEngine {
        self.tiling.as_ref()
    }

    pub fn tiling_mut(&mut self) -> &mut dyn TilingEngine {
        self.tiling.as_mut()
    }

    pub fn quit_dialog(&self) -> &QuitDialog {
        &self.quit_dialog
    }

    pub fn rename(&self) -> &RenameBuffer {
        &self.rename
    }

    pub fn tape(&self) -> &dyn TapeManager {
        self.tape.as_ref()
    }

    pub fn log_scroll(&self) -> usize {
        self.log_scroll
    }

    /// Route one terminal event. Returns true when it was consumed.
    pub fn handle_event(&mut self, state: &mut SessionState, event: Event, now: Instant) -> bool {
        match event {
            Event::Key(key) => self.handle_key(state, key, now),
            Event::Mouse(mouse) => self.handle_mouse(state, mouse, now),
            Event::Resize(width, height) => {
                state.resize_screen(width, height);
                if state.tiling {
                    self.tiling.apply(state);
                }
                true
            }
            Event::Paste(text) => self.paste(state, &text),
            _ => false,
        }
    }

    fn paste(&mut self, state: &mut SessionState, text: &str) -> bool {
        if self.rename.is_active() {
            for c in text.chars().filter(|c| !c.is_control()) {
                self.rename.handle_key(&KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
            }
            state.needs_redraw = true;
            return true;
        }
        if state.mode != Mode::Terminal {
            return false;
        }
        if let Err(e) = self.send_to_focused(state, text.as_bytes()) {
            self.downgrade(state, e);
        }
        true
    }

    // -- keys --

    pub fn handle_key(&mut self, state: &mut SessionState, key: KeyEvent, now: Instant) -> bool {
        if key.kind == KeyEventKind::Release {
            return false;
        }
        if state.expire_prefix(now, self.settings.prefix_timeout) {
            debug!("prefix timed out");
        }

        if self.quit_dialog.is_visible() {
            match self.quit_dialog.handle_key(&key) {
                QuitChoice::Confirm => {
                    info!("quit confirmed");
                    state.quit_requested = true;
                }
                QuitChoice::Cancel => debug!("quit cancelled"),
                QuitChoice::Pending => {}
            }
            state.needs_redraw = true;
            return true;
        }

        if self.tape.is_visible() && self.tape.handle_key(&key) {
            state.needs_redraw = true;
            return true;
        }

        if self.rename.is_active() {
            if let RenameOutcome::Commit(name) = self.rename.handle_key(&key) {
                if let Some(window) = state.focused_window_mut() {
                    let name = name.trim();
                    window.custom_name = (!name.is_empty()).then(|| name.to_string());
                    window.mark_moved();
                }
            }
            state.needs_redraw = true;
            return true;
        }

        self.dispatch_mode(state, &key, now)
    }

    fn dispatch_mode(&mut self, state: &mut SessionState, key: &KeyEvent, now: Instant) -> bool {
        if self.overlay_key(state, key) {
            return true;
        }

        if state.focused_window().map_or(false, |w| w.in_copy_mode()) {
            return self.copy_mode_key(state, key);
        }

        let key_str = KeyMapper::key_string(key);
        let is_leader = key_str
            .as_deref()
            .map_or(false, |k| k.eq_ignore_ascii_case(&self.settings.leader));
        if is_leader {
            if state.prefix.is_active() {
                debug!("leader pressed twice");
                state.clear_prefix();
            } else {
                state.arm_leader(now);
            }
            state.needs_redraw = true;
            return true;
        }

        if let Some(kind) = state.prefix.child() {
            self.child_prefix_key(state, kind, key, now);
            return true;
        }
        if state.prefix.is_active() {
            self.prefix_command(state, key, now);
            return true;
        }

        match state.mode {
            Mode::Terminal => self.terminal_key(state, key, key_str.as_deref(), now),
            Mode::WindowManagement => self.window_management_key(state, key_str.as_deref(), now),
        }
    }

    /// Informational overlays swallow every key while shown
    fn overlay_key(&mut self, state: &mut SessionState, key: &KeyEvent) -> bool {
        let close = matches!(key.code, KeyCode::Esc | KeyCode::Char('q'));
        if state.overlays.help {
            if close || key.code == KeyCode::Char('?') {
                state.overlays.help = false;
            }
        } else if state.overlays.log_viewer {
            match key.code {
                _ if close => state.overlays.log_viewer = false,
                KeyCode::Up | KeyCode::Char('k') => self.log_scroll += 1,
                KeyCode::Down | KeyCode::Char('j') => self.log_scroll = self.log_scroll.saturating_sub(1),
                KeyCode::PageUp => self.log_scroll += 10,
                KeyCode::PageDown => self.log_scroll = self.log_scroll.saturating_sub(10),
                KeyCode::Char('G') => self.log_scroll = 0,
                _ => {}
            }
        } else if state.overlays.cache_stats {
            if close {
                state.overlays.cache_stats = false;
            } else if key.code == KeyCode::Char('r') {
                for window in state.windows.iter_mut() {
                    window.reset_cache_stats();
                }
            }
        } else {
            return false;
        }
        state.needs_redraw = true;
        true
    }

    fn copy_mode_key(&mut self, state: &mut SessionState, key: &KeyEvent) -> bool {
        let Some(window) = state.focused_window_mut() else {
            return false;
        };
        if let Some(text) = window.copy_mode_key(key) {
            self.copy_to_clipboard(&text);
        }
        state.needs_redraw = true;
        true
    }

    fn prefix_command(&mut self, state: &mut SessionState, key: &KeyEvent, now: Instant) {
        state.needs_redraw = true;
        let child = match key.code {
            KeyCode::Char('w') => Some(ChildPrefix::Workspace),
            KeyCode::Char('m') => Some(ChildPrefix::Minimize),
            KeyCode::Char('t') => Some(ChildPrefix::Tiling),
            KeyCode::Char('D') => Some(ChildPrefix::Debug),
            KeyCode::Char('T') => Some(ChildPrefix::Tape),
            _ => None,
        };
        if let Some(kind) = child {
            state.open_child_prefix(kind, now);
            return;
        }

        state.clear_prefix();
        let action = match key.code {
            KeyCode::Char('c') => Action::NewWindow,
            KeyCode::Char('x') => Action::CloseWindow,
            KeyCode::Char('n') => Action::NextWindow,
            KeyCode::Char('p') => Action::PrevWindow,
            KeyCode::Char('r') => Action::RenameWindow,
            KeyCode::Char('[') => Action::CopyMode,
            KeyCode::Char('?') => Action::ToggleHelp,
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Char('d') => Action::Detach,
            KeyCode::Char('z') => Action::ToggleMaximize,
            KeyCode::Char(' ') => Action::ToggleTiling,
            KeyCode::Tab => {
                self.toggle_mode(state, now);
                return;
            }
            KeyCode::Esc => return,
            _ => {
                debug!(key = ?key.code, "unknown prefix command");
                return;
            }
        };
        self.run_action(state, action, now);
    }

    fn child_prefix_key(&mut self, state: &mut SessionState, kind: ChildPrefix, key: &KeyEvent, now: Instant) {
        state.clear_prefix();
        state.needs_redraw = true;

        let c = match key.code {
            KeyCode::Char(c) => c,
            KeyCode::Left if kind == ChildPrefix::Tiling => return self.tiling.set_preselection(Preselection::Left),
            KeyCode::Right if kind == ChildPrefix::Tiling => return self.tiling.set_preselection(Preselection::Right),
            KeyCode::Up if kind == ChildPrefix::Tiling => return self.tiling.set_preselection(Preselection::Up),
            KeyCode::Down if kind == ChildPrefix::Tiling => return self.tiling.set_preselection(Preselection::Down),
            _ => return,
        };

        let action = match kind {
            ChildPrefix::Workspace => match c.to_digit(10) {
                Some(n @ 1..=9) => Some(Action::SwitchWorkspace(n as u8)),
                _ => shifted_digit(c).map(Action::MoveToWorkspace),
            },
            ChildPrefix::Minimize => match c {
                'm' => Some(Action::MinimizeWindow),
                'M' => Some(Action::RestoreAll),
                _ => {
                    if let Some(n @ 1..=9) = c.to_digit(10) {
                        let minimized = state.minimized_indices();
                        if let Some(&idx) = minimized.get(n as usize - 1) {
                            self.restore(state, idx);
                        }
                    }
                    None
                }
            },
            ChildPrefix::Tiling => match c {
                '|' => Some(Action::SplitHorizontal),
                '-' => Some(Action::SplitVertical),
                'r' => Some(Action::RotateSplit),
                '=' => Some(Action::EqualizeSplits),
                't' => Some(Action::ToggleTiling),
                'a' => Some(Action::TileAll),
                'h' => Some(Action::Preselect(Preselection::Left)),
                'l' => Some(Action::Preselect(Preselection::Right)),
                'k' => Some(Action::Preselect(Preselection::Up)),
                'j' => Some(Action::Preselect(Preselection::Down)),
                _ => None,
            },
            ChildPrefix::Debug => match c {
                'l' => Some(Action::ToggleLogViewer),
                'c' => Some(Action::ToggleCacheStats),
                'r' => {
                    for window in state.windows.iter_mut() {
                        window.invalidate_cache();
                    }
                    info!("render caches invalidated");
                    None
                }
                _ => None,
            },
            ChildPrefix::Tape => {
                self.tape_command(state, c);
                None
            }
        };
        match action {
            Some(action) => self.run_action(state, action, now),
            None => debug!(?kind, key = ?key.code, "child prefix closed"),
        }
    }

    fn tape_command(&mut self, state: &mut SessionState, c: char) {
        match c {
            'm' => self.tape.show(),
            'r' => {
                self.tape.start_recording();
            }
            's' => {
                self.tape.stop_recording();
            }
            'p' => {
                let Some(bytes) = self.tape.play() else {
                    return;
                };
                // Replayed input is not recorded again
                let recording = self.tape.is_recording();
                if recording {
                    self.tape.stop_recording();
                }
                if let Err(e) = self.send_to_focused(state, &bytes) {
                    warn!("tape playback failed: {}", e);
                }
                if recording {
                    self.tape.start_recording();
                }
            }
            _ => {}
        }
    }

    fn toggle_mode(&mut self, state: &mut SessionState, now: Instant) {
        match state.mode {
            Mode::Terminal => state.enter_window_management(),
            Mode::WindowManagement if state.focused_index().is_some() => state.enter_terminal_mode(now),
            Mode::WindowManagement => debug!("no window to type into"),
        }
    }

    fn terminal_key(&mut self, state: &mut SessionState, key: &KeyEvent, key_str: Option<&str>, now: Instant) -> bool {
        if let Some(k) = key_str {
            if k == self.settings.exit_key {
                state.enter_window_management();
                state.needs_redraw = true;
                return true;
            }
            if let Some(rest) = k.strip_prefix("alt+") {
                let action = match rest {
                    "n" => Some(Action::NextWindow),
                    "p" => Some(Action::PrevWindow),
                    _ => match rest.parse::<u8>() {
                        Ok(n @ 1..=9) => Some(Action::SwitchWorkspace(n)),
                        _ => None,
                    },
                };
                if let Some(action) = action {
                    self.run_action(state, action, now);
                    return true;
                }
            }
        }

        if state.in_mode_switch_guard(now, self.settings.mode_switch_guard) && is_guarded(key) {
            debug!(key = ?key.code, "dropped key inside mode switch guard");
            return true;
        }

        let cursor_keys = state.focused_window().map_or(false, |w| w.application_cursor_keys());
        let Some(bytes) = KeyMapper::map(key, cursor_keys) else {
            return false;
        };
        match self.send_to_focused(state, &bytes) {
            Ok(()) => self.tape.record(&bytes),
            Err(e) => self.downgrade(state, e),
        }
        true
    }

    fn window_management_key(&mut self, state: &mut SessionState, key_str: Option<&str>, now: Instant) -> bool {
        let Some(k) = key_str else {
            return false;
        };
        if let Some(name) = self.keybinds.action(k) {
            match name.parse::<Action>() {
                Ok(action) => {
                    self.run_action(state, action, now);
                    return true;
                }
                Err(e) => warn!(key = k, "{}", e),
            }
        }
        if k == EMERGENCY_QUIT {
            warn!("emergency quit");
            state.quit_requested = true;
            return true;
        }
        // Never forwarded to a child in this mode
        debug!(key = k, "unbound key");
        false
    }

    fn send_to_focused(&mut self, state: &mut SessionState, bytes: &[u8]) -> Result<(), WindowError> {
        let window = state.focused_window_mut().ok_or(WindowError::WindowUnavailable)?;
        window.send_input(bytes).map_err(|e| {
            warn!(window = %window.id, "input failed: {}", e);
            WindowError::WindowUnavailable
        })
    }

    /// Terminal input could not be delivered: back to window management
    fn downgrade(&mut self, state: &mut SessionState, err: WindowError) {
        warn!("leaving terminal mode: {}", err);
        if let Some(window) = state.focused_window_mut() {
            window.invalidate_cache();
        }
        state.enter_window_management();
        state.needs_redraw = true;
    }

    // -- actions --

    pub fn run_action(&mut self, state: &mut SessionState, action: Action, now: Instant) {
        debug!(%action, "action");
        state.needs_redraw = true;
        match action {
            Action::NewWindow => {
                self.new_window(state);
            }
            Action::CloseWindow => {
                if let Some(id) = state.focused_id() {
                    self.close_window(state, &id, true);
                }
            }
            Action::NextWindow => {
                state.cycle_focus(true);
            }
            Action::PrevWindow => {
                state.cycle_focus(false);
            }
            Action::EnterTerminalMode => {
                if state.focused_index().is_some() {
                    state.enter_terminal_mode(now);
                }
            }
            Action::ToggleTiling => self.set_tiling(state, !state.tiling),
            Action::TileAll => self.set_tiling(state, true),
            Action::SplitHorizontal => self.split(state, true),
            Action::SplitVertical => self.split(state, false),
            Action::RotateSplit => {
                if state.tiling {
                    self.tiling.rotate_focused_split(state);
                }
            }
            Action::EqualizeSplits => {
                if state.tiling {
                    self.tiling.equalize_splits(state);
                }
            }
            Action::MinimizeWindow => {
                if let Some(idx) = state.focused_index() {
                    self.minimize(state, idx, now);
                }
            }
            Action::RestoreAll => {
                for idx in state.minimized_indices() {
                    self.restore(state, idx);
                }
            }
            Action::ToggleMaximize => {
                if let Some(idx) = self.focused_floating(state) {
                    self.geometry.toggle_maximize(state, idx);
                }
            }
            Action::Snap(snap) => {
                if let Some(idx) = self.focused_floating(state) {
                    self.geometry.snap_window(state, idx, snap);
                }
            }
            Action::RenameWindow => {
                if let Some(window) = state.focused_window() {
                    self.rename.start(window.display_title());
                }
            }
            Action::CopyMode => {
                if let Some(window) = state.focused_window_mut() {
                    window.enter_copy_mode();
                }
            }
            Action::ToggleHelp => state.overlays.help = !state.overlays.help,
            Action::ToggleLogViewer => {
                state.overlays.log_viewer = !state.overlays.log_viewer;
                self.log_scroll = 0;
            }
            Action::ToggleCacheStats => state.overlays.cache_stats = !state.overlays.cache_stats,
            Action::Quit => self.quit_dialog.open(),
            Action::Detach => {
                info!("detach requested");
                state.detach_requested = true;
            }
            Action::SwitchWorkspace(n) => self.switch_workspace(state, n),
            Action::MoveToWorkspace(n) => self.move_to_workspace(state, n),
            Action::Preselect(side) => self.tiling.set_preselection(side),
        }
    }

    /// Open a window next to the focused one. None when the terminal
    /// could not be started.
    pub fn new_window(&mut self, state: &mut SessionState) -> Option<WindowId> {
        let id = new_window_id();
        let rect = self.cascade_rect(state);
        let near = state.focused_id();
        match self.factory.create(&id, rect) {
            Ok(window) => {
                state.add_window(window);
                if state.tiling {
                    self.tiling.insert_window(state, &id, near.as_deref());
                }
                info!(window = %id, "window opened");
                Some(id)
            }
            Err(e) => {
                error!("failed to open window: {:#}", e);
                None
            }
        }
    }

    fn cascade_rect(&self, state: &SessionState) -> Rect {
        let area = state.window_area();
        let w = self.settings.default_size.0.min(area.w).max(1);
        let h = self.settings.default_size.1.min(area.h).max(1);
        let step = (state.eligible_indices().len() % 10) as i32;
        let mut x = area.x + step * 2;
        let mut y = area.y + step;
        if x + w > area.right() {
            x = area.x;
        }
        if y + h > area.bottom() {
            y = area.y;
        }
        Rect::new(x, y, w, h)
    }

    /// Remove a window and end its session. `kill` also ends a daemon
    /// session; otherwise the daemon keeps it.
    pub fn close_window(&mut self, state: &mut SessionState, id: &str, kill: bool) -> bool {
        let Some(mut window) = state.remove_window(id) else {
            return false;
        };
        self.tiling.remove_window(state, id);
        if self.selecting.as_deref() == Some(id) {
            self.selecting = None;
        }
        if kill {
            match window.kill() {
                Ok(()) | Err(WindowError::ProcessGone) => {}
                Err(e) => warn!(window = id, "kill failed: {}", e),
            }
        }
        window.close();
        if state.mode == Mode::Terminal && state.focused_index().is_none() {
            state.enter_window_management();
        }
        state.needs_redraw = true;
        info!(window = id, "window closed");
        true
    }

    fn focused_floating(&self, state: &SessionState) -> Option<usize> {
        let idx = state.focused_index()?;
        let tiled = state.tiling && self.tiling.contains(state.workspace, &state.windows[idx].id);
        (!tiled).then_some(idx)
    }

    fn set_tiling(&mut self, state: &mut SessionState, on: bool) {
        state.tiling = on;
        if on {
            self.tiling.tile_all_windows(state);
        }
        info!(tiling = on, "tiling mode");
    }

    fn split(&mut self, state: &mut SessionState, horizontal: bool) {
        if !state.tiling {
            self.set_tiling(state, true);
        }
        if horizontal {
            self.tiling.split_focused_horizontal(state);
        } else {
            self.tiling.split_focused_vertical(state);
        }
        self.new_window(state);
    }

    fn minimize(&mut self, state: &mut SessionState, idx: usize, now: Instant) {
        let id = state.windows[idx].id.clone();
        if !state.minimize(idx, now) {
            return;
        }
        self.tiling.remove_window(state, &id);
        if state.mode == Mode::Terminal && state.focused_index().is_none() {
            state.enter_window_management();
        }
    }

    fn restore(&mut self, state: &mut SessionState, idx: usize) {
        if !state.restore(idx) {
            return;
        }
        let id = state.windows[idx].id.clone();
        if state.tiling {
            self.tiling.insert_window(state, &id, None);
        }
        state.needs_redraw = true;
    }

    fn switch_workspace(&mut self, state: &mut SessionState, n: u8) {
        if !state.switch_workspace(n) {
            return;
        }
        if state.tiling {
            self.tiling.apply(state);
        }
        if state.mode == Mode::Terminal && state.focused_index().is_none() {
            state.enter_window_management();
        }
    }

    fn move_to_workspace(&mut self, state: &mut SessionState, n: u8) {
        let Some(id) = state.focused_id() else {
            return;
        };
        if !state.move_focused_to_workspace(n) {
            return;
        }
        self.tiling.remove_window(state, &id);
        if state.tiling {
            self.tiling.insert_window(state, &id, None);
        }
        if state.mode == Mode::Terminal && state.focused_index().is_none() {
            state.enter_window_management();
        }
    }

    fn copy_to_clipboard(&mut self, text: &str) {
        match self.clipboard.set_text(text) {
            Ok(()) => debug!(chars = text.chars().count(), "copied to clipboard"),
            Err(e) => warn!("{}", e),
        }
    }

    // -- mouse --

    pub fn handle_mouse(&mut self, state: &mut SessionState, event: MouseEvent, now: Instant) -> bool {
        let (x, y) = (event.column as i32, event.row as i32);

        if state.interaction.is_active() {
            match event.kind {
                MouseEventKind::Drag(_) | MouseEventKind::Moved => {
                    if matches!(state.interaction, Interaction::Dragging(_)) {
                        self.geometry.drag_to(state, x, y);
                    } else {
                        self.geometry.resize_to(state, self.tiling.as_mut(), x, y);
                    }
                    state.needs_redraw = true;
                    return true;
                }
                MouseEventKind::Up(_) => {
                    self.geometry.release(state, self.tiling.as_mut(), x, y, now);
                    state.needs_redraw = true;
                    return true;
                }
                _ => {}
            }
        }

        self.dock_mouse(state, &event, x, y)
            || self.button_mouse(state, &event, x, y, now)
            || self.selection_mouse(state, &event, x, y)
            || self.forward_mouse(state, &event, x, y)
            || self.focus_mouse(state, &event, x, y, now)
    }

    fn dock_mouse(&mut self, state: &mut SessionState, event: &MouseEvent, x: i32, y: i32) -> bool {
        let Some(dock) = state.dock_rect() else {
            return false;
        };
        if !dock.contains(x, y) {
            return false;
        }
        if event.kind == MouseEventKind::Down(MouseButton::Left) {
            let item = state.dock_items().into_iter().find(|(_, r)| r.contains(x, y));
            if let Some((idx, _)) = item {
                self.restore(state, idx);
            }
        }
        true
    }

    fn button_mouse(&mut self, state: &mut SessionState, event: &MouseEvent, x: i32, y: i32, now: Instant) -> bool {
        if event.kind != MouseEventKind::Down(MouseButton::Left) {
            return false;
        }
        let Some(idx) = state.window_at(x, y) else {
            return false;
        };
        let window = &state.windows[idx];
        let tiled = state.tiling && self.tiling.contains(state.workspace, &window.id);
        let Some(button) = geometry::button_at(window.rect, tiled, x, y) else {
            return false;
        };
        let id = window.id.clone();
        debug!(window = %id, ?button, "title button");
        match button {
            Button::Close => {
                self.close_window(state, &id, true);
            }
            Button::Minimize => self.minimize(state, idx, now),
            Button::Maximize => {
                self.geometry.toggle_maximize(state, idx);
            }
        }
        state.needs_redraw = true;
        true
    }

    fn selection_mouse(&mut self, state: &mut SessionState, event: &MouseEvent, x: i32, y: i32) -> bool {
        let Some(id) = self.selecting.clone() else {
            return false;
        };
        let Some(idx) = state.index_of(&id) else {
            self.selecting = None;
            return false;
        };
        match event.kind {
            MouseEventKind::Drag(MouseButton::Left) => {
                let cell = clamp_cell(state.windows[idx].rect, x, y);
                self.geometry.extend_selection(state, idx, cell);
                state.needs_redraw = true;
                true
            }
            MouseEventKind::Up(MouseButton::Left) => {
                self.selecting = None;
                if let Some(text) = self.geometry.finish_selection(state, idx) {
                    self.copy_to_clipboard(&text);
                }
                state.needs_redraw = true;
                true
            }
            _ => false,
        }
    }

    /// Hand the event to a focused child that asked for mouse reports
    fn forward_mouse(&mut self, state: &mut SessionState, event: &MouseEvent, x: i32, y: i32) -> bool {
        if state.mode != Mode::Terminal {
            return false;
        }
        let Some(idx) = state.focused_index() else {
            return false;
        };
        if state.windows[idx].in_copy_mode() || !state.windows[idx].tracks_mouse() {
            return false;
        }
        let motion = matches!(event.kind, MouseEventKind::Drag(_) | MouseEventKind::Moved);
        // Motion is swallowed anywhere once the child tracks the mouse
        if state.window_at(x, y) != Some(idx) {
            return motion;
        }
        let window = &mut state.windows[idx];
        let Some((col, row)) = geometry::cell_at(window.rect, x, y) else {
            return motion;
        };
        let (supports_motion, sgr) = window
            .with_emulator(|e| (e.supports_motion_events(), e.sgr_mouse()))
            .unwrap_or((false, false));
        if motion && !supports_motion {
            return true;
        }
        let relative = MouseEvent {
            kind: event.kind,
            column: col,
            row,
            modifiers: event.modifiers,
        };
        let bytes = KeyMapper::encode_mouse_event(&relative, sgr);
        if !bytes.is_empty() {
            if let Err(e) = window.send_input(&bytes) {
                debug!(window = %window.id, "mouse report dropped: {}", e);
            }
        }
        true
    }

    fn focus_mouse(&mut self, state: &mut SessionState, event: &MouseEvent, x: i32, y: i32, now: Instant) -> bool {
        match event.kind {
            MouseEventKind::Down(button) => {
                let Some(idx) = state.window_at(x, y) else {
                    return false;
                };
                state.focus_index(idx);
                let rect = state.windows[idx].rect;
                match button {
                    MouseButton::Left => match geometry::cell_at(rect, x, y) {
                        Some(cell) => {
                            self.geometry.click(state, idx, cell, now);
                            self.selecting = Some(state.windows[idx].id.clone());
                        }
                        None => {
                            self.geometry.begin_drag(state, self.tiling.as_ref(), idx, x, y);
                        }
                    },
                    MouseButton::Right => {
                        self.geometry.begin_resize(state, self.tiling.as_ref(), idx, x, y);
                    }
                    MouseButton::Middle => {}
                }
                state.needs_redraw = true;
                true
            }
            MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
                let Some(idx) = state.window_at(x, y) else {
                    return false;
                };
                let delta = if event.kind == MouseEventKind::ScrollUp {
                    WHEEL_LINES
                } else {
                    -WHEEL_LINES
                };
                state.windows[idx].scroll_history(delta);
                state.needs_redraw = true;
                true
            }
            _ => false,
        }
    }
}

/// Printable keys without ctrl or alt; shift counts as unmodified
fn is_guarded(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char(_)) && !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
}

/// Workspace number for a shifted digit on a US layout
fn shifted_digit(c: char) -> Option<u8> {
    "!@#$%^&*(".find(c).map(|i| i as u8 + 1)
}

/// Cell under (x, y), clamped into the window interior
fn clamp_cell(rect: Rect, x: i32, y: i32) -> (u16, u16) {
    let (cols, rows) = rect.interior();
    let col = (x - rect.x - 1).clamp(0, cols as i32 - 1);
    let row = (y - rect.y - 1).clamp(0, rows as i32 - 1);
    (col as u16, row as u16)
}

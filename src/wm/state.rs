//! SessionState - windows, focus, workspaces and modal flags
//!
//! Owned by the dispatch thread and handed by reference to every input
//! handler. Work that must happen later (a delayed redraw, clearing the
//! interaction flag) goes through [`SessionState::defer`] and runs from
//! [`SessionState::run_deferred`] on the same thread, re-checking state first.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use super::window::{Rect, TerminalWindow, WindowId};
use crate::config::DockPosition;

/// Highest workspace number
pub const WORKSPACES: u8 = 9;
/// How long the minimize animation flag stays set
pub const MINIMIZE_ANIMATION: Duration = Duration::from_millis(200);
/// Widest dock entry, in cells
const DOCK_ITEM_MAX: i32 = 20;

/// Session-wide input mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Keys drive the window manager
    WindowManagement,
    /// Keys go to the focused window's child
    Terminal,
}

/// Second-level keymaps reached through the leader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildPrefix {
    Workspace,
    Minimize,
    Tiling,
    Debug,
    Tape,
}

/// Leader key state. At most one child keymap can be armed at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefixState {
    #[default]
    Idle,
    LeaderArmed { since: Instant },
    InChild { kind: ChildPrefix, since: Instant },
}

impl PrefixState {
    /// True while the leader is engaged, including inside a child keymap
    pub fn is_active(&self) -> bool {
        !matches!(self, PrefixState::Idle)
    }

    pub fn child(&self) -> Option<ChildPrefix> {
        match self {
            PrefixState::InChild { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn since(&self) -> Option<Instant> {
        match self {
            PrefixState::Idle => None,
            PrefixState::LeaderArmed { since } | PrefixState::InChild { since, .. } => Some(*since),
        }
    }
}

/// Window corner anchored opposite the one being dragged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Window move in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragState {
    pub window: WindowId,
    /// Press position minus window origin
    pub offset: (i32, i32),
    pub start: (i32, i32),
    /// Geometry at press time, used to snap back tiled windows
    pub origin: Rect,
    pub tiled: bool,
}

/// Window resize in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeState {
    pub window: WindowId,
    pub start: (i32, i32),
    pub snapshot: Rect,
    pub corner: Corner,
    pub tiled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Interaction {
    #[default]
    Idle,
    Dragging(DragState),
    Resizing(ResizeState),
}

impl Interaction {
    pub fn is_active(&self) -> bool {
        !matches!(self, Interaction::Idle)
    }

    pub fn window(&self) -> Option<&str> {
        match self {
            Interaction::Idle => None,
            Interaction::Dragging(d) => Some(&d.window),
            Interaction::Resizing(r) => Some(&r.window),
        }
    }
}

/// Full-screen overlays toggled from the keymaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlayFlags {
    pub help: bool,
    pub log_viewer: bool,
    pub cache_stats: bool,
}

/// Work scheduled for a later tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredWork {
    /// Repaint windows whose size was just committed
    ForceRedraw(Vec<WindowId>),
    /// End interaction mode unless a newer interaction started
    ClearInteraction { generation: u64 },
    FinishMinimize(WindowId),
}

#[derive(Debug)]
struct Deferred {
    due: Instant,
    work: DeferredWork,
}

pub struct SessionState {
    /// Insertion order is cycle order, not paint order
    pub windows: Vec<TerminalWindow>,
    focused: Option<usize>,
    pub workspace: u8,
    /// Last focused window per workspace
    workspace_focus: HashMap<u8, WindowId>,
    pub mode: Mode,
    pub terminal_mode_entered_at: Option<Instant>,
    pub prefix: PrefixState,
    pub overlays: OverlayFlags,
    pub interaction: Interaction,
    /// Set from the first drag/resize motion until shortly after release
    pub interaction_mode: bool,
    interaction_generation: u64,
    /// Committed sizes waiting for the interaction to end
    pub pending_resizes: HashMap<WindowId, (i32, i32)>,
    pub tiling: bool,
    pub dock_position: DockPosition,
    pub width: u16,
    pub height: u16,
    /// Everything must be repainted on the next frame
    pub needs_redraw: bool,
    pub quit_requested: bool,
    pub detach_requested: bool,
    deferred: Vec<Deferred>,
}

impl SessionState {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            windows: Vec::new(),
            focused: None,
            workspace: 1,
            workspace_focus: HashMap::new(),
            mode: Mode::WindowManagement,
            terminal_mode_entered_at: None,
            prefix: PrefixState::Idle,
            overlays: OverlayFlags::default(),
            interaction: Interaction::Idle,
            interaction_mode: false,
            interaction_generation: 0,
            pending_resizes: HashMap::new(),
            tiling: false,
            dock_position: DockPosition::Bottom,
            width,
            height,
            needs_redraw: true,
            quit_requested: false,
            detach_requested: false,
            deferred: Vec::new(),
        }
    }

    // -- windows and focus --

    /// Add a window to the current workspace, on top, focused. Returns its index.
    pub fn add_window(&mut self, mut window: TerminalWindow) -> usize {
        window.z = self.max_z() + 1;
        window.workspace = self.workspace;
        debug!(window = %window.id, z = window.z, "window added");
        self.windows.push(window);
        let idx = self.windows.len() - 1;
        self.focus_index(idx);
        idx
    }

    /// Remove a window, handing focus to another eligible window first.
    pub fn remove_window(&mut self, id: &str) -> Option<TerminalWindow> {
        let idx = self.index_of(id)?;
        if self.focused == Some(idx) {
            let next = self.topmost_eligible(Some(idx));
            self.focused = None;
            if let Some(next) = next {
                self.focus_index(next);
            }
        }

        let window = self.windows.remove(idx);
        self.focused = match self.focused {
            Some(f) if f > idx => Some(f - 1),
            other => other,
        };
        self.pending_resizes.remove(id);
        self.workspace_focus.retain(|_, w| w != id);
        if self.interaction.window() == Some(id) {
            self.interaction = Interaction::Idle;
        }
        self.needs_redraw = true;
        Some(window)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.windows.iter().position(|w| w.id == id)
    }

    pub fn window(&self, id: &str) -> Option<&TerminalWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_mut(&mut self, id: &str) -> Option<&mut TerminalWindow> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    pub fn focused_index(&self) -> Option<usize> {
        self.focused.filter(|&i| i < self.windows.len())
    }

    pub fn focused_window(&self) -> Option<&TerminalWindow> {
        self.focused_index().map(|i| &self.windows[i])
    }

    pub fn focused_window_mut(&mut self) -> Option<&mut TerminalWindow> {
        match self.focused_index() {
            Some(i) => Some(&mut self.windows[i]),
            None => None,
        }
    }

    pub fn focused_id(&self) -> Option<WindowId> {
        self.focused_window().map(|w| w.id.clone())
    }

    /// Visible in the current workspace and not minimized
    pub fn is_eligible(&self, idx: usize) -> bool {
        self.windows
            .get(idx)
            .map_or(false, |w| w.workspace == self.workspace && !w.minimized)
    }

    pub fn eligible_indices(&self) -> Vec<usize> {
        (0..self.windows.len()).filter(|&i| self.is_eligible(i)).collect()
    }

    fn topmost_eligible(&self, except: Option<usize>) -> Option<usize> {
        self.eligible_indices()
            .into_iter()
            .filter(|&i| Some(i) != except)
            .max_by_key(|&i| self.windows[i].z)
    }

    fn max_z(&self) -> i32 {
        self.windows.iter().map(|w| w.z).max().unwrap_or(0)
    }

    /// Focus and raise a window. Ineligible windows are ignored.
    pub fn focus_index(&mut self, idx: usize) -> bool {
        if !self.is_eligible(idx) {
            return false;
        }
        if self.focused != Some(idx) {
            if let Some(prev) = self.focused_index() {
                self.windows[prev].mark_moved();
            }
            self.focused = Some(idx);
        }
        self.raise(idx);
        let id = self.windows[idx].id.clone();
        self.workspace_focus.insert(self.workspace, id);
        true
    }

    pub fn focus_id(&mut self, id: &str) -> bool {
        match self.index_of(id) {
            Some(idx) => self.focus_index(idx),
            None => false,
        }
    }

    /// Put a window above every other
    pub fn raise(&mut self, idx: usize) {
        let top = self.max_z();
        let tied = self.windows.iter().filter(|o| o.z == top).count() > 1;
        if let Some(w) = self.windows.get_mut(idx) {
            if w.z < top || tied {
                w.z = top + 1;
                w.mark_moved();
            }
        }
    }

    /// Move focus through eligible windows in insertion order.
    pub fn cycle_focus(&mut self, forward: bool) -> bool {
        let eligible = self.eligible_indices();
        if eligible.is_empty() {
            return false;
        }
        let pos = self.focused_index().and_then(|f| eligible.iter().position(|&i| i == f));
        let next = match pos {
            None => eligible[0],
            Some(p) if forward => eligible[(p + 1) % eligible.len()],
            Some(p) => eligible[(p + eligible.len() - 1) % eligible.len()],
        };
        self.focus_index(next)
    }

    /// Topmost eligible window under a point
    pub fn window_at(&self, x: i32, y: i32) -> Option<usize> {
        self.eligible_indices()
            .into_iter()
            .filter(|&i| self.windows[i].rect.contains(x, y))
            .max_by_key(|&i| self.windows[i].z)
    }

    // -- workspaces --

    pub fn switch_workspace(&mut self, workspace: u8) -> bool {
        if workspace == self.workspace || !(1..=WORKSPACES).contains(&workspace) {
            return false;
        }
        self.interaction = Interaction::Idle;
        self.workspace = workspace;

        let remembered = self
            .workspace_focus
            .get(&workspace)
            .and_then(|id| self.index_of(id))
            .filter(|&i| self.is_eligible(i));
        self.focused = None;
        if let Some(idx) = remembered.or_else(|| self.topmost_eligible(None)) {
            self.focus_index(idx);
        }
        self.needs_redraw = true;
        debug!(workspace, "switched workspace");
        true
    }

    /// Send the focused window to another workspace
    pub fn move_focused_to_workspace(&mut self, workspace: u8) -> bool {
        if workspace == self.workspace || !(1..=WORKSPACES).contains(&workspace) {
            return false;
        }
        let Some(idx) = self.focused_index() else {
            return false;
        };
        let next = self.topmost_eligible(Some(idx));
        self.windows[idx].workspace = workspace;
        self.windows[idx].mark_moved();
        let id = self.windows[idx].id.clone();
        self.workspace_focus.insert(workspace, id);
        self.focused = None;
        if let Some(next) = next {
            self.focus_index(next);
        }
        self.needs_redraw = true;
        true
    }

    /// Windows of each workspace, for status display
    pub fn workspace_counts(&self) -> [usize; WORKSPACES as usize] {
        let mut counts = [0; WORKSPACES as usize];
        for w in &self.windows {
            if (1..=WORKSPACES).contains(&w.workspace) {
                counts[(w.workspace - 1) as usize] += 1;
            }
        }
        counts
    }

    // -- minimize and dock --

    pub fn minimize(&mut self, idx: usize, now: Instant) -> bool {
        if !self.is_eligible(idx) {
            return false;
        }
        let next = self.topmost_eligible(Some(idx));
        let window = &mut self.windows[idx];
        window.minimized = true;
        window.minimizing = true;
        window.selection = None;
        let id = window.id.clone();
        self.defer(now, MINIMIZE_ANIMATION, DeferredWork::FinishMinimize(id));
        if self.focused == Some(idx) {
            self.focused = None;
            if let Some(next) = next {
                self.focus_index(next);
            }
        }
        self.needs_redraw = true;
        true
    }

    pub fn restore(&mut self, idx: usize) -> bool {
        let Some(window) = self.windows.get_mut(idx) else {
            return false;
        };
        if !window.minimized || window.workspace != self.workspace {
            return false;
        }
        window.minimized = false;
        window.minimizing = false;
        window.invalidate_cache();
        self.needs_redraw = true;
        self.focus_index(idx)
    }

    /// Restore every minimized window of the current workspace
    pub fn restore_all(&mut self) -> usize {
        let restored: Vec<usize> = self.minimized_indices();
        for &idx in &restored {
            self.restore(idx);
        }
        restored.len()
    }

    /// Minimized windows of the current workspace, in dock order
    pub fn minimized_indices(&self) -> Vec<usize> {
        (0..self.windows.len())
            .filter(|&i| self.windows[i].minimized && self.windows[i].workspace == self.workspace)
            .collect()
    }

    /// Row reserved for the dock, if it is shown
    pub fn dock_rect(&self) -> Option<Rect> {
        if self.minimized_indices().is_empty() {
            return None;
        }
        let w = self.width as i32;
        match self.dock_position {
            DockPosition::Top => Some(Rect::new(0, 0, w, 1)),
            DockPosition::Bottom => Some(Rect::new(0, self.height as i32 - 1, w, 1)),
            DockPosition::Hidden => None,
        }
    }

    /// Dock entries as (window index, hit rect)
    pub fn dock_items(&self) -> Vec<(usize, Rect)> {
        let Some(dock) = self.dock_rect() else {
            return Vec::new();
        };
        let mut x = 0;
        let mut items = Vec::new();
        for idx in self.minimized_indices() {
            let label = self.windows[idx].display_title().chars().count() as i32 + 2;
            let width = label.min(DOCK_ITEM_MAX);
            if x + width > dock.w {
                break;
            }
            items.push((idx, Rect::new(x, dock.y, width, 1)));
            x += width + 1;
        }
        items
    }

    /// Screen area available to windows
    pub fn window_area(&self) -> Rect {
        let full = Rect::new(0, 0, self.width as i32, self.height as i32);
        match self.dock_rect() {
            Some(dock) if dock.y == 0 => Rect::new(0, 1, full.w, full.h - 1),
            Some(_) => Rect::new(0, 0, full.w, full.h - 1),
            None => full,
        }
    }

    pub fn resize_screen(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.needs_redraw = true;
    }

    // -- modes and prefix --

    pub fn enter_terminal_mode(&mut self, now: Instant) {
        if self.mode != Mode::Terminal {
            self.mode = Mode::Terminal;
            self.terminal_mode_entered_at = Some(now);
            debug!("terminal mode");
        }
    }

    pub fn enter_window_management(&mut self) {
        if self.mode != Mode::WindowManagement {
            self.mode = Mode::WindowManagement;
            debug!("window management mode");
        }
    }

    /// Inside the short window after entering terminal mode
    pub fn in_mode_switch_guard(&self, now: Instant, guard: Duration) -> bool {
        self.mode == Mode::Terminal
            && self
                .terminal_mode_entered_at
                .map_or(false, |at| now.saturating_duration_since(at) < guard)
    }

    pub fn arm_leader(&mut self, now: Instant) {
        self.prefix = PrefixState::LeaderArmed { since: now };
    }

    /// Switch to a child keymap, keeping the leader engaged
    pub fn open_child_prefix(&mut self, kind: ChildPrefix, now: Instant) {
        self.prefix = PrefixState::InChild { kind, since: now };
    }

    pub fn clear_prefix(&mut self) {
        self.prefix = PrefixState::Idle;
    }

    /// Drop a prefix that has waited longer than `timeout`
    pub fn expire_prefix(&mut self, now: Instant, timeout: Duration) -> bool {
        match self.prefix.since() {
            Some(since) if now.saturating_duration_since(since) >= timeout => {
                debug!("prefix timed out");
                self.prefix = PrefixState::Idle;
                true
            }
            _ => false,
        }
    }

    // -- interaction --

    /// Start a drag or resize and enter interaction mode
    pub fn begin_interaction(&mut self, interaction: Interaction) -> u64 {
        if let Some(idx) = interaction.window().and_then(|id| self.index_of(id)) {
            self.windows[idx].manipulating = true;
        }
        self.interaction = interaction;
        self.interaction_mode = true;
        self.interaction_generation += 1;
        self.interaction_generation
    }

    pub fn interaction_generation(&self) -> u64 {
        self.interaction_generation
    }

    // -- deferred work --

    pub fn defer(&mut self, now: Instant, delay: Duration, work: DeferredWork) {
        self.deferred.push(Deferred {
            due: now + delay,
            work,
        });
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Run work that has come due. Returns how many items ran.
    pub fn run_deferred(&mut self, now: Instant) -> usize {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|d| d.due <= now);
        self.deferred = later;

        for item in &due {
            match item.work {
                DeferredWork::ForceRedraw(ref ids) => {
                    for id in ids {
                        if let Some(w) = self.window_mut(id) {
                            w.force_redraw();
                        }
                    }
                    self.needs_redraw = true;
                }
                DeferredWork::ClearInteraction { generation } => {
                    // A newer drag or resize owns the flag now
                    if generation == self.interaction_generation && !self.interaction.is_active() {
                        self.interaction_mode = false;
                        for w in &mut self.windows {
                            w.manipulating = false;
                        }
                    }
                }
                DeferredWork::FinishMinimize(ref id) => {
                    if let Some(w) = self.window_mut(id) {
                        if w.minimized {
                            w.minimizing = false;
                        }
                    }
                }
            }
        }
        due.len()
    }
}

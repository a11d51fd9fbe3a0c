//! Geometry - mouse-driven move, resize, snapping and click counting

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::layout::TilingEngine;
use super::state::{Corner, DeferredWork, DragState, Interaction, ResizeState, SessionState};
use super::window::{Rect, Selection, SelectionKind, WindowId};
use crate::config::Config;
use crate::copymode;

/// Delay between committing sizes and forcing a repaint
pub const REDRAW_DELAY: Duration = Duration::from_millis(50);
/// Delay before interaction mode ends after a release
pub const INTERACTION_CLEAR_DELAY: Duration = Duration::from_millis(150);

/// Limits used by the geometry engine
#[derive(Debug, Clone, Copy)]
pub struct GeometrySettings {
    pub min_width: i32,
    pub min_height: i32,
    /// Cells of a dragged window that stay on screen
    pub min_visible_margin: i32,
    pub snap_margin: i32,
    /// Manhattan distance a tiled window must travel to swap
    pub swap_threshold: i32,
    pub double_click: Duration,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            min_width: 20,
            min_height: 5,
            min_visible_margin: 5,
            snap_margin: 2,
            swap_threshold: 5,
            double_click: Duration::from_millis(500),
        }
    }
}

impl GeometrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_width: config.window.min_width,
            min_height: config.window.min_height,
            min_visible_margin: config.window.min_visible_margin,
            snap_margin: config.mouse.snap_margin,
            swap_threshold: config.mouse.swap_threshold,
            double_click: config.double_click(),
        }
    }
}

/// Predefined screen regions for floating windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Snap {
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Fullscreen,
}

impl Snap {
    pub fn rect(self, area: Rect) -> Rect {
        let half_w = area.w / 2;
        let half_h = area.h / 2;
        let (x, y, w, h) = match self {
            Snap::Left => (area.x, area.y, half_w, area.h),
            Snap::Right => (area.x + half_w, area.y, area.w - half_w, area.h),
            Snap::TopLeft => (area.x, area.y, half_w, half_h),
            Snap::TopRight => (area.x + half_w, area.y, area.w - half_w, half_h),
            Snap::BottomLeft => (area.x, area.y + half_h, half_w, area.h - half_h),
            Snap::BottomRight => (area.x + half_w, area.y + half_h, area.w - half_w, area.h - half_h),
            Snap::Fullscreen => return area,
        };
        Rect::new(x, y, w, h)
    }
}

/// Snap region for a release at (x, y), if the pointer is near an edge
pub fn snap_zone(x: i32, y: i32, area: Rect, margin: i32) -> Option<Snap> {
    let near_left = x < area.x + margin;
    let near_right = x >= area.right() - margin;
    let near_top = y < area.y + margin;
    let near_bottom = y >= area.bottom() - margin;
    match (near_left, near_right, near_top, near_bottom) {
        (true, _, true, _) => Some(Snap::TopLeft),
        (true, _, _, true) => Some(Snap::BottomLeft),
        (true, _, _, _) => Some(Snap::Left),
        (_, true, true, _) => Some(Snap::TopRight),
        (_, true, _, true) => Some(Snap::BottomRight),
        (_, true, _, _) => Some(Snap::Right),
        (_, _, true, _) => Some(Snap::Fullscreen),
        _ => None,
    }
}

/// Clamp a window origin so a sliver of the window stays inside `area`.
/// The title row never leaves the top of the area.
pub fn clamp_origin(x: i32, y: i32, w: i32, h: i32, area: Rect, margin: i32) -> (i32, i32) {
    let mx = margin.min(w).max(1);
    let my = margin.min(h).max(1);
    let min_x = area.x - w + mx;
    let max_x = (area.right() - mx).max(min_x);
    let min_y = area.y;
    let max_y = (area.bottom() - my).max(min_y);
    (x.clamp(min_x, max_x), y.clamp(min_y, max_y))
}

/// Corner nearest to a press at (x, y)
pub fn nearest_corner(rect: Rect, x: i32, y: i32) -> Corner {
    let left = x < rect.x + rect.w / 2;
    let top = y < rect.y + rect.h / 2;
    match (left, top) {
        (true, true) => Corner::TopLeft,
        (false, true) => Corner::TopRight,
        (true, false) => Corner::BottomLeft,
        (false, false) => Corner::BottomRight,
    }
}

/// New rectangle for a resize from `snapshot` by (dx, dy) at `corner`.
/// The size never drops below `min`; the result is then kept inside
/// `area`. With `frozen`, edges lying on the area border do not move.
pub fn resize_rect(
    snapshot: Rect,
    corner: Corner,
    dx: i32,
    dy: i32,
    min: (i32, i32),
    area: Rect,
    frozen: bool,
) -> Rect {
    let moves_left = matches!(corner, Corner::TopLeft | Corner::BottomLeft);
    let moves_top = matches!(corner, Corner::TopLeft | Corner::TopRight);
    let (mut left, mut right) = resize_span(
        (snapshot.x, snapshot.right()),
        dx,
        moves_left,
        min.0,
        (area.x, area.right()),
    );
    let (mut top, mut bottom) = resize_span(
        (snapshot.y, snapshot.bottom()),
        dy,
        moves_top,
        min.1,
        (area.y, area.bottom()),
    );

    if frozen {
        if snapshot.x == area.x {
            left = snapshot.x;
        }
        if snapshot.right() == area.right() {
            right = snapshot.right();
        }
        if snapshot.y == area.y {
            top = snapshot.y;
        }
        if snapshot.bottom() == area.bottom() {
            bottom = snapshot.bottom();
        }
    }
    Rect::new(left, top, right - left, bottom - top)
}

/// One axis of a resize: move one edge by `delta`, apply the floor on the
/// moving edge, then clamp both edges into `bounds`. A bound hit by the
/// moving edge costs size; a bound hit by the anchored edge shifts the span.
fn resize_span(span: (i32, i32), delta: i32, moves_lo: bool, min: i32, bounds: (i32, i32)) -> (i32, i32) {
    let (mut lo, mut hi) = span;
    if moves_lo {
        lo = (lo + delta).min(hi - min);
    } else {
        hi = (hi + delta).max(lo + min);
    }

    let (area_lo, area_hi) = bounds;
    let min = min.min(area_hi - area_lo);
    if lo < area_lo {
        if moves_lo {
            lo = area_lo;
        } else {
            hi += area_lo - lo;
            lo = area_lo;
        }
    }
    if hi > area_hi {
        if moves_lo {
            lo -= hi - area_hi;
            hi = area_hi;
        } else {
            hi = area_hi;
        }
    }
    // Shrinking against a bound must not break the floor
    if hi - lo < min {
        if moves_lo {
            hi = (lo + min).min(area_hi);
            lo = hi - min;
        } else {
            lo = (hi - min).max(area_lo);
            hi = lo + min;
        }
    }
    (lo.max(area_lo), hi.min(area_hi))
}

/// Terminal-relative cell under a screen position, inside the border
pub fn cell_at(rect: Rect, x: i32, y: i32) -> Option<(u16, u16)> {
    let col = x - rect.x - 1;
    let row = y - rect.y - 1;
    let (cols, rows) = rect.interior();
    if col < 0 || row < 0 || col >= cols as i32 || row >= rows as i32 {
        return None;
    }
    Some((col as u16, row as u16))
}

/// Title bar buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Minimize,
    Maximize,
    Close,
}

/// Button under (x, y). Floating windows show `[_][□][×]`, tiled ones
/// have no maximize button.
pub fn button_at(rect: Rect, tiled: bool, x: i32, y: i32) -> Option<Button> {
    if y != rect.y || !rect.contains(x, y) {
        return None;
    }
    let from_right = rect.right() - x;
    match (from_right, tiled) {
        (2 | 3, _) => Some(Button::Close),
        (4 | 5, false) => Some(Button::Maximize),
        (4 | 5, true) => Some(Button::Minimize),
        (6 | 7, false) => Some(Button::Minimize),
        _ => None,
    }
}

/// Consecutive clicks at one cell within a time window
#[derive(Debug, Clone)]
pub struct ClickTracker {
    window: Duration,
    last: Option<(WindowId, (u16, u16), Instant)>,
    count: u8,
}

impl ClickTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: None,
            count: 0,
        }
    }

    /// Record a click and return its count: 1 char, 2 word, 3 line.
    /// A triple click resets the count.
    pub fn register(&mut self, window: &str, cell: (u16, u16), now: Instant) -> u8 {
        let repeat = match self.last {
            Some((ref id, last_cell, at)) => {
                id == window && last_cell == cell && now.saturating_duration_since(at) < self.window
            }
            None => false,
        };
        self.count = if repeat { self.count + 1 } else { 1 };
        self.last = Some((window.to_string(), cell, now));
        let count = self.count;
        if count >= 3 {
            self.count = 0;
            return 3;
        }
        count
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

/// Result of releasing the mouse after a drag or resize
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Nothing,
    Moved,
    Snapped(Snap),
    Swapped(WindowId),
    SnappedBack,
    Resized(Vec<WindowId>),
}

pub struct GeometryEngine {
    settings: GeometrySettings,
    clicks: ClickTracker,
}

impl GeometryEngine {
    pub fn new(settings: GeometrySettings) -> Self {
        Self {
            clicks: ClickTracker::new(settings.double_click),
            settings,
        }
    }

    pub fn settings(&self) -> &GeometrySettings {
        &self.settings
    }

    fn min_size(&self) -> (i32, i32) {
        (self.settings.min_width, self.settings.min_height)
    }

    fn is_tiled(state: &SessionState, tiling: &dyn TilingEngine, id: &str) -> bool {
        state.tiling && tiling.contains(state.workspace, id)
    }

    // -- drag --

    pub fn begin_drag(&mut self, state: &mut SessionState, tiling: &dyn TilingEngine, idx: usize, x: i32, y: i32) -> bool {
        if state.interaction.is_active() || !state.is_eligible(idx) {
            return false;
        }
        let window = &state.windows[idx];
        let drag = DragState {
            window: window.id.clone(),
            offset: (x - window.rect.x, y - window.rect.y),
            start: (x, y),
            origin: window.rect,
            tiled: Self::is_tiled(state, tiling, &window.id),
        };
        debug!(window = %drag.window, tiled = drag.tiled, "drag started");
        state.begin_interaction(Interaction::Dragging(drag));
        true
    }

    /// Follow the pointer with the dragged window
    pub fn drag_to(&mut self, state: &mut SessionState, x: i32, y: i32) -> bool {
        let Interaction::Dragging(ref drag) = state.interaction else {
            return false;
        };
        let (id, offset) = (drag.window.clone(), drag.offset);
        let area = state.window_area();
        let margin = self.settings.min_visible_margin;
        let Some(window) = state.window_mut(&id) else {
            return false;
        };
        let rect = window.rect;
        let (nx, ny) = clamp_origin(x - offset.0, y - offset.1, rect.w, rect.h, area, margin);
        window.move_to(nx, ny);
        true
    }

    // -- resize --

    pub fn begin_resize(&mut self, state: &mut SessionState, tiling: &dyn TilingEngine, idx: usize, x: i32, y: i32) -> bool {
        if state.interaction.is_active() || !state.is_eligible(idx) {
            return false;
        }
        let window = &state.windows[idx];
        let resize = ResizeState {
            window: window.id.clone(),
            start: (x, y),
            snapshot: window.rect,
            corner: nearest_corner(window.rect, x, y),
            tiled: Self::is_tiled(state, tiling, &window.id),
        };
        debug!(window = %resize.window, corner = ?resize.corner, "resize started");
        state.begin_interaction(Interaction::Resizing(resize));
        true
    }

    /// Resize toward the pointer. Floating windows queue the real resize;
    /// tiled windows drag their neighbours' edges along.
    pub fn resize_to(&mut self, state: &mut SessionState, tiling: &mut dyn TilingEngine, x: i32, y: i32) -> bool {
        let Interaction::Resizing(ref resize) = state.interaction else {
            return false;
        };
        let resize = resize.clone();
        let area = state.window_area();
        let rect = resize_rect(
            resize.snapshot,
            resize.corner,
            x - resize.start.0,
            y - resize.start.1,
            self.min_size(),
            area,
            resize.tiled,
        );

        if resize.tiled {
            return !tiling
                .adjust_tiling_neighbors_visual(state, &resize.window, rect)
                .is_empty();
        }
        let Some(window) = state.window_mut(&resize.window) else {
            return false;
        };
        window.move_to(rect.x, rect.y);
        window.resize_visual(rect.w, rect.h);
        state.pending_resizes.insert(resize.window, (rect.w, rect.h));
        true
    }

    // -- release --

    /// End a drag or resize at (x, y) and commit the result.
    pub fn release(
        &mut self,
        state: &mut SessionState,
        tiling: &mut dyn TilingEngine,
        x: i32,
        y: i32,
        now: Instant,
    ) -> Release {
        let interaction = std::mem::take(&mut state.interaction);
        let outcome = match interaction {
            Interaction::Idle => return Release::Nothing,
            Interaction::Resizing(resize) => {
                let ids = if resize.tiled {
                    tiling.sync_tree_from_geometry(state)
                } else {
                    self.apply_pending_resizes(state)
                };
                state.defer(now, REDRAW_DELAY, DeferredWork::ForceRedraw(ids.clone()));
                Release::Resized(ids)
            }
            Interaction::Dragging(drag) if drag.tiled => self.release_tiled_drag(state, tiling, &drag, x, y),
            Interaction::Dragging(drag) => {
                let area = state.window_area();
                match snap_zone(x, y, area, self.settings.snap_margin) {
                    Some(snap) => match state.index_of(&drag.window) {
                        Some(idx) => {
                            self.snap_window(state, idx, snap);
                            Release::Snapped(snap)
                        }
                        None => Release::Nothing,
                    },
                    None => Release::Moved,
                }
            }
        };

        let generation = state.interaction_generation();
        state.defer(now, INTERACTION_CLEAR_DELAY, DeferredWork::ClearInteraction { generation });
        debug!(?outcome, "interaction released");
        outcome
    }

    fn release_tiled_drag(
        &mut self,
        state: &mut SessionState,
        tiling: &mut dyn TilingEngine,
        drag: &DragState,
        x: i32,
        y: i32,
    ) -> Release {
        let distance = (x - drag.start.0).abs() + (y - drag.start.1).abs();
        if distance >= self.settings.swap_threshold {
            let target = state
                .eligible_indices()
                .into_iter()
                .filter(|&i| state.windows[i].id != drag.window && state.windows[i].rect.contains(x, y))
                .max_by_key(|&i| state.windows[i].z)
                .map(|i| state.windows[i].id.clone());
            if let Some(target) = target {
                if tiling.swap_windows(state, &drag.window, &target) {
                    return Release::Swapped(target);
                }
            }
        }

        // Too short or no target: back to the tiled slot
        if let Some(window) = state.window_mut(&drag.window) {
            if let Err(e) = window.set_rect(drag.origin) {
                warn!(window = %drag.window, "snap back failed: {}", e);
            }
        }
        Release::SnappedBack
    }

    /// Give every window with a queued size its real pseudo-terminal size
    pub fn apply_pending_resizes(&mut self, state: &mut SessionState) -> Vec<WindowId> {
        let pending: Vec<(WindowId, (i32, i32))> = state.pending_resizes.drain().collect();
        let mut applied = Vec::with_capacity(pending.len());
        for (id, (w, h)) in pending {
            let Some(window) = state.window_mut(&id) else {
                continue;
            };
            match window.resize(w, h) {
                Ok(_) => applied.push(id),
                Err(e) => warn!(window = %id, "resize failed: {}", e),
            }
        }
        applied
    }

    // -- snapping --

    /// Move a floating window into a screen region, remembering where it was
    pub fn snap_window(&mut self, state: &mut SessionState, idx: usize, snap: Snap) -> bool {
        let area = state.window_area();
        let Some(window) = state.windows.get_mut(idx) else {
            return false;
        };
        if window.restore_rect.is_none() {
            window.restore_rect = Some(window.rect);
        }
        let target = snap.rect(area);
        if let Err(e) = window.set_rect(target) {
            warn!(window = %window.id, "snap failed: {}", e);
            return false;
        }
        true
    }

    /// Fill the window area, or go back to the remembered rectangle
    pub fn toggle_maximize(&mut self, state: &mut SessionState, idx: usize) -> bool {
        let area = state.window_area();
        let Some(window) = state.windows.get_mut(idx) else {
            return false;
        };
        let target = match window.restore_rect {
            Some(restore) if window.rect == area => {
                window.restore_rect = None;
                restore
            }
            _ => {
                window.restore_rect = Some(window.rect);
                area
            }
        };
        match window.set_rect(target) {
            Ok(_) => true,
            Err(e) => {
                warn!(window = %window.id, "maximize failed: {}", e);
                false
            }
        }
    }

    // -- clicks and selection --

    /// Start a selection for a click at a terminal cell. Returns the click count.
    pub fn click(&mut self, state: &mut SessionState, idx: usize, cell: (u16, u16), now: Instant) -> u8 {
        let Some(window) = state.windows.get_mut(idx) else {
            return 0;
        };
        let count = self.clicks.register(&window.id, cell, now);
        let (col, row) = cell;
        let selection = match count {
            1 => Selection {
                kind: SelectionKind::Char,
                anchor: cell,
                head: cell,
                dragging: true,
            },
            2 => {
                let line = window.with_emulator(|e| e.line_text(row)).unwrap_or_default();
                let (start, end) = copymode::word_bounds(&line, col);
                Selection {
                    kind: SelectionKind::Word,
                    anchor: (start, row),
                    head: (end, row),
                    dragging: false,
                }
            }
            _ => Selection {
                kind: SelectionKind::Line,
                anchor: (0, row),
                head: (0, row),
                dragging: false,
            },
        };
        window.selection = Some(selection);
        window.mark_content_dirty();
        count
    }

    /// Move the head of a selection that follows the pointer
    pub fn extend_selection(&mut self, state: &mut SessionState, idx: usize, cell: (u16, u16)) -> bool {
        let Some(window) = state.windows.get_mut(idx) else {
            return false;
        };
        match window.selection {
            Some(ref mut sel) if sel.dragging => {
                if sel.head != cell {
                    sel.head = cell;
                    window.mark_content_dirty();
                }
                true
            }
            _ => false,
        }
    }

    /// Stop following the pointer. Returns the selected text, if any.
    pub fn finish_selection(&mut self, state: &mut SessionState, idx: usize) -> Option<String> {
        let window = state.windows.get_mut(idx)?;
        let sel = window.selection.as_mut()?;
        sel.dragging = false;
        let text = window.selection_text()?;
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn reset_clicks(&mut self) {
        self.clicks.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, state_with, RecordingEmulator};
    use crate::wm::layout::SplitTree;
    use crate::wm::TerminalWindow;
    use proptest::prelude::*;

    const AREA: Rect = Rect::new(0, 0, 120, 40);

    fn engine() -> GeometryEngine {
        GeometryEngine::new(GeometrySettings::default())
    }

    #[test]
    fn test_nearest_corner() {
        let r = Rect::new(10, 10, 40, 20);
        assert_eq!(nearest_corner(r, 11, 11), Corner::TopLeft);
        assert_eq!(nearest_corner(r, 45, 12), Corner::TopRight);
        assert_eq!(nearest_corner(r, 12, 28), Corner::BottomLeft);
        assert_eq!(nearest_corner(r, 49, 29), Corner::BottomRight);
    }

    #[test]
    fn test_snap_zones() {
        assert_eq!(snap_zone(0, 20, AREA, 2), Some(Snap::Left));
        assert_eq!(snap_zone(119, 20, AREA, 2), Some(Snap::Right));
        assert_eq!(snap_zone(1, 0, AREA, 2), Some(Snap::TopLeft));
        assert_eq!(snap_zone(118, 39, AREA, 2), Some(Snap::BottomRight));
        assert_eq!(snap_zone(60, 0, AREA, 2), Some(Snap::Fullscreen));
        assert_eq!(snap_zone(60, 20, AREA, 2), None);
        assert_eq!(snap_zone(60, 39, AREA, 2), None);
        assert_eq!(Snap::BottomRight.rect(AREA), Rect::new(60, 20, 60, 20));
    }

    #[test]
    fn test_buttons() {
        let r = Rect::new(10, 5, 40, 10);
        assert_eq!(button_at(r, false, 48, 5), Some(Button::Close));
        assert_eq!(button_at(r, false, 46, 5), Some(Button::Maximize));
        assert_eq!(button_at(r, false, 44, 5), Some(Button::Minimize));
        assert_eq!(button_at(r, true, 46, 5), Some(Button::Minimize));
        assert_eq!(button_at(r, true, 44, 5), None);
        assert_eq!(button_at(r, false, 48, 6), None);
    }

    #[test]
    fn test_floating_drag_and_snap() {
        let (mut state, _) = state_with(&[("a", Rect::new(10, 10, 40, 20))]);
        let tiling = SplitTree::new(20, 5);
        let mut geo = engine();
        assert!(geo.begin_drag(&mut state, &tiling, 0, 15, 10));
        assert!(state.interaction_mode);
        geo.drag_to(&mut state, 30, 12);
        assert_eq!(state.windows[0].rect, Rect::new(25, 12, 40, 20));

        let mut tiling = tiling;
        let now = Instant::now();
        let outcome = geo.release(&mut state, &mut tiling, 0, 20, now);
        assert_eq!(outcome, Release::Snapped(Snap::Left));
        assert_eq!(state.windows[0].rect, Rect::new(0, 0, 60, 40));
        assert_eq!(state.windows[0].restore_rect, Some(Rect::new(25, 12, 40, 20)));
        assert!(!state.interaction.is_active());

        assert!(state.interaction_mode);
        state.run_deferred(now + INTERACTION_CLEAR_DELAY);
        assert!(!state.interaction_mode);
    }

    #[test]
    fn test_drag_keeps_cache() {
        let (mut state, _) = state_with(&[("a", Rect::new(10, 10, 40, 20))]);
        let _ = state.windows[0].layer();
        let tiling = SplitTree::new(20, 5);
        let mut geo = engine();
        geo.begin_drag(&mut state, &tiling, 0, 15, 10);
        geo.drag_to(&mut state, 50, 20);
        assert!(state.windows[0].is_position_dirty());
        assert!(!state.windows[0].is_content_dirty());
        assert!(state.windows[0].has_cached_content());
    }

    #[test]
    fn test_floating_resize_commits_on_release() {
        let (mut state, emus) = state_with(&[("a", Rect::new(10, 10, 40, 20))]);
        let mut tiling = SplitTree::new(20, 5);
        let mut geo = engine();
        assert!(geo.begin_resize(&mut state, &tiling, 0, 49, 29));
        geo.resize_to(&mut state, &mut tiling, 59, 34);
        assert_eq!(state.windows[0].rect, Rect::new(10, 10, 50, 25));
        assert_eq!(state.pending_resizes.get("a"), Some(&(50, 25)));
        assert!(state.windows[0].has_pending_size());

        let now = Instant::now();
        let outcome = geo.release(&mut state, &mut tiling, 59, 34, now);
        assert_eq!(outcome, Release::Resized(vec!["a".to_string()]));
        assert!(state.pending_resizes.is_empty());
        assert!(!state.windows[0].has_pending_size());
        assert_eq!(emus[0].state().resizes.last(), Some(&(48, 23)));

        let _ = state.windows[0].layer();
        state.run_deferred(now + REDRAW_DELAY);
        assert!(state.windows[0].is_content_dirty());
    }

    #[test]
    fn test_resize_floor_then_viewport() {
        // Dragged partly past the right border, then shrunk below the floor
        let snapshot = Rect::new(110, 10, 20, 10);
        let r = resize_rect(snapshot, Corner::BottomRight, -50, 0, (20, 5), AREA, false);
        assert_eq!(r, Rect::new(100, 10, 20, 10));

        let r = resize_rect(Rect::new(10, 10, 40, 20), Corner::TopLeft, -30, -30, (20, 5), AREA, false);
        assert_eq!(r, Rect::new(0, 0, 50, 30));

        let r = resize_rect(Rect::new(10, 10, 40, 20), Corner::BottomRight, 200, 200, (20, 5), AREA, false);
        assert_eq!(r, Rect::new(10, 10, 110, 30));
    }

    #[test]
    fn test_tiled_micro_drag_snaps_back() {
        let (mut state, _) = state_with(&[("a", Rect::new(0, 0, 30, 10)), ("b", Rect::new(0, 0, 30, 10))]);
        state.tiling = true;
        let mut tiling = SplitTree::new(20, 5);
        tiling.tile_all_windows(&mut state);
        let before = state.windows[0].rect;

        let mut geo = engine();
        assert!(geo.begin_drag(&mut state, &tiling, 0, 20, 0));
        geo.drag_to(&mut state, 21, 1);
        assert_ne!(state.windows[0].rect, before);
        let outcome = geo.release(&mut state, &mut tiling, 21, 1, Instant::now());
        assert_eq!(outcome, Release::SnappedBack);
        assert_eq!(state.windows[0].rect, before);
    }

    #[test]
    fn test_tiled_drag_swaps() {
        let (mut state, _) = state_with(&[("a", Rect::new(0, 0, 30, 10)), ("b", Rect::new(0, 0, 30, 10))]);
        state.tiling = true;
        let mut tiling = SplitTree::new(20, 5);
        tiling.tile_all_windows(&mut state);

        let mut geo = engine();
        geo.begin_drag(&mut state, &tiling, 0, 20, 0);
        geo.drag_to(&mut state, 80, 10);
        let outcome = geo.release(&mut state, &mut tiling, 80, 10, Instant::now());
        assert_eq!(outcome, Release::Swapped("b".into()));
        assert_eq!(state.window("a").unwrap().rect, Rect::new(60, 0, 60, 40));
        assert_eq!(state.window("b").unwrap().rect, Rect::new(0, 0, 60, 40));
    }

    #[test]
    fn test_tiled_resize_freezes_outer_edges() {
        let (mut state, _) = state_with(&[("a", Rect::new(0, 0, 30, 10)), ("b", Rect::new(0, 0, 30, 10))]);
        state.tiling = true;
        let mut tiling = SplitTree::new(20, 5);
        tiling.tile_all_windows(&mut state);

        let mut geo = engine();
        // bottom-right corner of a: right edge is shared, bottom is the border
        geo.begin_resize(&mut state, &tiling, 0, 59, 39);
        geo.resize_to(&mut state, &mut tiling, 69, 30);
        assert_eq!(state.window("a").unwrap().rect, Rect::new(0, 0, 70, 40));
        assert_eq!(state.window("b").unwrap().rect, Rect::new(70, 0, 50, 40));

        let outcome = geo.release(&mut state, &mut tiling, 69, 30, Instant::now());
        assert!(matches!(outcome, Release::Resized(ref ids) if ids.len() == 2));
        assert!(!state.window("b").unwrap().has_pending_size());
    }

    #[test]
    fn test_toggle_maximize() {
        let (mut state, _) = state_with(&[("a", Rect::new(10, 10, 40, 20))]);
        let mut geo = engine();
        assert!(geo.toggle_maximize(&mut state, 0));
        assert_eq!(state.windows[0].rect, AREA);
        assert!(geo.toggle_maximize(&mut state, 0));
        assert_eq!(state.windows[0].rect, Rect::new(10, 10, 40, 20));
        assert_eq!(state.windows[0].restore_rect, None);
    }

    #[test]
    fn test_click_word_and_line() {
        let mut state = SessionState::new(120, 40);
        let emu = RecordingEmulator::new(38, 18).with_lines(&["echo hello_world done"]);
        state.add_window(TerminalWindow::detached("a", Rect::new(0, 0, 40, 20), emu.boxed()));
        let mut geo = engine();
        let now = Instant::now();

        assert_eq!(geo.click(&mut state, 0, (8, 0), now), 1);
        assert_eq!(geo.click(&mut state, 0, (8, 0), now), 2);
        assert_eq!(state.windows[0].selection_text().as_deref(), Some("hello_world"));
        assert_eq!(geo.click(&mut state, 0, (8, 0), now), 3);
        assert_eq!(state.windows[0].selection_text().as_deref(), Some("echo hello_world done"));
        assert_eq!(geo.click(&mut state, 0, (8, 0), now), 1);
        assert_eq!(state.windows[0].selection.unwrap().kind, SelectionKind::Char);
    }

    #[test]
    fn test_drag_selection() {
        let mut state = SessionState::new(120, 40);
        let emu = RecordingEmulator::new(38, 18).with_lines(&["alpha beta", "gamma"]);
        state.add_window(TerminalWindow::detached("a", Rect::new(0, 0, 40, 20), emu.boxed()));
        let mut geo = engine();
        geo.click(&mut state, 0, (6, 0), Instant::now());
        assert!(geo.extend_selection(&mut state, 0, (2, 1)));
        assert_eq!(geo.finish_selection(&mut state, 0).as_deref(), Some("beta\ngam"));
        assert!(!geo.extend_selection(&mut state, 0, (3, 1)));
    }

    #[test]
    fn test_cell_at() {
        let r = Rect::new(10, 5, 40, 20);
        assert_eq!(cell_at(r, 11, 6), Some((0, 0)));
        assert_eq!(cell_at(r, 10, 6), None);
        assert_eq!(cell_at(r, 48, 23), Some((37, 17)));
        assert_eq!(cell_at(r, 49, 23), None);
    }

    #[test]
    fn test_click_elsewhere_or_late_resets() {
        let mut clicks = ClickTracker::new(Duration::from_millis(500));
        let now = Instant::now();
        assert_eq!(clicks.register("a", (1, 1), now), 1);
        assert_eq!(clicks.register("a", (2, 1), now), 1);
        assert_eq!(clicks.register("a", (2, 1), now + Duration::from_millis(600)), 1);
        assert_eq!(clicks.register("b", (2, 1), now + Duration::from_millis(610)), 1);
    }

    fn corner() -> impl Strategy<Value = Corner> {
        prop_oneof![
            Just(Corner::TopLeft),
            Just(Corner::TopRight),
            Just(Corner::BottomLeft),
            Just(Corner::BottomRight),
        ]
    }

    proptest! {
        #[test]
        fn prop_resize_respects_floor_and_anchor(
            x in 0i32..80, y in 0i32..30, w in 20i32..40, h in 5i32..10,
            corner in corner(),
            moves in prop::collection::vec((-150i32..150, -60i32..60), 1..10),
        ) {
            let snapshot = Rect::new(x, y, w, h);
            for (dx, dy) in moves {
                let r = resize_rect(snapshot, corner, dx, dy, (20, 5), AREA, false);
                prop_assert!(r.w >= 20 && r.h >= 5);
                prop_assert!(r.x >= AREA.x && r.right() <= AREA.right());
                prop_assert!(r.y >= AREA.y && r.bottom() <= AREA.bottom());
                match corner {
                    Corner::TopLeft => prop_assert_eq!((r.right(), r.bottom()), (snapshot.right(), snapshot.bottom())),
                    Corner::TopRight => prop_assert_eq!((r.x, r.bottom()), (snapshot.x, snapshot.bottom())),
                    Corner::BottomLeft => prop_assert_eq!((r.right(), r.y), (snapshot.right(), snapshot.y)),
                    Corner::BottomRight => prop_assert_eq!((r.x, r.y), (snapshot.x, snapshot.y)),
                }
            }
        }

        #[test]
        fn prop_drag_keeps_margin_visible(
            w in 20i32..100, h in 5i32..30,
            press in (0i32..20, 0i32..5),
            moves in prop::collection::vec((-500i32..500, -500i32..500), 1..20),
        ) {
            let (mut state, _) = state_with(&[("a", Rect::new(10, 5, w, h))]);
            let tiling = SplitTree::new(20, 5);
            let mut geo = engine();
            prop_assert!(geo.begin_drag(&mut state, &tiling, 0, 10 + press.0, 5 + press.1));
            let margin = geo.settings().min_visible_margin;
            for (mx, my) in moves {
                geo.drag_to(&mut state, mx, my);
                let r = state.windows[0].rect;
                let visible_w = r.right().min(AREA.right()) - r.x.max(AREA.x);
                let visible_h = r.bottom().min(AREA.bottom()) - r.y.max(AREA.y);
                prop_assert!(visible_w >= margin.min(w));
                prop_assert!(visible_h >= margin.min(h));
            }
        }

        #[test]
        fn prop_clicks_cycle(n in 1usize..12) {
            let mut clicks = ClickTracker::new(Duration::from_millis(500));
            let now = Instant::now();
            for i in 0..n {
                let count = clicks.register("a", (3, 4), now);
                prop_assert_eq!(count as usize, i % 3 + 1);
            }
        }
    }

    #[test]
    fn test_dock_shrinks_drag_area() {
        let (mut state, _) = state_with(&[("a", Rect::new(10, 5, 40, 20)), ("b", Rect::new(0, 0, 30, 10))]);
        state.minimize(1, Instant::now());
        let (c, _) = testing::window("c", Rect::new(0, 0, 30, 10));
        state.add_window(c);
        let tiling = SplitTree::new(20, 5);
        let mut geo = engine();
        geo.begin_drag(&mut state, &tiling, 0, 10, 5);
        geo.drag_to(&mut state, 10, 200);
        // dock takes the last row
        assert_eq!(state.windows[0].rect.y, 39 - 5);
    }
}

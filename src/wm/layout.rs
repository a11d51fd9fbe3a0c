//! Tiling layout - split trees arranging the windows of each workspace

use std::collections::HashMap;

use tracing::{debug, warn};

use super::state::SessionState;
use super::window::{Rect, WindowId};

/// Ratio bounds keep both sides of a split visible
const MIN_RATIO: f32 = 0.05;
const MAX_RATIO: f32 = 0.95;

/// Direction of split
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SplitDirection {
    Horizontal, // Split left/right (vertical line)
    Vertical,   // Split top/bottom (horizontal line)
}

impl SplitDirection {
    pub fn flipped(self) -> Self {
        match self {
            SplitDirection::Horizontal => SplitDirection::Vertical,
            SplitDirection::Vertical => SplitDirection::Horizontal,
        }
    }
}

/// Side of the target window the next split opens on
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Preselection {
    Left,
    Right,
    Up,
    Down,
}

impl Preselection {
    fn direction(self) -> SplitDirection {
        match self {
            Preselection::Left | Preselection::Right => SplitDirection::Horizontal,
            Preselection::Up | Preselection::Down => SplitDirection::Vertical,
        }
    }

    /// New window goes before the target
    fn new_first(self) -> bool {
        matches!(self, Preselection::Left | Preselection::Up)
    }
}

/// Layout operations the input router drives in tiling mode
pub trait TilingEngine {
    /// Arm a left/right split of the focused window for the next new window
    fn split_focused_horizontal(&mut self, state: &SessionState) -> bool;
    /// Arm a top/bottom split of the focused window for the next new window
    fn split_focused_vertical(&mut self, state: &SessionState) -> bool;
    fn rotate_focused_split(&mut self, state: &mut SessionState) -> bool;
    fn equalize_splits(&mut self, state: &mut SessionState);
    /// Rebuild the current workspace as a grid
    fn tile_all_windows(&mut self, state: &mut SessionState);
    /// Give `id` the rectangle `rect` and move neighbouring edges with it,
    /// visually only. Returns every window touched, or nothing if a
    /// neighbour would drop below the minimum size.
    fn adjust_tiling_neighbors_visual(
        &mut self,
        state: &mut SessionState,
        id: &str,
        rect: Rect,
    ) -> Vec<WindowId>;
    /// Read split ratios back from window geometry and commit the layout.
    /// Returns the windows of the tree.
    fn sync_tree_from_geometry(&mut self, state: &mut SessionState) -> Vec<WindowId>;
    fn set_preselection(&mut self, side: Preselection);

    /// Place a window into its workspace tree, next to `near` if given
    fn insert_window(&mut self, state: &mut SessionState, id: &str, near: Option<&str>);
    fn remove_window(&mut self, state: &mut SessionState, id: &str);
    fn swap_windows(&mut self, state: &mut SessionState, a: &str, b: &str) -> bool;
    fn contains(&self, workspace: u8, id: &str) -> bool;
    /// Commit tree geometry to the windows of the current workspace
    fn apply(&mut self, state: &mut SessionState);
}

/// Layout node - binary tree structure
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Pane(WindowId),
    Split {
        direction: SplitDirection,
        /// Share of the first child (0.0 - 1.0)
        ratio: f32,
        first: Box<Node>,
        second: Box<Node>,
    },
}

impl Node {
    /// Grid of roughly square shape, filled row by row
    pub fn tiled(ids: &[WindowId]) -> Option<Self> {
        if ids.len() <= 2 {
            return Self::build_even(ids, SplitDirection::Horizontal);
        }
        let count = ids.len();
        let cols = (count as f64).sqrt().ceil() as usize;
        let rows: Vec<Node> = ids
            .chunks(cols)
            .filter_map(|row| Self::build_even(row, SplitDirection::Horizontal))
            .collect();
        Self::stack(rows, SplitDirection::Vertical)
    }

    fn build_even(ids: &[WindowId], direction: SplitDirection) -> Option<Self> {
        Self::stack(ids.iter().cloned().map(Node::Pane).collect(), direction)
    }

    /// Stack nodes with even shares
    fn stack(mut nodes: Vec<Node>, direction: SplitDirection) -> Option<Self> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            len => {
                let second = nodes.split_off(len / 2);
                let ratio = (len / 2) as f32 / len as f32;
                Some(Node::Split {
                    direction,
                    ratio,
                    first: Box::new(Self::stack(nodes, direction)?),
                    second: Box::new(Self::stack(second, direction)?),
                })
            }
        }
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        match self {
            Node::Pane(id) => vec![id.clone()],
            Node::Split { first, second, .. } => {
                let mut ids = first.window_ids();
                ids.extend(second.window_ids());
                ids
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Node::Pane(pane) => pane == id,
            Node::Split { first, second, .. } => first.contains(id) || second.contains(id),
        }
    }

    fn leaf_count(&self) -> usize {
        match self {
            Node::Pane(_) => 1,
            Node::Split { first, second, .. } => first.leaf_count() + second.leaf_count(),
        }
    }

    /// Replace leaf `target` with a split holding it and `new`
    fn split(&mut self, target: &str, new: &str, direction: SplitDirection, new_first: bool) -> bool {
        match self {
            Node::Pane(id) if id.as_str() == target => {
                let old = Node::Pane(id.clone());
                let new = Node::Pane(new.to_string());
                let (first, second) = if new_first { (new, old) } else { (old, new) };
                *self = Node::Split {
                    direction,
                    ratio: 0.5,
                    first: Box::new(first),
                    second: Box::new(second),
                };
                true
            }
            Node::Pane(_) => false,
            Node::Split { first, second, .. } => {
                first.split(target, new, direction, new_first)
                    || second.split(target, new, direction, new_first)
            }
        }
    }

    /// Remove a leaf; its sibling takes the parent's place. None when empty.
    fn remove(self, id: &str) -> Option<Node> {
        match self {
            Node::Pane(pane) if pane == id => None,
            Node::Pane(pane) => Some(Node::Pane(pane)),
            Node::Split {
                direction,
                ratio,
                first,
                second,
            } => match ((*first).remove(id), (*second).remove(id)) {
                (Some(first), Some(second)) => Some(Node::Split {
                    direction,
                    ratio,
                    first: Box::new(first),
                    second: Box::new(second),
                }),
                (Some(node), None) | (None, Some(node)) => Some(node),
                (None, None) => None,
            },
        }
    }

    fn swap(&mut self, a: &str, b: &str) {
        match self {
            Node::Pane(id) => {
                if id.as_str() == a {
                    *id = b.to_string();
                } else if id.as_str() == b {
                    *id = a.to_string();
                }
            }
            Node::Split { first, second, .. } => {
                first.swap(a, b);
                second.swap(a, b);
            }
        }
    }

    /// Flip the innermost split holding `id`
    fn rotate_parent(&mut self, id: &str) -> bool {
        match self {
            Node::Pane(_) => false,
            Node::Split {
                direction,
                first,
                second,
                ..
            } => {
                if first.rotate_parent(id) || second.rotate_parent(id) {
                    return true;
                }
                if first.contains(id) || second.contains(id) {
                    *direction = direction.flipped();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Give every leaf the same share along each split
    fn equalize(&mut self) {
        if let Node::Split {
            ratio,
            first,
            second,
            ..
        } = self
        {
            let left = first.leaf_count();
            *ratio = left as f32 / (left + second.leaf_count()) as f32;
            first.equalize();
            second.equalize();
        }
    }

    /// Recompute ratios from the rectangles of the leaves. Returns the
    /// bounds of this subtree.
    fn sync(&mut self, rects: &HashMap<WindowId, Rect>) -> Option<Rect> {
        match self {
            Node::Pane(id) => rects.get(id.as_str()).copied(),
            Node::Split {
                direction,
                ratio,
                first,
                second,
            } => match (first.sync(rects), second.sync(rects)) {
                (Some(a), Some(b)) => {
                    let bounds = union(a, b);
                    let (extent, total) = match direction {
                        SplitDirection::Horizontal => (a.w, bounds.w),
                        SplitDirection::Vertical => (a.h, bounds.h),
                    };
                    if total > 0 {
                        *ratio = (extent as f32 / total as f32).clamp(MIN_RATIO, MAX_RATIO);
                    }
                    Some(bounds)
                }
                (a, b) => a.or(b),
            },
        }
    }

    /// Calculate rectangles for all leaves inside `area`
    pub fn positions(&self, area: Rect) -> Vec<(WindowId, Rect)> {
        match self {
            Node::Pane(id) => vec![(id.clone(), area)],
            Node::Split {
                direction,
                ratio,
                first,
                second,
            } => {
                let mut positions = Vec::new();
                match direction {
                    SplitDirection::Horizontal => {
                        let fw = share(area.w, *ratio);
                        positions.extend(first.positions(Rect::new(area.x, area.y, fw, area.h)));
                        positions.extend(
                            second.positions(Rect::new(area.x + fw, area.y, area.w - fw, area.h)),
                        );
                    }
                    SplitDirection::Vertical => {
                        let fh = share(area.h, *ratio);
                        positions.extend(first.positions(Rect::new(area.x, area.y, area.w, fh)));
                        positions.extend(
                            second.positions(Rect::new(area.x, area.y + fh, area.w, area.h - fh)),
                        );
                    }
                }
                positions
            }
        }
    }
}

fn share(len: i32, ratio: f32) -> i32 {
    let first = (len as f32 * ratio).round() as i32;
    if len >= 2 {
        first.clamp(1, len - 1)
    } else {
        first.clamp(0, len.max(0))
    }
}

fn union(a: Rect, b: Rect) -> Rect {
    let x = a.x.min(b.x);
    let y = a.y.min(b.y);
    Rect::new(x, y, a.right().max(b.right()) - x, a.bottom().max(b.bottom()) - y)
}

#[derive(Debug, Clone)]
struct PendingSplit {
    target: WindowId,
    direction: SplitDirection,
}

/// Split trees, one per workspace
#[derive(Debug, Default)]
pub struct SplitTree {
    trees: HashMap<u8, Node>,
    pending: Option<PendingSplit>,
    preselection: Option<Preselection>,
    min_size: (i32, i32),
}

impl SplitTree {
    pub fn new(min_width: i32, min_height: i32) -> Self {
        Self {
            min_size: (min_width, min_height),
            ..Self::default()
        }
    }

    pub fn tree(&self, workspace: u8) -> Option<&Node> {
        self.trees.get(&workspace)
    }

    fn arm_split(&mut self, state: &SessionState, direction: SplitDirection) -> bool {
        let Some(target) = state.focused_id() else {
            return false;
        };
        if !self.contains(state.workspace, &target) {
            return false;
        }
        debug!(window = %target, ?direction, "split armed");
        self.pending = Some(PendingSplit { target, direction });
        true
    }

    fn apply_workspace(&self, state: &mut SessionState, workspace: u8) {
        if workspace != state.workspace {
            return;
        }
        let Some(tree) = self.trees.get(&workspace) else {
            return;
        };
        let area = state.window_area();
        for (id, rect) in tree.positions(area) {
            if let Some(window) = state.window_mut(&id) {
                if let Err(e) = window.set_rect(rect) {
                    warn!(window = %id, "tiled resize failed: {}", e);
                }
            }
        }
        state.needs_redraw = true;
    }

    fn largest_leaf(&self, state: &SessionState, workspace: u8) -> Option<WindowId> {
        let tree = self.trees.get(&workspace)?;
        tree.window_ids()
            .into_iter()
            .filter_map(|id| state.window(&id).map(|w| (id, w.rect.w * w.rect.h)))
            .max_by_key(|(_, area)| *area)
            .map(|(id, _)| id)
    }
}

impl TilingEngine for SplitTree {
    fn split_focused_horizontal(&mut self, state: &SessionState) -> bool {
        self.arm_split(state, SplitDirection::Horizontal)
    }

    fn split_focused_vertical(&mut self, state: &SessionState) -> bool {
        self.arm_split(state, SplitDirection::Vertical)
    }

    fn rotate_focused_split(&mut self, state: &mut SessionState) -> bool {
        let Some(id) = state.focused_id() else {
            return false;
        };
        let rotated = self
            .trees
            .get_mut(&state.workspace)
            .map_or(false, |tree| tree.rotate_parent(&id));
        if rotated {
            self.apply(state);
        }
        rotated
    }

    fn equalize_splits(&mut self, state: &mut SessionState) {
        if let Some(tree) = self.trees.get_mut(&state.workspace) {
            tree.equalize();
            self.apply(state);
        }
    }

    fn tile_all_windows(&mut self, state: &mut SessionState) {
        let ids: Vec<WindowId> = state
            .eligible_indices()
            .into_iter()
            .map(|i| state.windows[i].id.clone())
            .collect();
        self.pending = None;
        match Node::tiled(&ids) {
            Some(tree) => {
                debug!(workspace = state.workspace, windows = ids.len(), "tiled");
                self.trees.insert(state.workspace, tree);
                self.apply(state);
            }
            None => {
                self.trees.remove(&state.workspace);
            }
        }
    }

    fn adjust_tiling_neighbors_visual(
        &mut self,
        state: &mut SessionState,
        id: &str,
        rect: Rect,
    ) -> Vec<WindowId> {
        let Some(old) = state.window(id).map(|w| w.rect) else {
            return Vec::new();
        };
        let Some(tree) = self.trees.get(&state.workspace).filter(|t| t.contains(id)) else {
            return Vec::new();
        };

        let mut updates = vec![(id.to_string(), rect)];
        for other in tree.window_ids() {
            if other == id {
                continue;
            }
            let Some(current) = state.window(&other).map(|w| w.rect) else {
                continue;
            };
            let mut r = current;
            let rows_overlap = r.y < old.bottom() && old.y < r.bottom();
            let cols_overlap = r.x < old.right() && old.x < r.right();
            if rows_overlap {
                if r.x == old.right() {
                    let right = r.right();
                    r.x = rect.right();
                    r.w = right - r.x;
                } else if r.right() == old.x {
                    r.w = rect.x - r.x;
                }
            }
            if cols_overlap {
                if r.y == old.bottom() {
                    let bottom = r.bottom();
                    r.y = rect.bottom();
                    r.h = bottom - r.y;
                } else if r.bottom() == old.y {
                    r.h = rect.y - r.y;
                }
            }
            if r != current {
                if r.w < self.min_size.0 || r.h < self.min_size.1 {
                    return Vec::new();
                }
                updates.push((other, r));
            }
        }

        for (wid, r) in &updates {
            if let Some(window) = state.window_mut(wid) {
                window.move_to(r.x, r.y);
                window.resize_visual(r.w, r.h);
            }
        }
        updates.into_iter().map(|(wid, _)| wid).collect()
    }

    fn sync_tree_from_geometry(&mut self, state: &mut SessionState) -> Vec<WindowId> {
        let Some(tree) = self.trees.get_mut(&state.workspace) else {
            return Vec::new();
        };
        let ids = tree.window_ids();
        let rects: HashMap<WindowId, Rect> = ids
            .iter()
            .filter_map(|id| state.window(id).map(|w| (id.clone(), w.rect)))
            .collect();
        tree.sync(&rects);
        self.apply(state);
        ids
    }

    fn set_preselection(&mut self, side: Preselection) {
        self.preselection = Some(side);
    }

    fn insert_window(&mut self, state: &mut SessionState, id: &str, near: Option<&str>) {
        let Some(workspace) = state.window(id).map(|w| w.workspace) else {
            return;
        };
        if self.contains(workspace, id) {
            return;
        }

        let pending = self
            .pending
            .take()
            .filter(|p| self.contains(workspace, &p.target));
        let near = near
            .filter(|n| self.contains(workspace, n))
            .map(str::to_string)
            .or_else(|| self.largest_leaf(state, workspace));
        let preselection = self.preselection.take();

        let target = pending.as_ref().map(|p| p.target.clone()).or(near);
        let Some(target) = target else {
            self.trees.insert(workspace, Node::Pane(id.to_string()));
            self.apply_workspace(state, workspace);
            return;
        };

        let direction = match (&pending, preselection) {
            (Some(p), _) => p.direction,
            (None, Some(side)) => side.direction(),
            (None, None) => match state.window(&target) {
                // Cells are about twice as tall as wide
                Some(w) if w.rect.w >= w.rect.h * 2 => SplitDirection::Horizontal,
                _ => SplitDirection::Vertical,
            },
        };
        let new_first = preselection.map_or(false, Preselection::new_first);

        if let Some(tree) = self.trees.get_mut(&workspace) {
            tree.split(&target, id, direction, new_first);
        }
        debug!(window = id, target = %target, ?direction, "window tiled");
        self.apply_workspace(state, workspace);
    }

    fn remove_window(&mut self, state: &mut SessionState, id: &str) {
        if self.pending.as_ref().map_or(false, |p| p.target == id) {
            self.pending = None;
        }
        let Some(workspace) = self
            .trees
            .iter()
            .find(|(_, tree)| tree.contains(id))
            .map(|(ws, _)| *ws)
        else {
            return;
        };
        if let Some(tree) = self.trees.remove(&workspace) {
            if let Some(rest) = tree.remove(id) {
                self.trees.insert(workspace, rest);
            }
        }
        self.apply_workspace(state, workspace);
    }

    fn swap_windows(&mut self, state: &mut SessionState, a: &str, b: &str) -> bool {
        let Some(tree) = self.trees.get_mut(&state.workspace) else {
            return false;
        };
        if a == b || !tree.contains(a) || !tree.contains(b) {
            return false;
        }
        tree.swap(a, b);
        self.apply(state);
        true
    }

    fn contains(&self, workspace: u8, id: &str) -> bool {
        self.trees.get(&workspace).map_or(false, |t| t.contains(id))
    }

    fn apply(&mut self, state: &mut SessionState) {
        let workspace = state.workspace;
        self.apply_workspace(state, workspace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, state_with};

    fn tiled(ids: &[&str]) -> (SessionState, SplitTree) {
        let rects: Vec<(&str, Rect)> = ids.iter().map(|id| (*id, Rect::new(0, 0, 30, 10))).collect();
        let (mut state, _) = state_with(&rects);
        state.tiling = true;
        let mut engine = SplitTree::new(20, 5);
        engine.tile_all_windows(&mut state);
        (state, engine)
    }

    fn rect_of(state: &SessionState, id: &str) -> Rect {
        state.window(id).unwrap().rect
    }

    #[test]
    fn test_tile_all_builds_grid() {
        let (state, _) = tiled(&["a", "b", "c", "d"]);
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 0, 60, 20));
        assert_eq!(rect_of(&state, "b"), Rect::new(60, 0, 60, 20));
        assert_eq!(rect_of(&state, "c"), Rect::new(0, 20, 60, 20));
        assert_eq!(rect_of(&state, "d"), Rect::new(60, 20, 60, 20));
    }

    #[test]
    fn test_split_and_remove() {
        let (mut state, mut engine) = tiled(&["a"]);
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 0, 120, 40));
        assert!(engine.split_focused_horizontal(&state));

        let (b, _) = testing::window("b", Rect::new(5, 5, 30, 10));
        state.add_window(b);
        engine.insert_window(&mut state, "b", Some("a"));
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 0, 60, 40));
        assert_eq!(rect_of(&state, "b"), Rect::new(60, 0, 60, 40));

        engine.remove_window(&mut state, "b");
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 0, 120, 40));
        assert_eq!(engine.tree(1), Some(&Node::Pane("a".into())));
    }

    #[test]
    fn test_preselection_places_new_window_first() {
        let (mut state, mut engine) = tiled(&["a"]);
        engine.set_preselection(Preselection::Up);
        let (b, _) = testing::window("b", Rect::new(5, 5, 30, 10));
        state.add_window(b);
        engine.insert_window(&mut state, "b", Some("a"));
        assert_eq!(rect_of(&state, "b"), Rect::new(0, 0, 120, 20));
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 20, 120, 20));
    }

    #[test]
    fn test_rotate_and_swap() {
        let (mut state, mut engine) = tiled(&["a", "b"]);
        state.focus_id("a");
        assert!(engine.rotate_focused_split(&mut state));
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 0, 120, 20));
        assert_eq!(rect_of(&state, "b"), Rect::new(0, 20, 120, 20));

        assert!(engine.swap_windows(&mut state, "a", "b"));
        assert_eq!(rect_of(&state, "b"), Rect::new(0, 0, 120, 20));
        assert!(!engine.swap_windows(&mut state, "a", "zzz"));
    }

    #[test]
    fn test_neighbors_follow_edge_then_sync() {
        let (mut state, mut engine) = tiled(&["a", "b"]);
        let touched = engine.adjust_tiling_neighbors_visual(&mut state, "a", Rect::new(0, 0, 70, 40));
        assert_eq!(touched, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(rect_of(&state, "b"), Rect::new(70, 0, 50, 40));
        assert!(state.window("b").unwrap().has_pending_size());

        engine.sync_tree_from_geometry(&mut state);
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 0, 70, 40));
        assert_eq!(rect_of(&state, "b"), Rect::new(70, 0, 50, 40));
        assert!(!state.window("b").unwrap().has_pending_size());

        engine.equalize_splits(&mut state);
        assert_eq!(rect_of(&state, "b"), Rect::new(60, 0, 60, 40));
    }

    #[test]
    fn test_neighbor_floor_rejects_adjustment() {
        let (mut state, mut engine) = tiled(&["a", "b"]);
        let touched = engine.adjust_tiling_neighbors_visual(&mut state, "a", Rect::new(0, 0, 110, 40));
        assert!(touched.is_empty());
        assert_eq!(rect_of(&state, "a"), Rect::new(0, 0, 60, 40));
    }

    #[test]
    fn test_trees_are_per_workspace() {
        let (mut state, mut engine) = tiled(&["a"]);
        state.switch_workspace(2);
        let (b, _) = testing::window("b", Rect::new(5, 5, 30, 10));
        state.add_window(b);
        engine.insert_window(&mut state, "b", None);
        assert!(engine.contains(2, "b"));
        assert!(!engine.contains(1, "b"));
        assert_eq!(rect_of(&state, "b"), Rect::new(0, 0, 120, 40));
    }
}

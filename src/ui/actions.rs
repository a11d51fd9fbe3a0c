//! Window-management actions and the keybind registry

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::config::Config;
use crate::wm::{Preselection, Snap};

/// Everything a keybinding can trigger in window-management mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    NewWindow,
    CloseWindow,
    NextWindow,
    PrevWindow,
    EnterTerminalMode,
    ToggleTiling,
    TileAll,
    SplitHorizontal,
    SplitVertical,
    RotateSplit,
    EqualizeSplits,
    MinimizeWindow,
    RestoreAll,
    ToggleMaximize,
    Snap(Snap),
    RenameWindow,
    CopyMode,
    ToggleHelp,
    ToggleLogViewer,
    ToggleCacheStats,
    Quit,
    Detach,
    SwitchWorkspace(u8),
    MoveToWorkspace(u8),
    Preselect(Preselection),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let action = match name.as_str() {
            "new_window" => Action::NewWindow,
            "close_window" => Action::CloseWindow,
            "next_window" => Action::NextWindow,
            "prev_window" => Action::PrevWindow,
            "enter_terminal_mode" => Action::EnterTerminalMode,
            "toggle_tiling" => Action::ToggleTiling,
            "tile_all" => Action::TileAll,
            "split_horizontal" => Action::SplitHorizontal,
            "split_vertical" => Action::SplitVertical,
            "rotate_split" => Action::RotateSplit,
            "equalize_splits" => Action::EqualizeSplits,
            "minimize_window" => Action::MinimizeWindow,
            "restore_all" => Action::RestoreAll,
            "toggle_maximize" => Action::ToggleMaximize,
            "snap_left" => Action::Snap(Snap::Left),
            "snap_right" => Action::Snap(Snap::Right),
            "snap_top_left" => Action::Snap(Snap::TopLeft),
            "snap_top_right" => Action::Snap(Snap::TopRight),
            "snap_bottom_left" => Action::Snap(Snap::BottomLeft),
            "snap_bottom_right" => Action::Snap(Snap::BottomRight),
            "snap_fullscreen" => Action::Snap(Snap::Fullscreen),
            "rename_window" => Action::RenameWindow,
            "copy_mode" => Action::CopyMode,
            "toggle_help" => Action::ToggleHelp,
            "toggle_log_viewer" => Action::ToggleLogViewer,
            "toggle_cache_stats" => Action::ToggleCacheStats,
            "quit" => Action::Quit,
            "detach" => Action::Detach,
            "preselect_left" => Action::Preselect(Preselection::Left),
            "preselect_right" => Action::Preselect(Preselection::Right),
            "preselect_up" => Action::Preselect(Preselection::Up),
            "preselect_down" => Action::Preselect(Preselection::Down),
            other => {
                let workspace = |prefix: &str| {
                    other
                        .strip_prefix(prefix)
                        .and_then(|n| n.parse::<u8>().ok())
                        .filter(|n| (1..=9).contains(n))
                };
                if let Some(n) = workspace("switch_workspace_") {
                    Action::SwitchWorkspace(n)
                } else if let Some(n) = workspace("move_to_workspace_") {
                    Action::MoveToWorkspace(n)
                } else {
                    return Err(UnknownAction(s.to_string()));
                }
            }
        };
        Ok(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::NewWindow => "new_window",
            Action::CloseWindow => "close_window",
            Action::NextWindow => "next_window",
            Action::PrevWindow => "prev_window",
            Action::EnterTerminalMode => "enter_terminal_mode",
            Action::ToggleTiling => "toggle_tiling",
            Action::TileAll => "tile_all",
            Action::SplitHorizontal => "split_horizontal",
            Action::SplitVertical => "split_vertical",
            Action::RotateSplit => "rotate_split",
            Action::EqualizeSplits => "equalize_splits",
            Action::MinimizeWindow => "minimize_window",
            Action::RestoreAll => "restore_all",
            Action::ToggleMaximize => "toggle_maximize",
            Action::Snap(Snap::Left) => "snap_left",
            Action::Snap(Snap::Right) => "snap_right",
            Action::Snap(Snap::TopLeft) => "snap_top_left",
            Action::Snap(Snap::TopRight) => "snap_top_right",
            Action::Snap(Snap::BottomLeft) => "snap_bottom_left",
            Action::Snap(Snap::BottomRight) => "snap_bottom_right",
            Action::Snap(Snap::Fullscreen) => "snap_fullscreen",
            Action::RenameWindow => "rename_window",
            Action::CopyMode => "copy_mode",
            Action::ToggleHelp => "toggle_help",
            Action::ToggleLogViewer => "toggle_log_viewer",
            Action::ToggleCacheStats => "toggle_cache_stats",
            Action::Quit => "quit",
            Action::Detach => "detach",
            Action::SwitchWorkspace(n) => return write!(f, "switch_workspace_{}", n),
            Action::MoveToWorkspace(n) => return write!(f, "move_to_workspace_{}", n),
            Action::Preselect(Preselection::Left) => "preselect_left",
            Action::Preselect(Preselection::Right) => "preselect_right",
            Action::Preselect(Preselection::Up) => "preselect_up",
            Action::Preselect(Preselection::Down) => "preselect_down",
        };
        f.write_str(name)
    }
}

/// Maps keybind strings to action names
pub trait KeybindRegistry {
    /// Action name bound to `key`, or None when unbound
    fn action(&self, key: &str) -> Option<&str>;
}

/// Registry backed by the `[keybindings]` table of the config
#[derive(Debug, Clone, Default)]
pub struct ConfigKeybinds {
    bindings: HashMap<String, String>,
}

impl ConfigKeybinds {
    pub fn from_config(config: &Config) -> Self {
        let bindings = config
            .keybindings
            .iter()
            .filter(|(key, action)| {
                let known = action.parse::<Action>().is_ok();
                if !known {
                    warn!(key = %key, action = %action, "ignoring binding to unknown action");
                }
                known
            })
            .map(|(key, action)| (key.to_ascii_lowercase(), action.to_ascii_lowercase()))
            .collect();
        Self { bindings }
    }

    pub fn bind(&mut self, key: &str, action: Action) {
        self.bindings.insert(key.to_ascii_lowercase(), action.to_string());
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings sorted by key, for the help overlay
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self
            .bindings
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.sort();
        entries
    }
}

impl KeybindRegistry for ConfigKeybinds {
    fn action(&self, key: &str) -> Option<&str> {
        self.bindings.get(&key.to_ascii_lowercase()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for name in ["new_window", "snap_top_left", "switch_workspace_3", "move_to_workspace_9", "preselect_up"] {
            let action: Action = name.parse().unwrap();
            assert_eq!(action.to_string(), name);
        }
        assert_eq!("Toggle_Help".parse::<Action>(), Ok(Action::ToggleHelp));
        assert!("switch_workspace_0".parse::<Action>().is_err());
        assert!("switch_workspace_10".parse::<Action>().is_err());
        assert_eq!("fly".parse::<Action>(), Err(UnknownAction("fly".into())));
    }

    #[test]
    fn test_actions_hash() {
        let set: std::collections::HashSet<Action> = [
            Action::Snap(Snap::Left),
            Action::Snap(Snap::Left),
            Action::Preselect(Preselection::Up),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = Config::default();
        config.keybindings.insert("ctrl+q".into(), "nonsense".into());
        let binds = ConfigKeybinds::from_config(&config);
        assert_eq!(binds.action("n"), Some("new_window"));
        assert_eq!(binds.action("SHIFT+M"), Some("restore_all"));
        assert_eq!(binds.action("ctrl+q"), None);
        assert_eq!(binds.action("f12"), None);
        assert!(!binds.is_empty());
    }

    #[test]
    fn test_bind_overrides() {
        let mut binds = ConfigKeybinds::default();
        binds.bind("F2", Action::Snap(Snap::Right));
        assert_eq!(binds.action("f2"), Some("snap_right"));
        assert_eq!(binds.entries(), vec![("f2", "snap_right")]);
        assert_eq!(binds.len(), 1);
    }
}

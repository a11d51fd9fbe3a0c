//! Configuration for termwm.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.termwm/config.toml`
//! - Defaults for every setting so partial files work
//! - The keybinding table consulted in window-management mode
//!
//! # Configuration File
//!
//! ```toml
//! # Shell to launch (optional, falls back to $SHELL)
//! shell = "/usr/bin/fish"
//!
//! # Leader key and how long it stays armed
//! leader = "ctrl+b"
//! prefix_timeout_ms = 2000
//!
//! [window]
//! min_width = 20
//! min_height = 5
//!
//! [mouse]
//! double_click_ms = 500
//!
//! [terminal]
//! mode_switch_guard_ms = 100
//!
//! [dock]
//! position = "bottom"
//!
//! [theme]
//! palette = ["#1a1b26", "#f7768e", ...]  # 16 colours, empty = passthrough
//!
//! [keybindings]
//! "n" = "new_window"
//! "ctrl+w" = "close_window"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::term::{Palette, Rgb};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command; `None` detects one
    pub shell: Option<String>,
    /// Leader key string, matched case-insensitively
    pub leader: String,
    pub prefix_timeout_ms: u64,
    pub window: WindowConfig,
    pub mouse: MouseConfig,
    pub terminal: TerminalConfig,
    pub dock: DockConfig,
    pub theme: ThemeConfig,
    pub log: LogConfig,
    /// Key string -> action name
    pub keybindings: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            leader: "ctrl+b".to_string(),
            prefix_timeout_ms: 2000,
            window: WindowConfig::default(),
            mouse: MouseConfig::default(),
            terminal: TerminalConfig::default(),
            dock: DockConfig::default(),
            theme: ThemeConfig::default(),
            log: LogConfig::default(),
            keybindings: default_keybindings(),
        }
    }
}

/// Window sizing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub default_width: i32,
    pub default_height: i32,
    pub min_width: i32,
    pub min_height: i32,
    /// Cells of a dragged window that always stay on screen
    pub min_visible_margin: i32,
    /// Remove a window once its process exits
    pub close_on_exit: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_width: 80,
            default_height: 24,
            min_width: 20,
            min_height: 5,
            min_visible_margin: 5,
            close_on_exit: true,
        }
    }
}

/// Mouse behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MouseConfig {
    pub double_click_ms: u64,
    /// Distance from a screen edge that triggers a snap on release
    pub snap_margin: i32,
    /// Drag distance before a tiled window swaps places
    pub swap_threshold: i32,
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            double_click_ms: 500,
            snap_margin: 2,
            swap_threshold: 5,
        }
    }
}

/// Terminal session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Unmodified keys are dropped this long after entering terminal mode
    pub mode_switch_guard_ms: u64,
    /// Leaves terminal mode without the leader
    pub exit_key: String,
    pub scrollback: usize,
    pub cell_pixel_width: Option<u16>,
    pub cell_pixel_height: Option<u16>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            mode_switch_guard_ms: 100,
            exit_key: "ctrl+alt+w".to_string(),
            scrollback: 10_000,
            cell_pixel_width: None,
            cell_pixel_height: None,
        }
    }
}

/// Where the dock of minimized windows sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DockPosition {
    Top,
    #[default]
    Bottom,
    Hidden,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DockConfig {
    pub position: DockPosition,
}

/// Colours handed to every emulator
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThemeConfig {
    /// Sixteen `#rrggbb` colours; empty leaves the child's colours alone
    pub palette: Vec<String>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

impl ThemeConfig {
    /// Build the emulator palette, `None` for passthrough.
    pub fn to_palette(&self) -> anyhow::Result<Option<Palette>> {
        if self.palette.is_empty() {
            return Ok(None);
        }
        if self.palette.len() != 16 {
            bail!("theme.palette needs 16 colours, got {}", self.palette.len());
        }
        let mut ansi = [(0, 0, 0); 16];
        for (slot, hex) in ansi.iter_mut().zip(&self.palette) {
            *slot = parse_hex(hex)?;
        }
        let foreground = match self.foreground {
            Some(ref hex) => parse_hex(hex)?,
            None => ansi[7],
        };
        let background = match self.background {
            Some(ref hex) => parse_hex(hex)?,
            None => ansi[0],
        };
        Ok(Some(Palette {
            ansi,
            foreground,
            background,
        }))
    }
}

fn parse_hex(hex: &str) -> anyhow::Result<Rgb> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("invalid colour {:?}", hex);
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16).with_context(|| format!("invalid colour {:?}", hex))
    };
    Ok((channel(0)?, channel(2)?, channel(4)?))
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter, overridden by `TERMWM_LOG`
    pub level: String,
    /// Log file; `None` writes to `~/.termwm/termwm.log`
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

fn default_keybindings() -> BTreeMap<String, String> {
    [
        ("n", "new_window"),
        ("x", "close_window"),
        ("tab", "next_window"),
        ("shift+tab", "prev_window"),
        ("enter", "enter_terminal_mode"),
        ("i", "enter_terminal_mode"),
        ("t", "toggle_tiling"),
        ("m", "minimize_window"),
        ("shift+m", "restore_all"),
        ("z", "toggle_maximize"),
        ("r", "rename_window"),
        ("/", "copy_mode"),
        ("?", "toggle_help"),
        ("q", "quit"),
        ("h", "snap_left"),
        ("l", "snap_right"),
        ("f", "snap_fullscreen"),
        ("1", "switch_workspace_1"),
        ("2", "switch_workspace_2"),
        ("3", "switch_workspace_3"),
        ("4", "switch_workspace_4"),
        ("5", "switch_workspace_5"),
        ("6", "switch_workspace_6"),
        ("7", "switch_workspace_7"),
        ("8", "switch_workspace_8"),
        ("9", "switch_workspace_9"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring config {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load and validate a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content).context("parsing config")?;
        config.normalize();
        config.theme.to_palette()?;
        Ok(config)
    }

    /// Lower-case key strings and keep sizes sane
    fn normalize(&mut self) {
        self.leader = self.leader.trim().to_lowercase();
        self.terminal.exit_key = self.terminal.exit_key.trim().to_lowercase();
        self.keybindings = std::mem::take(&mut self.keybindings)
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();
        self.window.min_width = self.window.min_width.max(3);
        self.window.min_height = self.window.min_height.max(3);
        self.window.min_visible_margin = self.window.min_visible_margin.max(1);
    }

    /// Directory holding config and logs
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".termwm"))
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log
            .file
            .clone()
            .or_else(|| Self::config_dir().map(|dir| dir.join("termwm.log")))
    }

    pub fn prefix_timeout(&self) -> Duration {
        Duration::from_millis(self.prefix_timeout_ms)
    }

    pub fn mode_switch_guard(&self) -> Duration {
        Duration::from_millis(self.terminal.mode_switch_guard_ms)
    }

    pub fn double_click(&self) -> Duration {
        Duration::from_millis(self.mouse.double_click_ms)
    }

    pub fn cell_pixels(&self) -> Option<(u16, u16)> {
        Some((self.terminal.cell_pixel_width?, self.terminal.cell_pixel_height?))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

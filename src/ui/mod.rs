//! Input handling.
//!
//! - **keymapper**: key events to PTY bytes and keybind strings, mouse reports
//! - **actions**: window-management actions and the keybind registry
//! - **overlay**: quit dialog, rename prompt, tape manager, clipboard
//! - **router**: `InputRouter`, the modal dispatcher
//!
//! # Key Routing
//!
//! ```text
//! quit dialog → tape manager → rename → help/log/cache overlays
//!   → copy mode → leader / child prefix → Terminal or WindowManagement
//! ```

pub mod actions;
pub mod keymapper;
pub mod overlay;
pub mod router;

pub use actions::{Action, ConfigKeybinds, KeybindRegistry};
pub use keymapper::KeyMapper;
pub use overlay::{ClipboardSink, SystemClipboard, TapeDeck, TapeManager};
pub use router::{InputRouter, RouterSettings, WindowFactory};

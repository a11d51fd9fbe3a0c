//! Window Manager - floating and tiled terminal windows.
//!
//! - **window**: `TerminalWindow`, one shell session with geometry and caches
//! - **state**: `SessionState`, everything the input handlers share
//! - **geometry**: drag, resize, snap and click counting
//! - **layout**: split trees for tiling mode
//!
//! # Module Hierarchy
//!
//! ```text
//! wm/
//! ├── mod.rs       - Module exports
//! ├── window.rs    - TerminalWindow
//! ├── state.rs     - SessionState (focus, workspaces, modes)
//! ├── geometry.rs  - GeometryEngine
//! └── layout.rs    - TilingEngine + SplitTree
//! ```

pub mod geometry;
pub mod layout;
pub mod state;
pub mod window;

pub use geometry::{GeometryEngine, GeometrySettings, Release, Snap};
pub use layout::{Preselection, SplitDirection, SplitTree, TilingEngine};
pub use state::{ChildPrefix, Interaction, Mode, PrefixState, SessionState};
pub use window::{new_window_id, Rect, TerminalWindow, WindowError, WindowId, WindowOptions};

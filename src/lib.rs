//! termwm - session and input engine for a terminal window manager
//!
//! termwm keeps floating and tiled terminal windows inside one host
//! terminal. Each window owns a shell on a local pseudo-terminal or a
//! session hosted by a daemon. Rendering is left to the embedder.
//!
//! # Features
//!
//! - **Two modes**: window management, and terminal mode where keys go to
//!   the focused shell
//! - **Leader prefix**: `ctrl+b` commands plus workspace, minimize,
//!   tiling, debug and tape sub-menus
//! - **Mouse**: drag, resize, snap to edges, title-bar buttons, dock,
//!   click-to-select with word and line clicks
//! - **Tiling**: split trees per workspace with swap-by-drag
//! - **Copy mode**: vim-style scrollback navigation and yanking
//!
//! # Driving it
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//!
//! let config = termwm::config::Config::load();
//! let mut app = termwm::App::local(&config, 120, 40)?;
//! app.open_window();
//! while !app.should_exit() {
//!     if crossterm::event::poll(Duration::from_millis(16))? {
//!         app.handle_event(crossterm::event::read()?, Instant::now());
//!     }
//!     app.tick(Instant::now());
//! }
//! app.shutdown(app.state().detach_requested);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod app;
pub mod config;
pub mod copymode;
pub mod core;
pub mod logging;
pub mod ui;
pub mod wm;

#[cfg(test)]
pub(crate) mod testing;

pub use app::App;
pub use config::Config;

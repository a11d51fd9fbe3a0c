//! Terminal session plumbing.
//!
//! - **pty**: local pseudo-terminal and shell launch
//! - **term**: VT emulator seam and its `vt100` implementation
//! - **daemon**: channel to sessions hosted by a daemon
//! - **session**: background I/O tasks binding an emulator to a backend
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── VtEmulator (grid, modes, replies)
//! └── Backend
//!     ├── Local: LocalPty + child process
//!     └── Daemon: DaemonChannel + output queue
//! ```

pub mod daemon;
pub mod pty;
pub mod session;
pub mod term;

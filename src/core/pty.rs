//! Local pseudo-terminal wrapper
//!
//! Opens a pseudo-terminal through `portable-pty`, launches a shell on its
//! slave side and exposes the master side for writes and resizes. The read
//! half is handed out separately so the copy loop can own it.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pseudo terminal: {0}")]
    Open(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Failed to take PTY writer: {0}")]
    Writer(String),

    #[error("Failed to clone PTY reader: {0}")]
    Reader(String),

    #[error("Failed to resize pseudo terminal: {0}")]
    Resize(String),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to kill process: {0}")]
    Kill(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Program and arguments launched inside a new pseudo-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Pick the shell: explicit configuration, then `$SHELL`, then the
    /// platform fallback.
    pub fn detect(configured: Option<&str>) -> Self {
        if let Some(shell) = configured.filter(|s| !s.trim().is_empty()) {
            return Self::new(shell);
        }
        if let Ok(shell) = std::env::var("SHELL") {
            if !shell.is_empty() {
                return Self::new(shell);
            }
        }
        if cfg!(windows) {
            Self::new(std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string()))
        } else {
            Self::new("/bin/sh")
        }
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        for arg in &self.args {
            cmd.arg(arg);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.cwd(cwd);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("TERMWM", "1");
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Everything produced by a successful spawn. The reader and child are
/// moved into their own tasks; the `LocalPty` stays with the window.
pub struct SpawnedPty {
    pub pty: LocalPty,
    pub child: Box<dyn Child + Send + Sync>,
    pub reader: Box<dyn Read + Send>,
}

/// Master side of a pseudo-terminal
pub struct LocalPty {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    size: Mutex<PtySize>,
}

/// Open a pseudo-terminal sized `cols` x `rows` and launch `command` in it.
pub fn spawn(cols: u16, rows: u16, command: &ShellCommand) -> Result<SpawnedPty> {
    let size = PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    };

    let pair = native_pty_system()
        .openpty(size)
        .map_err(|e| PtyError::Open(e.to_string()))?;

    let child = pair
        .slave
        .spawn_command(command.to_builder())
        .map_err(|e| PtyError::Spawn(e.to_string()))?;

    // The slave end belongs to the child now
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtyError::Reader(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| PtyError::Writer(e.to_string()))?;

    debug!(program = %command.program, cols, rows, "spawned shell in pty");

    Ok(SpawnedPty {
        pty: LocalPty {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            size: Mutex::new(size),
        },
        child,
        reader,
    })
}

impl LocalPty {
    /// Write bytes to the child. Returns how many bytes the single
    /// underlying write accepted so callers can detect short writes.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock();
        let written = writer.write(data).map_err(PtyError::Write)?;
        writer.flush().map_err(PtyError::Write)?;
        Ok(written)
    }

    /// Resize the pseudo-terminal. Returns whether the cell size changed.
    pub fn resize(&self, cols: u16, rows: u16, cell_pixels: Option<(u16, u16)>) -> Result<bool> {
        let (pixel_width, pixel_height) = match cell_pixels {
            Some((cw, ch)) => (cols.saturating_mul(cw), rows.saturating_mul(ch)),
            None => (0, 0),
        };
        let new_size = PtySize {
            rows: rows.max(1),
            cols: cols.max(1),
            pixel_width,
            pixel_height,
        };

        let mut size = self.size.lock();
        let changed = size.rows != new_size.rows || size.cols != new_size.cols;
        self.master
            .lock()
            .resize(new_size)
            .map_err(|e| PtyError::Resize(e.to_string()))?;
        *size = new_size;
        Ok(changed)
    }

    /// Current size as (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        let size = self.size.lock();
        (size.cols, size.rows)
    }

    /// Ask the foreground job to repaint for its new size.
    #[cfg(unix)]
    pub fn signal_redraw(&self) {
        if let Some(pgrp) = self.master.lock().process_group_leader() {
            // SAFETY: kill(2) with a negative pid signals the process group;
            // a stale group id only yields ESRCH.
            unsafe {
                libc::kill(-pgrp, libc::SIGWINCH);
            }
        }
    }

    #[cfg(not(unix))]
    pub fn signal_redraw(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_configured_shell() {
        let cmd = ShellCommand::detect(Some("/usr/bin/fish"));
        assert_eq!(cmd.program, "/usr/bin/fish");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_detect_ignores_blank_configuration() {
        let cmd = ShellCommand::detect(Some("   "));
        assert!(!cmd.program.trim().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_spawn_and_resize() {
        let cmd = ShellCommand::new("/bin/sh").arg("-c").arg("sleep 1");
        let mut spawned = spawn(80, 24, &cmd).expect("spawn sh");
        assert_eq!(spawned.pty.size(), (80, 24));

        assert!(spawned.pty.resize(100, 30, None).expect("resize"));
        assert!(!spawned.pty.resize(100, 30, Some((8, 16))).expect("resize"));
        assert_eq!(spawned.pty.size(), (100, 30));

        let _ = spawned.child.kill();
        let _ = spawned.child.wait();
    }
}

//! Daemon session channel
//!
//! A daemon-backed window has no local process. Its pseudo-terminal lives in
//! a long-running daemon and the client reaches it through a
//! [`DaemonChannel`]. Output travels the other way through
//! [`DaemonOutput::enqueue`], which feeds the window's serialising writer.

use std::io;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Daemon connection closed")]
    Disconnected,

    #[error("Daemon rejected request: {0}")]
    Rejected(String),

    #[error("Daemon I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Operations a daemon session exposes to the client.
pub trait DaemonChannel: Send + Sync {
    /// Send input bytes to the session. Returns how many were accepted.
    fn write(&self, data: &[u8]) -> Result<usize>;
    fn resize(&self, cols: u16, rows: u16) -> Result<()>;
    /// Detach from the session, leaving it running in the daemon.
    fn close(&self);
    /// Terminate the session inside the daemon.
    fn kill_session(&self) -> Result<()>;
}

/// Producer handle for a daemon-backed window's output queue.
///
/// Cloneable; every clone feeds the same single writer task, so chunks are
/// applied to the emulator in the order they were enqueued.
#[derive(Clone)]
pub struct DaemonOutput {
    session_id: Arc<str>,
    tx: SyncSender<Vec<u8>>,
}

impl DaemonOutput {
    pub(crate) fn new(session_id: &str, tx: SyncSender<Vec<u8>>) -> Self {
        Self {
            session_id: Arc::from(session_id),
            tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue a chunk of PTY output, waiting for room when the queue is full.
    pub fn enqueue(&self, chunk: Vec<u8>) -> Result<()> {
        self.tx.send(chunk).map_err(|_| DaemonError::Disconnected)
    }

    /// Queue a chunk without waiting. Returns the chunk back when full.
    pub fn try_enqueue(&self, chunk: Vec<u8>) -> std::result::Result<(), Vec<u8>> {
        match self.tx.try_send(chunk) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(chunk)) | Err(TrySendError::Disconnected(chunk)) => Err(chunk),
        }
    }
}

/// Connection to the daemon that owns sessions.
pub trait DaemonClient: Send + Sync {
    /// Start a session sized (cols, rows). Returns its id and channel.
    fn create_session(&self, cols: u16, rows: u16) -> Result<(String, Arc<dyn DaemonChannel>)>;
    /// Hand the output queue of a new window to the connection's reader.
    fn attach_output(&self, output: DaemonOutput);
}

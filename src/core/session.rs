//! Terminal session I/O
//!
//! A [`Session`] pairs a VT emulator with either a local pseudo-terminal and
//! child process or a daemon proxy, and runs the background tasks that move
//! bytes between them:
//!
//! - PTY -> emulator copy loop (local)
//! - emulator -> PTY reply loop (carries cursor position reports back)
//! - process exit watcher (local)
//! - serialising output writer (daemon)
//!
//! The PTY handle and the emulator handle each sit behind a read/write lock.
//! Writers (input, resize, close) take the exclusive side; the copy loops
//! take the shared side and bail out once they observe a closed handle.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use portable_pty::Child;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::daemon::{DaemonChannel, DaemonError, DaemonOutput};
use super::pty::{self, LocalPty, PtyError, ShellCommand};
use super::term::{CursorStyle, EmulatorCallbacks, Palette, VtEmulator};

/// How long `close` waits for the I/O tasks to acknowledge cancellation
pub const CLOSE_WAIT: Duration = Duration::from_millis(100);
/// Poll interval of the exit watcher and the channel-driven loops
pub const TASK_POLL: Duration = Duration::from_millis(50);
/// Capacity of a daemon-backed window's output queue
pub const DAEMON_QUEUE: usize = 256;

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("No PTY or daemon write path configured")]
    NoPty,

    #[error("Partial write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },

    #[error("Window unavailable for input")]
    WindowUnavailable,

    #[error("Process has already exited")]
    ProcessGone,

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

pub type Result<T> = std::result::Result<T, WindowError>;

/// State shared between a window, its emulator callbacks and its I/O tasks.
#[derive(Default)]
pub struct WindowSignals {
    pub alt_screen: AtomicBool,
    pub process_exited: AtomicBool,
    output_pending: AtomicBool,
    suppress: AtomicBool,
    title: Mutex<Option<String>>,
    cursor_style: Mutex<Option<CursorStyle>>,
}

impl WindowSignals {
    /// Whether output arrived since the last call
    pub fn take_output(&self) -> bool {
        self.output_pending.swap(false, Ordering::AcqRel)
    }

    pub fn take_title(&self) -> Option<String> {
        self.title.lock().take()
    }

    pub fn take_cursor_style(&self) -> Option<CursorStyle> {
        self.cursor_style.lock().take()
    }

    fn suppressed(&self) -> bool {
        self.suppress.load(Ordering::Acquire)
    }
}

/// Keeps emulator callbacks from touching window state while alive.
pub struct CallbackSuppression<'a> {
    signals: &'a WindowSignals,
    previous: bool,
}

impl Drop for CallbackSuppression<'_> {
    fn drop(&mut self) {
        self.signals.suppress.store(self.previous, Ordering::Release);
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(u32),
    Killed,
    Unknown,
}

/// Local child process plus the one-shot record of its reaping.
///
/// The exit watcher and `close` both reap under the child lock and record
/// the outcome in a once-cell, so the process is waited on exactly once.
pub struct LocalProcess {
    child: Mutex<Box<dyn Child + Send + Sync>>,
    exit: OnceCell<ExitOutcome>,
    pid: Option<u32>,
}

impl LocalProcess {
    fn new(child: Box<dyn Child + Send + Sync>) -> Self {
        let pid = child.process_id();
        Self {
            child: Mutex::new(child),
            exit: OnceCell::new(),
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        self.exit.get().copied()
    }

    /// Non-blocking reap. Returns the outcome if the process has ended.
    fn poll_exit(&self) -> Option<ExitOutcome> {
        let mut child = self.child.lock();
        if let Some(outcome) = self.exit.get() {
            return Some(*outcome);
        }
        match child.try_wait() {
            Ok(Some(status)) => Some(*self.exit.get_or_init(|| ExitOutcome::Exited(status.exit_code()))),
            Ok(None) => None,
            Err(e) => {
                debug!("try_wait failed: {}", e);
                Some(*self.exit.get_or_init(|| ExitOutcome::Unknown))
            }
        }
    }

    /// Kill and reap unless someone already reaped the process.
    fn terminate(&self) -> Result<ExitOutcome> {
        let mut child = self.child.lock();
        if self.exit.get().is_some() {
            return Err(WindowError::ProcessGone);
        }
        if let Err(e) = child.kill() {
            debug!("kill failed, process likely gone: {}", e);
        }
        let outcome = match child.wait() {
            Ok(status) if status.success() => ExitOutcome::Exited(0),
            Ok(_) => ExitOutcome::Killed,
            Err(_) => ExitOutcome::Unknown,
        };
        Ok(*self.exit.get_or_init(|| outcome))
    }
}

/// Daemon-side session reached through callbacks
pub struct DaemonProxy {
    pub session_id: String,
    channel: Arc<dyn DaemonChannel>,
}

/// Where a session's bytes go. Exactly one variant per session.
pub enum Backend {
    /// Emulator only; input has nowhere to go
    Detached,
    Local(Arc<LocalProcess>),
    Daemon(DaemonProxy),
}

/// Construction options shared by local and daemon sessions
#[derive(Clone, Default)]
pub struct SessionOptions {
    pub palette: Option<Palette>,
    /// Cell size in pixels, for pixel-size reports on resize
    pub cell_pixels: Option<(u16, u16)>,
    /// Best-effort channel of window ids whose process exited
    pub exit_tx: Option<SyncSender<String>>,
}

/// Outcome of [`Session::resize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResizeOutcome {
    pub changed: bool,
    pub redraw_signalled: bool,
}

struct TaskSet {
    handles: Vec<JoinHandle<()>>,
    done_rx: Option<Receiver<&'static str>>,
}

pub struct Session {
    window_id: String,
    pty: Arc<RwLock<Option<LocalPty>>>,
    emulator: Arc<RwLock<Option<Box<dyn VtEmulator>>>>,
    backend: Backend,
    signals: Arc<WindowSignals>,
    cancel: Arc<AtomicBool>,
    closed: AtomicBool,
    tasks: Mutex<TaskSet>,
    cell_pixels: Option<(u16, u16)>,
}

impl Session {
    fn with_backend(
        window_id: &str,
        emulator: Box<dyn VtEmulator>,
        pty: Option<LocalPty>,
        backend: Backend,
        options: &SessionOptions,
    ) -> Self {
        let signals = Arc::new(WindowSignals::default());
        install_emulator(&*emulator, &signals, options.palette.clone());
        Self {
            window_id: window_id.to_string(),
            pty: Arc::new(RwLock::new(pty)),
            emulator: Arc::new(RwLock::new(Some(emulator))),
            backend,
            signals,
            cancel: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(TaskSet {
                handles: Vec::new(),
                done_rx: None,
            }),
            cell_pixels: options.cell_pixels,
        }
    }

    /// A session with an emulator but no process behind it
    pub fn detached(window_id: &str, emulator: Box<dyn VtEmulator>) -> Self {
        Self::with_backend(window_id, emulator, None, Backend::Detached, &SessionOptions::default())
    }

    /// Launch `command` in a new pseudo-terminal sized to the emulator.
    pub fn spawn_local(
        window_id: &str,
        emulator: Box<dyn VtEmulator>,
        command: &ShellCommand,
        options: SessionOptions,
    ) -> Result<Self> {
        let (cols, rows) = emulator.size();
        let spawned = pty::spawn(cols, rows, command)?;
        let process = Arc::new(LocalProcess::new(spawned.child));
        info!(window = window_id, pid = ?process.pid(), "local session started");

        let session = Self::with_backend(
            window_id,
            emulator,
            Some(spawned.pty),
            Backend::Local(process),
            &options,
        );

        let (done_tx, done_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(3);
        handles.push(session.spawn_output_loop(spawned.reader, done_tx.clone()));
        if let Some(reply) = session.spawn_reply_loop(done_tx.clone()) {
            handles.push(reply);
        }
        handles.push(session.spawn_exit_watcher(options.exit_tx, done_tx));
        *session.tasks.lock() = TaskSet {
            handles,
            done_rx: Some(done_rx),
        };
        Ok(session)
    }

    /// Attach to a daemon session. Output is pushed through the returned
    /// [`DaemonOutput`] and applied by a single writer task in queue order.
    pub fn spawn_daemon(
        window_id: &str,
        session_id: &str,
        emulator: Box<dyn VtEmulator>,
        channel: Arc<dyn DaemonChannel>,
        options: SessionOptions,
    ) -> (Self, DaemonOutput) {
        let session = Self::with_backend(
            window_id,
            emulator,
            None,
            Backend::Daemon(DaemonProxy {
                session_id: session_id.to_string(),
                channel,
            }),
            &options,
        );
        info!(window = window_id, session = session_id, "daemon session attached");

        let (queue_tx, queue_rx) = mpsc::sync_channel(DAEMON_QUEUE);
        let (done_tx, done_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(2);
        handles.push(session.spawn_daemon_writer(queue_rx, done_tx.clone()));
        if let Some(reply) = session.spawn_reply_loop(done_tx) {
            handles.push(reply);
        }
        *session.tasks.lock() = TaskSet {
            handles,
            done_rx: Some(done_rx),
        };
        (session, DaemonOutput::new(session_id, queue_tx))
    }

    fn spawn_output_loop(
        &self,
        mut reader: Box<dyn Read + Send>,
        done: mpsc::Sender<&'static str>,
    ) -> JoinHandle<()> {
        let emulator = self.emulator.clone();
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();
        let window_id = self.window_id.clone();

        thread::spawn(move || {
            let mut buffer = vec![0u8; 8192];
            loop {
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                let n = match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO once the slave side closes is the normal way out
                        debug!(window = %window_id, "pty read ended: {}", e);
                        break;
                    }
                };
                let guard = emulator.read();
                match guard.as_ref() {
                    Some(emu) => emu.write(&buffer[..n]),
                    None => break,
                }
                signals.output_pending.store(true, Ordering::Release);
            }
            let _ = done.send("output");
        })
    }

    fn spawn_reply_loop(&self, done: mpsc::Sender<&'static str>) -> Option<JoinHandle<()>> {
        let replies = self.emulator.read().as_ref()?.take_responses()?;
        let pty = self.pty.clone();
        let emulator = self.emulator.clone();
        let daemon = match &self.backend {
            Backend::Daemon(proxy) => Some(proxy.channel.clone()),
            _ => None,
        };
        let cancel = self.cancel.clone();

        Some(thread::spawn(move || {
            loop {
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                let reply = match replies.recv_timeout(TASK_POLL) {
                    Ok(reply) => reply,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                let reply = correct_cursor_report(reply, &emulator);
                let delivered = match daemon {
                    Some(ref channel) => channel.write(&reply).is_ok(),
                    None => match pty.read().as_ref() {
                        Some(p) => p.write(&reply).is_ok(),
                        None => false,
                    },
                };
                if !delivered {
                    break;
                }
            }
            let _ = done.send("reply");
        }))
    }

    fn spawn_exit_watcher(
        &self,
        exit_tx: Option<SyncSender<String>>,
        done: mpsc::Sender<&'static str>,
    ) -> JoinHandle<()> {
        let process = match &self.backend {
            Backend::Local(p) => Some(p.clone()),
            _ => None,
        };
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();
        let window_id = self.window_id.clone();

        thread::spawn(move || {
            loop {
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                let Some(ref process) = process else { break };
                if let Some(outcome) = process.poll_exit() {
                    signals.process_exited.store(true, Ordering::Release);
                    info!(window = %window_id, ?outcome, "process exited");
                    if let Some(ref tx) = exit_tx {
                        match tx.try_send(window_id.clone()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(window = %window_id, "exit notification dropped, channel full")
                            }
                            Err(TrySendError::Disconnected(_)) => {
                                debug!(window = %window_id, "exit notification channel closed")
                            }
                        }
                    }
                    break;
                }
                thread::sleep(TASK_POLL);
            }
            let _ = done.send("exit-watcher");
        })
    }

    fn spawn_daemon_writer(
        &self,
        queue: Receiver<Vec<u8>>,
        done: mpsc::Sender<&'static str>,
    ) -> JoinHandle<()> {
        let emulator = self.emulator.clone();
        let signals = self.signals.clone();
        let cancel = self.cancel.clone();

        thread::spawn(move || {
            loop {
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                let chunk = match queue.recv_timeout(TASK_POLL) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                let guard = emulator.read();
                match guard.as_ref() {
                    Some(emu) => emu.write(&chunk),
                    None => break,
                }
                signals.output_pending.store(true, Ordering::Release);
            }
            let _ = done.send("daemon-writer");
        })
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn is_local(&self) -> bool {
        matches!(self.backend, Backend::Local(_))
    }

    pub fn is_daemon(&self) -> bool {
        matches!(self.backend, Backend::Daemon(_))
    }

    pub fn signals(&self) -> &Arc<WindowSignals> {
        &self.signals
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn has_pty(&self) -> bool {
        self.pty.read().is_some()
    }

    pub fn has_emulator(&self) -> bool {
        self.emulator.read().is_some()
    }

    /// Shared access to the emulator, `None` after close
    pub fn emulator(&self) -> RwLockReadGuard<'_, Option<Box<dyn VtEmulator>>> {
        self.emulator.read()
    }

    pub fn with_emulator<R>(&self, f: impl FnOnce(&dyn VtEmulator) -> R) -> Option<R> {
        self.emulator.read().as_deref().map(f)
    }

    /// Disable emulator callbacks until the guard drops, e.g. while
    /// replaying saved state into a fresh emulator.
    pub fn suppress_callbacks(&self) -> CallbackSuppression<'_> {
        let previous = self.signals.suppress.swap(true, Ordering::AcqRel);
        CallbackSuppression {
            signals: &self.signals,
            previous,
        }
    }

    /// Send input to the child through whichever write path exists.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let written = match &self.backend {
            Backend::Local(_) => {
                let guard = self.pty.write();
                let pty = guard.as_ref().ok_or(WindowError::NoPty)?;
                pty.write(data)?
            }
            Backend::Daemon(proxy) => {
                if self.is_closed() {
                    return Err(WindowError::NoPty);
                }
                proxy.channel.write(data)?
            }
            Backend::Detached => return Err(WindowError::NoPty),
        };
        if written < data.len() {
            return Err(WindowError::PartialWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Resize the emulator and the PTY (or the daemon session).
    pub fn resize(&self, cols: u16, rows: u16) -> Result<ResizeOutcome> {
        if let Some(emu) = self.emulator.write().as_ref() {
            emu.resize(cols, rows);
        }

        match &self.backend {
            Backend::Local(_) => {
                let guard = self.pty.write();
                let Some(pty) = guard.as_ref() else {
                    return Ok(ResizeOutcome::default());
                };
                let changed = pty.resize(cols, rows, self.cell_pixels)?;
                if changed {
                    pty.signal_redraw();
                }
                Ok(ResizeOutcome {
                    changed,
                    redraw_signalled: changed,
                })
            }
            Backend::Daemon(proxy) => {
                if !self.is_closed() {
                    proxy.channel.resize(cols, rows)?;
                }
                Ok(ResizeOutcome {
                    changed: true,
                    redraw_signalled: false,
                })
            }
            Backend::Detached => Ok(ResizeOutcome::default()),
        }
    }

    /// Ask a local child to repaint at its current size. Returns whether a
    /// signal went out.
    pub fn signal_redraw(&self) -> bool {
        if self.is_closed() || !matches!(self.backend, Backend::Local(_)) {
            return false;
        }
        match self.pty.read().as_ref() {
            Some(pty) => {
                pty.signal_redraw();
                true
            }
            None => false,
        }
    }

    /// Resize only the emulator grid
    pub fn resize_emulator(&self, cols: u16, rows: u16) {
        if let Some(emu) = self.emulator.write().as_ref() {
            emu.resize(cols, rows);
        }
    }

    /// Terminate the session inside the daemon. Local sessions kill their
    /// child instead.
    pub fn kill(&self) -> Result<()> {
        match &self.backend {
            Backend::Daemon(proxy) => Ok(proxy.channel.kill_session()?),
            Backend::Local(process) => process.terminate().map(|_| ()),
            Backend::Detached => Ok(()),
        }
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        match &self.backend {
            Backend::Local(process) => process.exit_outcome(),
            _ => None,
        }
    }

    /// Tear the session down. Safe to call repeatedly and from several
    /// threads at once.
    pub fn close(&self) {
        let first = !self.closed.swap(true, Ordering::AcqRel);

        // 1. stop the tasks
        self.cancel.store(true, Ordering::Release);

        // 2. drop both handles under the exclusive locks; this unblocks the
        //    loops waiting on them
        {
            let mut pty = self.pty.write();
            let mut emulator = self.emulator.write();
            if let Some(emu) = emulator.take() {
                emu.close();
            }
            pty.take();
        }

        // 3. give the tasks a moment to notice
        self.wait_for_tasks(CLOSE_WAIT);

        // 4. end the child; the one-shot guard keeps this from racing the watcher
        match &self.backend {
            Backend::Local(process) => match process.terminate() {
                Ok(outcome) => debug!(window = %self.window_id, ?outcome, "process terminated"),
                Err(WindowError::ProcessGone) => {}
                Err(e) => warn!(window = %self.window_id, "terminate failed: {}", e),
            },
            Backend::Daemon(proxy) if first => proxy.channel.close(),
            _ => {}
        }

        if first {
            info!(window = %self.window_id, "session closed");
        }
    }

    fn wait_for_tasks(&self, limit: Duration) {
        let mut tasks = self.tasks.lock();
        let expected = tasks.handles.len();
        if let Some(rx) = tasks.done_rx.take() {
            let deadline = Instant::now() + limit;
            let mut acknowledged = 0;
            while acknowledged < expected {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match rx.recv_timeout(remaining) {
                    Ok(task) => {
                        acknowledged += 1;
                        debug!(window = %self.window_id, task, "task stopped");
                    }
                    Err(_) => break,
                }
            }
            if acknowledged < expected {
                debug!(
                    window = %self.window_id,
                    pending = expected - acknowledged,
                    "tasks still running after close wait"
                );
            }
        }
        // Finished tasks are joined implicitly; stragglers are detached and
        // exit once their blocking read returns.
        tasks.handles.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Rewrite a cursor position report (`ESC [ row ; col R`) from the
/// emulator's live cursor. Reports can go stale when the grid is resized
/// between the query and the reply.
fn correct_cursor_report(reply: Vec<u8>, emulator: &RwLock<Option<Box<dyn VtEmulator>>>) -> Vec<u8> {
    if !is_cursor_report(&reply) {
        return reply;
    }
    match emulator.read().as_ref() {
        Some(emu) => {
            let (col, row) = emu.cursor_position();
            format!("\x1b[{};{}R", row + 1, col + 1).into_bytes()
        }
        None => reply,
    }
}

fn is_cursor_report(bytes: &[u8]) -> bool {
    let Some(body) = bytes.strip_prefix(b"\x1b[").and_then(|b| b.strip_suffix(b"R")) else {
        return false;
    };
    let mut parts = body.split(|&b| b == b';');
    let valid = |p: Option<&[u8]>| p.map_or(false, |p| !p.is_empty() && p.iter().all(u8::is_ascii_digit));
    valid(parts.next()) && valid(parts.next()) && parts.next().is_none()
}

/// Apply the theme and register callbacks that route emulator events into
/// the window's shared signals.
fn install_emulator(emulator: &dyn VtEmulator, signals: &Arc<WindowSignals>, palette: Option<Palette>) {
    emulator.set_theme_colors(palette);

    let alt = signals.clone();
    let style = signals.clone();
    let title = signals.clone();
    emulator.set_callbacks(EmulatorCallbacks {
        on_alt_screen: Box::new(move |on| {
            if !alt.suppressed() {
                alt.alt_screen.store(on, Ordering::Release);
            }
        }),
        on_cursor_style: Box::new(move |cs| {
            if !style.suppressed() {
                *style.cursor_style.lock() = Some(cs);
            }
        }),
        on_title: Box::new(move |name| {
            if !title.suppressed() {
                *title.title.lock() = Some(name);
            }
        }),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDaemon, RecordingEmulator};

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_detached_session_has_no_write_path() {
        let emu = RecordingEmulator::new(80, 24);
        let session = Session::detached("w1", emu.boxed());
        assert!(matches!(session.write(b"ls\r"), Err(WindowError::NoPty)));
        assert!(session.write(b"").is_ok());
    }

    #[test]
    fn test_daemon_output_applied_in_order() {
        let emu = RecordingEmulator::new(80, 24);
        let daemon = RecordingDaemon::new();
        let (session, output) =
            Session::spawn_daemon("w1", "s-1", emu.boxed(), daemon.clone(), SessionOptions::default());

        let expected: String = (0..100).map(|i| format!("<{}>", i)).collect();
        for i in 0..100 {
            output.enqueue(format!("<{}>", i).into_bytes()).unwrap();
        }
        assert!(wait_until(|| emu.written_text().len() == expected.len()));
        assert_eq!(emu.written_text(), expected);
        assert!(session.signals().take_output());
        assert!(!session.signals().take_output());
    }

    #[test]
    fn test_daemon_input_and_resize() {
        let emu = RecordingEmulator::new(80, 24);
        let daemon = RecordingDaemon::new();
        let (session, _output) =
            Session::spawn_daemon("w1", "s-1", emu.boxed(), daemon.clone(), SessionOptions::default());

        session.write(b"echo hi\r").unwrap();
        assert_eq!(daemon.input_text(), "echo hi\r");

        session.resize(100, 30).unwrap();
        assert_eq!(*daemon.resizes.lock(), vec![(100, 30)]);
        assert_eq!(emu.state().resizes, vec![(100, 30)]);
    }

    #[test]
    fn test_partial_write_is_reported() {
        let emu = RecordingEmulator::new(80, 24);
        let daemon = RecordingDaemon::new();
        *daemon.accept_limit.lock() = Some(3);
        let (session, _output) =
            Session::spawn_daemon("w1", "s-1", emu.boxed(), daemon, SessionOptions::default());

        match session.write(b"abcdef") {
            Err(WindowError::PartialWrite { written, expected }) => {
                assert_eq!(written, 3);
                assert_eq!(expected, 6);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_replies_reach_daemon() {
        let emu = RecordingEmulator::new(80, 24);
        let daemon = RecordingDaemon::new();
        let (_session, _output) =
            Session::spawn_daemon("w1", "s-1", emu.boxed(), daemon.clone(), SessionOptions::default());

        emu.reply(b"\x1b[0n");
        assert!(wait_until(|| daemon.input_text() == "\x1b[0n"));
    }

    #[test]
    fn test_stale_cursor_report_is_corrected() {
        let emu = RecordingEmulator::new(80, 24);
        emu.state().cursor = (9, 4);
        let daemon = RecordingDaemon::new();
        let (_session, _output) =
            Session::spawn_daemon("w1", "s-1", emu.boxed(), daemon.clone(), SessionOptions::default());

        emu.reply(b"\x1b[1;1R");
        assert!(wait_until(|| daemon.input_text() == "\x1b[5;10R"));
    }

    #[test]
    fn test_cursor_report_detection() {
        assert!(is_cursor_report(b"\x1b[12;40R"));
        assert!(!is_cursor_report(b"\x1b[0n"));
        assert!(!is_cursor_report(b"\x1b[;4R"));
        assert!(!is_cursor_report(b"\x1b[1;2;3R"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let emu = RecordingEmulator::new(80, 24);
        let daemon = RecordingDaemon::new();
        let (session, output) =
            Session::spawn_daemon("w1", "s-1", emu.boxed(), daemon.clone(), SessionOptions::default());

        session.close();
        session.close();

        assert!(session.is_closed());
        assert!(!session.has_emulator());
        assert!(!session.has_pty());
        assert!(emu.is_closed());
        assert_eq!(*daemon.closes.lock(), 1);
        assert!(matches!(session.write(b"x"), Err(WindowError::NoPty)));
        // Late output lands nowhere
        let _ = output.try_enqueue(b"late".to_vec());
        assert!(emu.written_text().is_empty());
    }

    #[test]
    fn test_concurrent_close() {
        let emu = RecordingEmulator::new(80, 24);
        let daemon = RecordingDaemon::new();
        let (session, _output) =
            Session::spawn_daemon("w1", "s-1", emu.boxed(), daemon.clone(), SessionOptions::default());
        let session = Arc::new(session);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let s = session.clone();
                thread::spawn(move || s.close())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*daemon.closes.lock(), 1);
        assert!(!session.has_emulator());
    }

    #[test]
    fn test_callbacks_update_signals_unless_suppressed() {
        let emu = RecordingEmulator::new(80, 24);
        let session = Session::detached("w1", emu.boxed());

        emu.fire_title("vim");
        emu.fire_alt_screen(true);
        assert_eq!(session.signals().take_title().as_deref(), Some("vim"));
        assert!(session.signals().alt_screen.load(Ordering::Acquire));

        {
            let _guard = session.suppress_callbacks();
            emu.fire_alt_screen(false);
            emu.fire_cursor_style(CursorStyle::SteadyBar);
        }
        assert!(session.signals().alt_screen.load(Ordering::Acquire));
        assert_eq!(session.signals().take_cursor_style(), None);

        emu.fire_cursor_style(CursorStyle::SteadyBar);
        assert_eq!(session.signals().take_cursor_style(), Some(CursorStyle::SteadyBar));
    }

    #[test]
    #[cfg(unix)]
    fn test_local_exit_is_reported_once() {
        let emu = RecordingEmulator::new(80, 24);
        let (tx, rx) = mpsc::sync_channel(4);
        let cmd = ShellCommand::new("/bin/sh").arg("-c").arg("printf hello; exit 3");
        let session = Session::spawn_local(
            "w1",
            emu.boxed(),
            &cmd,
            SessionOptions {
                exit_tx: Some(tx),
                ..Default::default()
            },
        )
        .expect("spawn");

        let id = rx.recv_timeout(Duration::from_secs(5)).expect("exit notification");
        assert_eq!(id, "w1");
        assert!(session.signals().process_exited.load(Ordering::Acquire));
        assert_eq!(session.exit_outcome(), Some(ExitOutcome::Exited(3)));
        assert!(wait_until(|| emu.written_text().contains("hello")));

        session.close();
        session.close();
        assert_eq!(session.exit_outcome(), Some(ExitOutcome::Exited(3)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_local_close_kills_running_child() {
        let emu = RecordingEmulator::new(80, 24);
        let cmd = ShellCommand::new("/bin/sh").arg("-c").arg("sleep 30");
        let session =
            Arc::new(Session::spawn_local("w1", emu.boxed(), &cmd, SessionOptions::default()).expect("spawn"));

        session.write(b"\n").unwrap();
        let other = session.clone();
        let t = thread::spawn(move || other.close());
        session.close();
        t.join().unwrap();

        assert!(session.exit_outcome().is_some());
        assert!(matches!(session.write(b"x"), Err(WindowError::NoPty)));
        assert!(matches!(session.kill(), Err(WindowError::ProcessGone)));
    }
}

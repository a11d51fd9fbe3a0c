//! App - the session state, its input router and the housekeeping tick.
//!
//! The embedder feeds every `crossterm` event to [`App::handle_event`],
//! calls [`App::tick`] on a short timer and draws from [`App::state`].

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use crossterm::event::Event;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::daemon::DaemonClient;
use crate::core::pty::ShellCommand;
use crate::core::session::SessionOptions;
use crate::logging::LogBuffer;
use crate::ui::{InputRouter, WindowFactory};
use crate::wm::{Rect, SessionState, TerminalWindow, WindowOptions};

/// Capacity of the process-exit notification channel
pub const EXIT_CHANNEL: usize = 64;

/// Channel on which sessions report the id of a window whose process exited
pub fn exit_channel() -> (SyncSender<String>, Receiver<String>) {
    mpsc::sync_channel(EXIT_CHANNEL)
}

fn window_options(config: &Config, exit_tx: SyncSender<String>) -> anyhow::Result<WindowOptions> {
    Ok(WindowOptions {
        scrollback: config.terminal.scrollback,
        session: SessionOptions {
            palette: config.theme.to_palette().context("theme")?,
            cell_pixels: config.cell_pixels(),
            exit_tx: Some(exit_tx),
        },
    })
}

/// Opens windows on local pseudo-terminals running the configured shell
pub struct LocalFactory {
    command: ShellCommand,
    options: WindowOptions,
}

impl LocalFactory {
    pub fn new(config: &Config, exit_tx: SyncSender<String>) -> anyhow::Result<Self> {
        Ok(Self {
            command: ShellCommand::detect(config.shell.as_deref()),
            options: window_options(config, exit_tx)?,
        })
    }
}

impl WindowFactory for LocalFactory {
    fn create(&mut self, id: &str, rect: Rect) -> anyhow::Result<TerminalWindow> {
        TerminalWindow::spawn_local(id, rect, &self.command, &self.options)
            .with_context(|| format!("launching {}", self.command.program))
    }
}

/// Opens windows on sessions hosted by a daemon
pub struct DaemonFactory {
    client: Arc<dyn DaemonClient>,
    options: WindowOptions,
}

impl DaemonFactory {
    pub fn new(config: &Config, client: Arc<dyn DaemonClient>, exit_tx: SyncSender<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            options: window_options(config, exit_tx)?,
        })
    }
}

impl WindowFactory for DaemonFactory {
    fn create(&mut self, id: &str, rect: Rect) -> anyhow::Result<TerminalWindow> {
        let (cols, rows) = rect.interior();
        let (session_id, channel) = self
            .client
            .create_session(cols, rows)
            .context("creating daemon session")?;
        let (window, output) = TerminalWindow::spawn_daemon(id, &session_id, rect, channel, &self.options);
        self.client.attach_output(output);
        Ok(window)
    }
}

pub struct App {
    state: SessionState,
    router: InputRouter,
    exits: Receiver<String>,
    close_on_exit: bool,
    logs: Option<LogBuffer>,
}

impl App {
    /// Windows run the configured shell locally
    pub fn local(config: &Config, width: u16, height: u16) -> anyhow::Result<Self> {
        let (tx, rx) = exit_channel();
        let factory = LocalFactory::new(config, tx)?;
        Ok(Self::with_factory(config, width, height, Box::new(factory), rx))
    }

    /// Windows attach to sessions created through `client`
    pub fn daemon(config: &Config, width: u16, height: u16, client: Arc<dyn DaemonClient>) -> anyhow::Result<Self> {
        let (tx, rx) = exit_channel();
        let factory = DaemonFactory::new(config, client, tx)?;
        Ok(Self::with_factory(config, width, height, Box::new(factory), rx))
    }

    pub fn with_factory(
        config: &Config,
        width: u16,
        height: u16,
        factory: Box<dyn WindowFactory>,
        exits: Receiver<String>,
    ) -> Self {
        let mut state = SessionState::new(width, height);
        state.dock_position = config.dock.position;
        Self {
            state,
            router: InputRouter::new(config, factory),
            exits,
            close_on_exit: config.window.close_on_exit,
            logs: None,
        }
    }

    /// Attach the ring the log viewer shows
    pub fn with_logs(mut self, logs: LogBuffer) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn router(&self) -> &InputRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut InputRouter {
        &mut self.router
    }

    pub fn logs(&self) -> Option<&LogBuffer> {
        self.logs.as_ref()
    }

    /// Quit or detach was requested
    pub fn should_exit(&self) -> bool {
        self.state.quit_requested || self.state.detach_requested
    }

    pub fn handle_event(&mut self, event: Event, now: Instant) -> bool {
        self.router.handle_event(&mut self.state, event, now)
    }

    pub fn open_window(&mut self) -> Option<String> {
        self.router.new_window(&mut self.state)
    }

    /// Housekeeping between events. Returns whether anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = self
            .state
            .expire_prefix(now, self.router.settings().prefix_timeout);
        changed |= self.state.run_deferred(now) > 0;
        for window in self.state.windows.iter_mut() {
            changed |= window.poll();
        }
        changed |= self.reap_exited();
        if changed {
            self.state.needs_redraw = true;
        }
        changed
    }

    /// Windows whose process ended, from the notification channel and from
    /// the flags the exit watcher sets
    fn reap_exited(&mut self) -> bool {
        let mut exited = HashSet::new();
        loop {
            match self.exits.try_recv() {
                Ok(id) => {
                    exited.insert(id);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        for window in self.state.windows.iter_mut() {
            if exited.contains(&window.id) {
                window.process_exited = true;
            }
            if window.process_exited {
                exited.insert(window.id.clone());
            }
        }
        if !self.close_on_exit || exited.is_empty() {
            return false;
        }

        let mut closed = false;
        for id in exited {
            debug!(window = %id, "process exited");
            closed |= self.router.close_window(&mut self.state, &id, false);
        }
        closed
    }

    /// Escape sequences every window wants passed to the host terminal
    pub fn take_host_sequences(&mut self) -> Vec<u8> {
        self.state
            .windows
            .iter_mut()
            .flat_map(|w| w.take_host_sequences())
            .collect()
    }

    /// Close every window. Detaching leaves daemon sessions running.
    pub fn shutdown(&mut self, detach: bool) {
        let ids: Vec<String> = self.state.windows.iter().map(|w| w.id.clone()).collect();
        info!(windows = ids.len(), detach, "shutting down");
        for id in ids {
            self.router.close_window(&mut self.state, &id, !detach);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::daemon::{self, DaemonChannel, DaemonOutput};
    use crate::testing::{self, DetachedFactory, RecordingDaemon, RecordingEmulator};
    use crate::wm::Mode;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn app_with(config: &Config) -> (App, SyncSender<String>) {
        let (tx, rx) = exit_channel();
        let app = App::with_factory(config, 120, 40, Box::new(DetachedFactory::default()), rx);
        (app, tx)
    }

    fn key(c: char) -> Event {
        Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
    }

    #[test]
    fn test_exited_window_is_closed() {
        let (mut app, tx) = app_with(&Config::default());
        let now = Instant::now();
        app.handle_event(key('n'), now);
        app.handle_event(key('n'), now);
        let first = app.state().windows[0].id.clone();

        tx.send(first.clone()).unwrap();
        assert!(app.tick(now));
        assert_eq!(app.state().windows.len(), 1);
        assert!(app.state().window(&first).is_none());
        assert!(!app.tick(now));
    }

    #[test]
    fn test_exited_window_kept_without_close_on_exit() {
        let mut config = Config::default();
        config.window.close_on_exit = false;
        let (mut app, tx) = app_with(&config);
        let now = Instant::now();
        let id = app.open_window().unwrap();

        tx.send(id.clone()).unwrap();
        app.tick(now);
        assert!(app.state().window(&id).unwrap().process_exited);
    }

    #[test]
    fn test_tick_runs_deferred_work() {
        let (mut app, _tx) = app_with(&Config::default());
        let t0 = Instant::now();
        app.open_window();
        app.handle_event(key('m'), t0);
        assert!(app.state().windows[0].minimizing);

        app.tick(t0 + Duration::from_millis(50));
        assert!(app.state().windows[0].minimizing);
        app.tick(t0 + Duration::from_millis(250));
        assert!(!app.state().windows[0].minimizing);
        assert!(app.state().windows[0].minimized);
    }

    #[test]
    fn test_tick_expires_prefix() {
        let (mut app, _tx) = app_with(&Config::default());
        let t0 = Instant::now();
        app.handle_event(Event::Key(KeyEvent::new(KeyCode::Char('b'), KeyModifiers::CONTROL)), t0);
        assert!(app.state().prefix.is_active());
        assert!(app.tick(t0 + Duration::from_secs(3)));
        assert!(!app.state().prefix.is_active());
    }

    #[test]
    fn test_shutdown_detach_keeps_daemon_sessions() {
        let (mut app, _tx) = app_with(&Config::default());
        let emu = RecordingEmulator::new(78, 22);
        let (win, daemon, _output) = testing::daemon_window("w1", Rect::new(0, 0, 80, 24), &emu);
        app.state_mut().add_window(win);
        app.state_mut().enter_terminal_mode(Instant::now());

        app.shutdown(true);
        assert!(app.state().windows.is_empty());
        assert_eq!(*daemon.kills.lock(), 0);
        assert_eq!(*daemon.closes.lock(), 1);
        assert_eq!(app.state().mode, Mode::WindowManagement);
    }

    #[test]
    fn test_shutdown_quit_kills_daemon_sessions() {
        let (mut app, _tx) = app_with(&Config::default());
        let emu = RecordingEmulator::new(78, 22);
        let (win, daemon, _output) = testing::daemon_window("w1", Rect::new(0, 0, 80, 24), &emu);
        app.state_mut().add_window(win);

        app.shutdown(false);
        assert_eq!(*daemon.kills.lock(), 1);
    }

    #[derive(Default)]
    struct FakeClient {
        channel: Arc<RecordingDaemon>,
        outputs: Mutex<Vec<DaemonOutput>>,
        sizes: Mutex<Vec<(u16, u16)>>,
    }

    impl DaemonClient for FakeClient {
        fn create_session(&self, cols: u16, rows: u16) -> daemon::Result<(String, Arc<dyn DaemonChannel>)> {
            self.sizes.lock().push((cols, rows));
            let channel: Arc<dyn DaemonChannel> = self.channel.clone();
            Ok(("s-1".to_string(), channel))
        }

        fn attach_output(&self, output: DaemonOutput) {
            self.outputs.lock().push(output);
        }
    }

    #[test]
    fn test_daemon_app_routes_input_to_session() {
        let client = Arc::new(FakeClient::default());
        let mut app = App::daemon(&Config::default(), 120, 40, client.clone()).unwrap();
        let t0 = Instant::now();

        app.open_window().unwrap();
        assert_eq!(*client.sizes.lock(), vec![(78, 22)]);
        assert_eq!(client.outputs.lock()[0].session_id(), "s-1");

        app.handle_event(Event::Key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)), t0);
        assert_eq!(app.state().mode, Mode::Terminal);
        app.handle_event(key('l'), t0 + Duration::from_secs(1));
        assert_eq!(client.channel.input_text(), "l");
        assert!(!app.should_exit());
    }
}

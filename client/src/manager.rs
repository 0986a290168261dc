use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, trace, warn};

use chatchime_common::config::{ConnectionConfig, ListenerSettings};
use chatchime_common::protocol::{
    LineFramer, Message, chat_line, classify, is_disconnect, pong_line,
};
use chatchime_common::trigger::{TriggerTable, match_trigger};

use crate::action::ActionBackend;
use crate::backoff::Backoff;
use crate::connection::Connection;
use crate::dispatch::ActionDispatcher;
use crate::error::ListenerError;
use crate::observer::{Observer, notify};

/// Bytes read from the socket per call.
const RECV_BUF_SIZE: usize = 4096;
/// Outgoing chat messages waiting for a live connection.
const OUTBOX_CAPACITY: usize = 32;

/// Lifecycle of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    /// Connecting, or waiting out a reconnect delay.
    Connecting = 1,
    Connected = 2,
    /// `stop()` was requested and the run loop has not exited yet.
    Stopping = 3,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Keeps one chat connection alive, reconnecting with exponential backoff,
/// and turns trigger matches into dispatched actions.
///
/// All methods take `&self`; share the manager behind an `Arc` to stop it from
/// another thread.
pub struct ConnectionManager {
    config: ConnectionConfig,
    settings: ListenerSettings,
    triggers: Arc<TriggerTable>,
    backend: Arc<dyn ActionBackend>,
    observer: Arc<dyn Observer>,
    outbox_tx: Sender<String>,
    outbox_rx: Receiver<String>,
    run: Mutex<Option<RunHandle>>,
}

/// Handles to one run of the loop thread.
struct RunHandle {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    /// Dropped by `stop()` to cut a backoff sleep short.
    wake: Option<Sender<()>>,
    /// Disconnects when the loop thread exits.
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    fn finished(&self) -> bool {
        matches!(
            self.done.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[listener] Run loop thread panicked");
            }
        }
    }
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        settings: ListenerSettings,
        triggers: TriggerTable,
        backend: Arc<dyn ActionBackend>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let (outbox_tx, outbox_rx) = crossbeam_channel::bounded(OUTBOX_CAPACITY);
        Self {
            config,
            settings,
            triggers: Arc::new(triggers),
            backend,
            observer,
            outbox_tx,
            outbox_rx,
            run: Mutex::new(None),
        }
    }

    fn run_slot(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the run loop on its own thread. Returns immediately.
    ///
    /// Only valid from `Stopped`. An incomplete configuration is not an error
    /// here: the loop reports it through [`Observer::on_error`] and keeps
    /// retrying on the backoff timer.
    pub fn start(&self) -> Result<(), ListenerError> {
        let mut slot = self.run_slot();
        if let Some(run) = slot.as_mut() {
            if !run.finished() {
                return Err(ListenerError::AlreadyRunning);
            }
            // A run that outlived an earlier stop() timeout has since exited.
            run.join();
            *slot = None;
        }

        // Messages queued for an earlier run are stale.
        while self.outbox_rx.try_recv().is_ok() {}

        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(RunState::Connecting as u8));
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let dispatcher = ActionDispatcher::spawn(self.backend.clone(), self.observer.clone())
            .map_err(ListenerError::Spawn)?;

        let mut run_loop = RunLoop {
            config: self.config.clone(),
            settings: self.settings,
            triggers: self.triggers.clone(),
            observer: self.observer.clone(),
            dispatcher,
            outbox: self.outbox_rx.clone(),
            stop: stop.clone(),
            state: state.clone(),
            wake: wake_rx,
            backoff: Backoff::new(self.settings.min_backoff, self.settings.max_backoff),
            framer: LineFramer::new(),
        };

        let thread = std::thread::Builder::new()
            .name("chat_listener".into())
            .spawn(move || {
                let _done = done_tx;
                run_loop.run();
            })
            .map_err(ListenerError::Spawn)?;

        *slot = Some(RunHandle {
            stop,
            state,
            wake: Some(wake_tx),
            done: done_rx,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Ask the run loop to exit and wait up to `stop_timeout` for it.
    ///
    /// No-op when already stopped; safe to call repeatedly and from any thread.
    /// If the loop does not exit in time, the manager stays in `Stopping` and a
    /// later `stop()` waits again.
    pub fn stop(&self) {
        let (stop_flag, done) = {
            let mut slot = self.run_slot();
            let Some(run) = slot.as_mut() else {
                return;
            };
            run.stop.store(true, Ordering::SeqCst);
            run.wake.take();
            (run.stop.clone(), run.done.clone())
        };

        let exited = !matches!(
            done.recv_timeout(self.settings.stop_timeout),
            Err(RecvTimeoutError::Timeout)
        );

        let mut slot = self.run_slot();
        if !exited {
            let msg = format!(
                "Listener did not stop within {:?}",
                self.settings.stop_timeout
            );
            warn!("[listener] {msg}");
            notify("on_log", || self.observer.on_log(&msg));
            return;
        }
        // Only reap the run this call stopped; a concurrent start() may have replaced it.
        if slot
            .as_ref()
            .is_some_and(|run| Arc::ptr_eq(&run.stop, &stop_flag))
        {
            if let Some(mut run) = slot.take() {
                run.join();
            }
        }
    }

    pub fn state(&self) -> RunState {
        match self.run_slot().as_ref() {
            None => RunState::Stopped,
            Some(run) => {
                let raw = RunState::from_u8(run.state.load(Ordering::SeqCst));
                if run.stop.load(Ordering::SeqCst) && raw != RunState::Stopped {
                    RunState::Stopping
                } else {
                    raw
                }
            }
        }
    }

    /// Queue a chat message for the joined channel.
    ///
    /// Sent as soon as a connection is up; queued messages survive reconnects
    /// but not `stop()`.
    pub fn say(&self, text: &str) -> Result<(), ListenerError> {
        if matches!(self.state(), RunState::Stopped | RunState::Stopping) {
            return Err(ListenerError::NotRunning);
        }
        match self.outbox_tx.try_send(text.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ListenerError::OutboxFull),
            Err(TrySendError::Disconnected(_)) => Err(ListenerError::NotRunning),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Stopped,
    Lost(String),
}

/// State owned by the loop thread.
struct RunLoop {
    config: ConnectionConfig,
    settings: ListenerSettings,
    triggers: Arc<TriggerTable>,
    observer: Arc<dyn Observer>,
    dispatcher: ActionDispatcher,
    outbox: Receiver<String>,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    wake: Receiver<()>,
    backoff: Backoff,
    framer: LineFramer,
}

impl RunLoop {
    fn run(&mut self) {
        self.notify_state(RunState::Connecting);

        while !self.stopping() {
            self.set_state(RunState::Connecting);
            self.log(&format!(
                "Connecting to {}:{}...",
                self.config.server_host, self.config.server_port
            ));

            match Connection::open(&self.config, &self.settings) {
                Ok(conn) => {
                    self.backoff.reset();
                    self.set_state(RunState::Connected);
                    self.log(&format!(
                        "Connected to #{} as {}",
                        self.config.channel, self.config.nickname
                    ));
                    match self.session(conn) {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(reason) => {
                            self.log(&format!("Connection lost: {reason}"));
                        }
                    }
                }
                Err(e) => self.report(&e),
            }

            if self.stopping() {
                break;
            }
            self.set_state(RunState::Connecting);
            let delay = self.backoff.fail();
            self.log(&format!("Reconnecting in {delay:?}..."));
            if self.sleep(delay) {
                break;
            }
        }

        self.set_state(RunState::Stopped);
        self.log("Listener stopped");
    }

    /// Receive until the connection drops or a stop is requested.
    fn session(&mut self, mut conn: Connection) -> SessionEnd {
        self.framer.clear();
        let mut buf = [0u8; RECV_BUF_SIZE];

        let end = loop {
            if self.stopping() {
                break SessionEnd::Stopped;
            }
            if let Err(e) = self.flush_outbox(&mut conn) {
                break SessionEnd::Lost(format!("send failed: {e}"));
            }
            match conn.read_chunk(&mut buf) {
                Ok(None) => continue,
                Ok(Some(0)) => break SessionEnd::Lost("closed by server".into()),
                Ok(Some(n)) => {
                    if let Err(e) = self.handle_bytes(&mut conn, &buf[..n]) {
                        break SessionEnd::Lost(format!("send failed: {e}"));
                    }
                }
                Err(e) if is_disconnect(&e) => {
                    break SessionEnd::Lost(format!("disconnected by peer ({e})"));
                }
                Err(e) => break SessionEnd::Lost(e.to_string()),
            }
        };

        conn.shutdown();
        end
    }

    fn flush_outbox(&self, conn: &mut Connection) -> io::Result<()> {
        while let Ok(text) = self.outbox.try_recv() {
            conn.send_line(&chat_line(&self.config.channel, &text))?;
            debug!("[listener] Sent chat message ({} bytes)", text.len());
        }
        Ok(())
    }

    fn handle_bytes(&mut self, conn: &mut Connection, bytes: &[u8]) -> io::Result<()> {
        for line in self.framer.feed(bytes) {
            if line.is_empty() {
                continue;
            }
            self.handle_line(conn, &line)?;
        }
        let discarded = self.framer.take_discarded();
        if discarded > 0 {
            warn!("[listener] Dropped {discarded} bytes of an oversized line");
        }
        Ok(())
    }

    /// Handle one complete line. Only a failed `PONG` write is an error; a
    /// panic while processing the line drops that line alone.
    fn handle_line(&self, conn: &mut Connection, line: &str) -> io::Result<()> {
        let message = match catch_unwind(|| classify(line)) {
            Ok(message) => message,
            Err(_) => {
                warn!("[listener] Panic while parsing a line, skipping it");
                return Ok(());
            }
        };

        match message {
            Message::Ping => {
                conn.send_line(&pong_line(&self.config.server_host))?;
                debug!("[listener] Answered PING");
            }
            Message::Chat { sender, text } => {
                if catch_unwind(AssertUnwindSafe(|| self.handle_chat(&sender, &text))).is_err() {
                    warn!("[listener] Panic while handling a message from {sender}, skipping it");
                }
            }
            Message::Other => trace!("[listener] {line}"),
        }
        Ok(())
    }

    fn handle_chat(&self, sender: &str, text: &str) {
        notify("on_chat", || self.observer.on_chat(sender, text));

        let Some(action) = match_trigger(text, &self.triggers) else {
            return;
        };
        notify("on_trigger", || self.observer.on_trigger(sender, text));
        self.log(&format!("Trigger from {sender}, playing {action}"));
        self.dispatcher.dispatch(action);
    }

    fn report(&self, e: &ListenerError) {
        if e.is_config() {
            error!("[listener] {e}");
        } else {
            debug!("[listener] Connect failed: {e}");
        }
        self.log(&format!("Connect failed: {e}"));
        notify("on_error", || self.observer.on_error(e));
    }

    /// Sleep for `delay` unless woken. Returns true if the loop should exit.
    fn sleep(&self, delay: Duration) -> bool {
        match self.wake.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => self.stopping(),
            _ => true,
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: RunState) {
        let previous = self.state.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            self.notify_state(state);
        }
    }

    fn notify_state(&self, state: RunState) {
        debug!("[listener] State: {state:?}");
        notify("on_state", || self.observer.on_state(state));
    }

    fn log(&self, message: &str) {
        notify("on_log", || self.observer.on_log(message));
    }
}

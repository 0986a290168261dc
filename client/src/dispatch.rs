use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

use crate::action::ActionBackend;
use crate::observer::{Observer, notify};

/// Actions waiting to play. Beyond this, new actions are dropped rather than
/// stalling the caller.
pub const QUEUE_CAPACITY: usize = 16;

/// Fire-and-forget front end to an [`ActionBackend`].
///
/// Actions run one at a time on a dedicated worker thread, so a single output
/// device never plays two sounds at once. `dispatch` only enqueues. A failing
/// or panicking action is reported through the observer and the worker moves
/// on to the next one.
pub struct ActionDispatcher {
    tx: Sender<String>,
    backend_name: &'static str,
    observer: Arc<dyn Observer>,
    /// Actions dropped since the queue was last accepting.
    dropped: AtomicUsize,
}

impl ActionDispatcher {
    /// Start the worker thread. It exits once the dispatcher is dropped and the
    /// queue has drained.
    pub fn spawn(
        backend: Arc<dyn ActionBackend>,
        observer: Arc<dyn Observer>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<String>(QUEUE_CAPACITY);
        let backend_name = backend.name();
        let worker_observer = observer.clone();

        std::thread::Builder::new()
            .name("action_dispatch".into())
            .spawn(move || {
                for action in rx.iter() {
                    run_action(backend.as_ref(), worker_observer.as_ref(), &action);
                }
                debug!("[dispatch] Worker exiting");
            })?;

        Ok(Self {
            tx,
            backend_name,
            observer,
            dropped: AtomicUsize::new(0),
        })
    }

    /// Queue `action` and return immediately.
    ///
    /// While the queue is full only the first drop is logged; the total is
    /// reported once the queue accepts actions again.
    pub fn dispatch(&self, action: &str) {
        match self.tx.try_send(action.to_string()) {
            Ok(()) => {
                debug!("[dispatch] Queued {action} on {}", self.backend_name);
                let dropped = self.dropped.swap(0, Ordering::Relaxed);
                if dropped > 0 {
                    self.log(&format!("Action queue was full, dropped {dropped} action(s)"));
                }
            }
            Err(TrySendError::Full(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    self.log(&format!("Action queue full, dropping {action}"));
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.log(&format!("Action worker stopped, dropping {action}"));
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    fn log(&self, msg: &str) {
        warn!("[dispatch] {msg}");
        notify("on_log", || self.observer.on_log(msg));
    }
}

fn run_action(backend: &dyn ActionBackend, observer: &dyn Observer, action: &str) {
    let outcome = catch_unwind(AssertUnwindSafe(|| backend.perform(action)));
    let msg = match outcome {
        Ok(Ok(())) => {
            debug!("[dispatch] Played {action}");
            return;
        }
        Ok(Err(e)) => format!("Failed to play {action}: {e}"),
        Err(_) => format!("Failed to play {action}: {} backend panicked", backend.name()),
    };
    warn!("[dispatch] {msg}");
    notify("on_log", || observer.on_log(&msg));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingBackend, GatedBackend, RecordingBackend, RecordingObserver};
    use std::time::{Duration, Instant};

    #[test]
    fn actions_run_in_dispatch_order() {
        let backend = Arc::new(RecordingBackend::default());
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = ActionDispatcher::spawn(backend.clone(), observer).unwrap();

        dispatcher.dispatch("a.wav");
        dispatcher.dispatch("b.wav");
        dispatcher.dispatch("c.wav");

        assert!(backend.wait_for(3, Duration::from_secs(2)));
        assert_eq!(backend.performed(), ["a.wav", "b.wav", "c.wav"]);
    }

    #[test]
    fn failure_is_logged_and_next_action_still_runs() {
        let backend = Arc::new(FailingBackend::new(["missing.wav"]));
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = ActionDispatcher::spawn(backend.clone(), observer.clone()).unwrap();

        dispatcher.dispatch("missing.wav");
        dispatcher.dispatch("ok.wav");

        assert!(backend.recorder.wait_for(1, Duration::from_secs(2)));
        assert_eq!(backend.recorder.performed(), ["ok.wav"]);
        assert!(observer.wait_for_log("Failed to play missing.wav", Duration::from_secs(2)));
    }

    #[test]
    fn panicking_backend_does_not_kill_worker() {
        let backend = Arc::new(FailingBackend::panicking(["boom.wav"]));
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = ActionDispatcher::spawn(backend.clone(), observer.clone()).unwrap();

        dispatcher.dispatch("boom.wav");
        dispatcher.dispatch("after.wav");

        assert!(backend.recorder.wait_for(1, Duration::from_secs(2)));
        assert!(observer.wait_for_log("backend panicked", Duration::from_secs(2)));
    }

    #[test]
    fn dispatch_never_waits_for_a_stalled_backend() {
        let backend = Arc::new(GatedBackend::default());
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = ActionDispatcher::spawn(backend.clone(), observer.clone()).unwrap();

        // The worker takes the first action and stalls on it.
        dispatcher.dispatch("first.wav");
        assert!(backend.wait_entered(1, Duration::from_secs(2)));

        let start = Instant::now();
        for i in 0..QUEUE_CAPACITY + 3 {
            dispatcher.dispatch(&format!("{i}.wav"));
        }
        assert!(start.elapsed() < Duration::from_millis(500));

        let full_logs = observer
            .logs()
            .iter()
            .filter(|l| l.starts_with("Action queue full"))
            .count();
        assert_eq!(full_logs, 1);
        assert!(observer.has_log(&format!("dropping {QUEUE_CAPACITY}.wav")));

        backend.release();
        assert!(backend.recorder.wait_for(QUEUE_CAPACITY + 1, Duration::from_secs(2)));

        dispatcher.dispatch("after.wav");
        assert!(observer.has_log("Action queue was full, dropped 3 action(s)"));
        assert!(backend.recorder.wait_for(QUEUE_CAPACITY + 2, Duration::from_secs(2)));
    }
}

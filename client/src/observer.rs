use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{info, warn};

use crate::error::ListenerError;
use crate::manager::RunState;

/// Hooks through which the listener reports what it is doing.
///
/// Called from the receive loop (and, for action failures, from the dispatcher
/// thread). Implementations must return quickly. A panic inside a hook is caught
/// and logged; it never stops the listener.
pub trait Observer: Send + Sync {
    /// Lifecycle and error messages: connects, disconnects, backoff delays,
    /// action failures.
    fn on_log(&self, message: &str);

    /// A chat message matched a trigger. Runs before the action is dispatched.
    fn on_trigger(&self, sender: &str, text: &str);

    /// Every chat message, matched or not.
    fn on_chat(&self, _sender: &str, _text: &str) {}

    fn on_state(&self, _state: RunState) {}

    /// Typed form of a failed connect attempt, so callers can tell a bad
    /// configuration apart from a network problem.
    fn on_error(&self, _error: &ListenerError) {}
}

/// Observer that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_log(&self, message: &str) {
        info!("{message}");
    }

    fn on_trigger(&self, sender: &str, text: &str) {
        info!("*** Trigger from {sender}: {text} ***");
    }

    fn on_chat(&self, sender: &str, text: &str) {
        info!("{sender}: {text}");
    }
}

/// Run an observer hook, containing any panic it raises.
pub(crate) fn notify(hook: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("[listener] Observer {hook} hook panicked");
    }
}

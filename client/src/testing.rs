//! Test doubles shared by the unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::action::{ActionBackend, ActionError};
use crate::error::ListenerError;
use crate::manager::RunState;
use crate::observer::Observer;

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    logs: Mutex<Vec<String>>,
    triggers: Mutex<Vec<(String, String)>>,
    chats: Mutex<Vec<(String, String)>>,
    states: Mutex<Vec<RunState>>,
    /// (is_config, message)
    errors: Mutex<Vec<(bool, String)>>,
}

impl RecordingObserver {
    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    pub fn triggers(&self) -> Vec<(String, String)> {
        self.triggers.lock().unwrap().clone()
    }

    pub fn chats(&self) -> Vec<(String, String)> {
        self.chats.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<RunState> {
        self.states.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(bool, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn has_log(&self, needle: &str) -> bool {
        self.logs.lock().unwrap().iter().any(|l| l.contains(needle))
    }

    pub fn wait_for_log(&self, needle: &str, timeout: Duration) -> bool {
        wait_until(timeout, || self.has_log(needle))
    }

    /// Wait until `state` has been entered at least `times` times.
    pub fn wait_for_state(&self, state: RunState, times: usize, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.states.lock().unwrap().iter().filter(|s| **s == state).count() >= times
        })
    }

    pub fn wait_for_chats(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.chats.lock().unwrap().len() >= count)
    }
}

impl Observer for RecordingObserver {
    fn on_log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }

    fn on_trigger(&self, sender: &str, text: &str) {
        self.triggers
            .lock()
            .unwrap()
            .push((sender.to_string(), text.to_string()));
    }

    fn on_chat(&self, sender: &str, text: &str) {
        self.chats
            .lock()
            .unwrap()
            .push((sender.to_string(), text.to_string()));
    }

    fn on_state(&self, state: RunState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_error(&self, error: &ListenerError) {
        self.errors
            .lock()
            .unwrap()
            .push((error.is_config(), error.to_string()));
    }
}

/// Backend that records every action it is asked to perform.
#[derive(Default)]
pub struct RecordingBackend {
    performed: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn performed(&self) -> Vec<String> {
        self.performed.lock().unwrap().clone()
    }

    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.performed.lock().unwrap().len() >= count)
    }
}

impl ActionBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn perform(&self, action: &str) -> Result<(), ActionError> {
        self.performed.lock().unwrap().push(action.to_string());
        Ok(())
    }
}

/// Backend that fails (or panics) on selected actions and records the rest.
pub struct FailingBackend {
    fail_on: Vec<String>,
    panic: bool,
    pub recorder: RecordingBackend,
}

impl FailingBackend {
    pub fn new<'a>(fail_on: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            fail_on: fail_on.into_iter().map(str::to_string).collect(),
            panic: false,
            recorder: RecordingBackend::default(),
        }
    }

    pub fn panicking<'a>(fail_on: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            panic: true,
            ..Self::new(fail_on)
        }
    }
}

impl ActionBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn perform(&self, action: &str) -> Result<(), ActionError> {
        if self.fail_on.iter().any(|a| a == action) {
            if self.panic {
                panic!("simulated backend panic on {action}");
            }
            return Err(ActionError::NotFound(action.into()));
        }
        self.recorder.perform(action)
    }
}

/// Backend whose actions block until `release` is called, like a stalled device.
#[derive(Default)]
pub struct GatedBackend {
    open: AtomicBool,
    entered: AtomicUsize,
    pub recorder: RecordingBackend,
}

impl GatedBackend {
    pub fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Wait until `count` actions have started (and possibly blocked).
    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.entered.load(Ordering::SeqCst) >= count)
    }
}

impl ActionBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn perform(&self, action: &str) -> Result<(), ActionError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.recorder.perform(action)
    }
}

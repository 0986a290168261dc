use std::path::{Path, PathBuf};

/// Why an action (sound) could not be performed.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("sound file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported sound file: {0}")]
    Unsupported(String),

    #[error("decoding sound file: {0}")]
    Decode(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("{program} exited with {status}")]
    Player { program: String, status: String },

    #[error("no audio backend available")]
    Unavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Trait abstracting the action performed when a trigger fires. Enables
/// mock-based testing without an audio device.
///
/// `perform` may block until the action completes; the dispatcher calls it
/// off the receive loop.
pub trait ActionBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn perform(&self, action: &str) -> Result<(), ActionError>;
}

/// Fail with `NotFound` unless `action` names an existing file.
pub fn existing_file(action: &str) -> Result<&Path, ActionError> {
    let path = Path::new(action);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ActionError::NotFound(path.to_path_buf()))
    }
}

/// Backend used when no audio output could be found. Every action reports
/// `Unavailable`, so the user sees why nothing plays.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl ActionBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn perform(&self, _action: &str) -> Result<(), ActionError> {
        Err(ActionError::Unavailable)
    }
}

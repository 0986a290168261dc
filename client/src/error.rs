use chatchime_common::error::ConfigError;

/// Failures surfaced by the connection manager.
///
/// Only `Config` and `Transport` occur inside the run loop; both lead to a
/// backoff-and-retry, never to the loop exiting.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("could not resolve {host}")]
    Resolve { host: String },

    #[error("listener is already running")]
    AlreadyRunning,

    #[error("listener is not running")]
    NotRunning,

    #[error("outgoing message queue is full")]
    OutboxFull,

    #[error("spawning listener thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl ListenerError {
    /// True for errors caused by the configuration rather than the network.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

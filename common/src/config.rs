//! Configuration snapshot handed to the listener, and the JSON file it is read from.
//!
//! The file lives at `<config dir>/chatchime/config.json` unless a path is given.
//! Every key is optional; missing keys take the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::{normalize_channel, normalize_token};
use crate::trigger::TriggerTable;

pub const DEFAULT_SERVER_HOST: &str = "irc.chat.twitch.tv";
/// Plain-text port; TLS is not used.
pub const DEFAULT_SERVER_PORT: u16 = 6667;

const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;
const DEFAULT_MAX_RECONNECT_DELAY_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;

/// Immutable connection parameters for one listener run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub server_host: String,
    pub server_port: u16,
    /// OAuth token sent with `PASS`.
    pub token: String,
    pub nickname: String,
    /// Channel to join, without `#`.
    pub channel: String,
}

impl ConnectionConfig {
    /// Build a config, normalising the token prefix and channel name.
    pub fn new(
        server_host: impl Into<String>,
        server_port: u16,
        token: &str,
        nickname: &str,
        channel: &str,
    ) -> Self {
        Self {
            server_host: server_host.into(),
            server_port,
            token: normalize_token(token),
            nickname: nickname.trim().to_string(),
            channel: normalize_channel(channel),
        }
    }

    /// Check that everything needed for the handshake is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::Missing("server_host"));
        }
        if self.server_port == 0 {
            return Err(ConfigError::Invalid {
                field: "server_port",
                reason: "port must be non-zero".into(),
            });
        }
        if self.token.is_empty() {
            return Err(ConfigError::Missing("oauth_token"));
        }
        if self.nickname.is_empty() {
            return Err(ConfigError::Missing("bot_username"));
        }
        if self.channel.is_empty() {
            return Err(ConfigError::Missing("twitch_channel"));
        }
        Ok(())
    }
}

/// Timing knobs for the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSettings {
    /// First reconnect delay, and the value the delay resets to after a handshake.
    pub min_backoff: Duration,
    /// Ceiling for the doubling reconnect delay.
    pub max_backoff: Duration,
    /// Bound on TCP connect and on each handshake write.
    pub connect_timeout: Duration,
    /// Receive poll interval; how quickly the loop notices `stop()` while idle.
    pub read_timeout: Duration,
    /// How long `stop()` waits for the run loop to exit.
    pub stop_timeout: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_RECONNECT_DELAY_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }
}

/// On-disk configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub twitch_channel: String,
    pub oauth_token: String,
    pub bot_username: String,
    /// Trigger phrase to sound file, checked in file order.
    pub triggers: TriggerTable,
    /// Seconds.
    pub reconnect_delay: u64,
    /// Seconds.
    pub max_reconnect_delay: u64,
    pub server_host: String,
    pub server_port: u16,
    /// Seconds.
    pub connect_timeout: u64,
    pub read_timeout_ms: u64,
    /// Seconds.
    pub stop_timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut triggers = TriggerTable::new();
        for (phrase, sound) in [
            ("!hello", "sounds/hello.wav"),
            ("!welcome", "sounds/welcome.wav"),
        ] {
            // Constant, non-empty phrases.
            let _ = triggers.insert(phrase, sound);
        }

        Self {
            twitch_channel: String::new(),
            oauth_token: String::new(),
            bot_username: String::new(),
            triggers,
            reconnect_delay: DEFAULT_RECONNECT_DELAY_SECS,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY_SECS,
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            stop_timeout: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// `<config dir>/chatchime/config.json`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatchime")
            .join("config.json")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| write_err(e.into()))?;
        std::fs::write(path, json + "\n").map_err(write_err)
    }

    /// Create the file from defaults if it does not exist. Returns true if it was created.
    pub fn write_template(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save(path)?;
        Ok(true)
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(
            self.server_host.trim(),
            self.server_port,
            &self.oauth_token,
            &self.bot_username,
            &self.twitch_channel,
        )
    }

    /// Timing settings; a maximum below the minimum is raised to the minimum.
    pub fn settings(&self) -> ListenerSettings {
        let min_backoff = Duration::from_secs(self.reconnect_delay.max(1));
        ListenerSettings {
            min_backoff,
            max_backoff: Duration::from_secs(self.max_reconnect_delay).max(min_backoff),
            connect_timeout: Duration::from_secs(self.connect_timeout.max(1)),
            read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
            stop_timeout: Duration::from_secs(self.stop_timeout.max(1)),
        }
    }
}

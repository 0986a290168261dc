use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use chatchime_client::manager::ConnectionManager;
use chatchime_client::observer::TracingObserver;
use chatchime_client::playback::{AudioChoice, select_backend};
use chatchime_common::config::AppConfig;

/// Listen to a Twitch channel's chat and play a sound when a trigger phrase appears.
#[derive(Debug, Parser)]
#[command(name = "chatchime", version)]
struct Args {
    /// Config file (default: <config dir>/chatchime/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// OAuth token, overriding the config file
    #[arg(long, env = "TWITCH_OAUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Channel to join, overriding the config file
    #[arg(long)]
    channel: Option<String>,

    /// Bot username, overriding the config file
    #[arg(long)]
    nick: Option<String>,

    /// Audio output
    #[arg(long, value_enum, default_value_t = AudioChoice::Auto)]
    audio: AudioChoice,

    /// Write a config template if none exists, print its path and exit
    #[arg(long)]
    init: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(token) = &self.token {
            config.oauth_token = token.clone();
        }
        if let Some(channel) = &self.channel {
            config.twitch_channel = channel.clone();
        }
        if let Some(nick) = &self.nick {
            config.bot_username = nick.clone();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    chatchime_common::log::init(args.debug);

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);

    if AppConfig::write_template(&config_path)? {
        info!("Created config template at {}", config_path.display());
    }
    if args.init {
        println!("{}", config_path.display());
        return Ok(());
    }

    let mut config = AppConfig::load(&config_path)?;
    args.apply_overrides(&mut config);
    run(config, &config_path, args.audio)
}

fn run(config: AppConfig, config_path: &std::path::Path, audio: AudioChoice) -> Result<()> {
    let connection = config.connection();
    connection.validate().with_context(|| {
        format!(
            "incomplete configuration, edit {} or pass --token/--channel/--nick",
            config_path.display()
        )
    })?;

    if config.triggers.is_empty() {
        warn!("No triggers configured; chat will be shown but nothing will play");
    }
    for trigger in config.triggers.iter() {
        debug!("  {} -> {}", trigger.phrase(), trigger.action());
    }
    info!(
        "{} trigger(s) loaded, joining #{}",
        config.triggers.len(),
        connection.channel
    );

    let backend = select_backend(audio);
    let manager = ConnectionManager::new(
        connection,
        config.settings(),
        config.triggers,
        backend,
        Arc::new(TracingObserver),
    );

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("installing Ctrl+C handler")?;

    manager.start()?;
    info!("Listening. Press Ctrl+C to stop.");

    let _ = shutdown_rx.recv();
    info!("Shutting down...");
    manager.stop();

    info!("Shutdown complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_values() {
        let args = Args::parse_from([
            "chatchime",
            "--token",
            "abc",
            "--channel",
            "#Someone",
            "--audio",
            "none",
        ]);
        assert_eq!(args.audio, AudioChoice::None);

        let mut config = AppConfig::default();
        config.bot_username = "keepme".into();
        args.apply_overrides(&mut config);

        assert_eq!(config.oauth_token, "abc");
        assert_eq!(config.twitch_channel, "#Someone");
        assert_eq!(config.bot_username, "keepme");

        let connection = config.connection();
        assert_eq!(connection.token, "oauth:abc");
        assert_eq!(connection.channel, "someone");
    }

    #[test]
    fn audio_defaults_to_auto() {
        let args = Args::parse_from(["chatchime", "--config", "/tmp/x.json"]);
        assert_eq!(args.audio, AudioChoice::Auto);
        assert!(!args.init);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/x.json")));
    }

    #[test]
    fn rejects_unknown_audio_backend() {
        assert!(Args::try_parse_from(["chatchime", "--audio", "speaker"]).is_err());
    }
}

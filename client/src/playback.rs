use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, info, warn};

use crate::action::{ActionBackend, ActionError, NullBackend, existing_file};
use crate::audio::{Clip, decode_wav, resample};

/// Extra wait after a clip's nominal length before giving up on the device.
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);
/// Let the device drain its last buffer before the stream is dropped.
const DRAIN_TIME: Duration = Duration::from_millis(100);
/// Upper bound on one external player run.
const PLAYER_TIMEOUT: Duration = Duration::from_secs(60);

/// External players probed on `PATH`, in order of preference.
const PLAYERS: [(&str, &[&str]); 4] = [
    ("paplay", &[]),
    ("aplay", &["-q"]),
    ("afplay", &[]),
    ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
];

/// Which audio backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AudioChoice {
    /// Native device first, then an external player.
    #[default]
    Auto,
    /// Default output device via cpal (WAV only).
    Native,
    /// External command-line player.
    Command,
    /// No audio; triggers are only logged.
    None,
}

/// Plays WAV files on the default output device.
pub struct CpalBackend {
    device_name: String,
}

impl CpalBackend {
    /// `None` when the host has no default output device.
    pub fn probe() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let device_name = device
            .description()
            .map(|d: cpal::DeviceDescription| d.name().to_string())
            .unwrap_or_else(|_| "Default".into());
        Some(Self { device_name })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl ActionBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn perform(&self, action: &str) -> Result<(), ActionError> {
        let path = existing_file(action)?;
        if !is_wav(path) {
            return Err(ActionError::Unsupported(format!(
                "{} (native output plays WAV only)",
                path.display()
            )));
        }
        let clip = decode_wav(path)?;
        play_clip(clip)
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}

/// Play a clip to completion on the default output device.
fn play_clip(clip: Clip) -> Result<(), ActionError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| ActionError::Device("no default output device".into()))?;

    let default_config = device
        .default_output_config()
        .map_err(|e| ActionError::Device(format!("getting default output config: {e}")))?;
    let output_rate = default_config.sample_rate();
    let channels = usize::from(default_config.channels().max(1));

    let samples = resample(&clip.samples, clip.sample_rate, output_rate)?;
    let total = samples.len();
    let duration = Duration::from_secs_f64(total as f64 / f64::from(output_rate.max(1)));
    debug!("[playback] {total} samples at {output_rate}Hz ({duration:?})");

    let config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: output_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let stream = match default_config.sample_format() {
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, samples, channels, done_tx)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config, samples, channels, done_tx)
        }
        _ => build_stream::<f32>(&device, &config, samples, channels, done_tx),
    }
    .map_err(|e| ActionError::Device(format!("building output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| ActionError::Device(format!("starting playback stream: {e}")))?;

    if done_rx.recv_timeout(duration + PLAYBACK_GRACE).is_err() {
        warn!("[playback] Clip did not finish within {:?}", duration + PLAYBACK_GRACE);
    }
    std::thread::sleep(DRAIN_TIME);
    drop(stream);
    Ok(())
}

/// Output stream that plays `samples` once, then silence, and signals `done_tx`.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: Vec<f32>,
    channels: usize,
    done_tx: crossbeam_channel::Sender<()>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let total = samples.len();
    let mut position = 0usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Same mono sample on every channel.
            for frame in data.chunks_mut(channels) {
                let sample = samples.get(position).copied().unwrap_or(0.0);
                frame.fill(T::from_sample(sample));
                position = position.saturating_add(1);
            }
            if position >= total {
                let _ = done_tx.try_send(());
            }
        },
        |err| warn!("[playback] Output stream error: {err}"),
        None,
    )
}

/// Plays sound files through an external command, e.g. `paplay <file>`.
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout: PLAYER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// First known player found on `PATH`.
    pub fn probe() -> Option<Self> {
        PLAYERS.iter().find_map(|(name, args)| {
            find_on_path(name).map(|program| Self::new(program, args))
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ActionBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn perform(&self, action: &str) -> Result<(), ActionError> {
        let path = existing_file(action)?;
        let program = self.program.display().to_string();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ActionError::Player {
                    program,
                    status: format!("timed out after {:?}", self.timeout),
                });
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        if status.success() {
            Ok(())
        } else {
            Err(ActionError::Player {
                program,
                status: status.to_string(),
            })
        }
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Pick the backend for `choice`, probing the system once.
///
/// Falls back to [`NullBackend`] when nothing usable is found, so the listener
/// still runs and each trigger reports why it stayed silent.
pub fn select_backend(choice: AudioChoice) -> Arc<dyn ActionBackend> {
    let native = || {
        CpalBackend::probe().map(|b| {
            info!("[playback] Using output device: {}", b.device_name());
            Arc::new(b) as Arc<dyn ActionBackend>
        })
    };
    let command = || {
        CommandBackend::probe().map(|b| {
            info!("[playback] Using player: {}", b.program().display());
            Arc::new(b) as Arc<dyn ActionBackend>
        })
    };

    let selected = match choice {
        AudioChoice::Auto => native().or_else(command),
        AudioChoice::Native => native(),
        AudioChoice::Command => command(),
        AudioChoice::None => return Arc::new(NullBackend),
    };
    selected.unwrap_or_else(|| {
        warn!("[playback] No audio backend available for {choice:?}; sounds are disabled");
        Arc::new(NullBackend)
    })
}

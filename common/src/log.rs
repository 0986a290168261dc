use tracing_subscriber::EnvFilter;

/// Crates whose events are shown by default.
const CRATES: [&str; 3] = ["chatchime", "chatchime_client", "chatchime_common"];

/// Install the stderr log subscriber.
///
/// `RUST_LOG` takes precedence when set. Otherwise the workspace crates log at
/// `info`, or `debug` when `debug` is true. Calling this twice is harmless.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn default_filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    let directives = CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(format!("warn,{directives}"))
}

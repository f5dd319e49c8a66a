//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered at `log_level`.
///
/// `RUST_LOG` takes precedence when set. `"off"` or `"disabled"` installs
/// nothing. Calling this twice is harmless; the second install is ignored.
pub fn init_tracing(log_level: &str) {
    let level = log_level.trim().to_lowercase();
    if level == "off" || level == "disabled" {
        return;
    }

    let level = match level.as_str() {
        "warning" => "warn",
        "critical" => "error",
        other => other,
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

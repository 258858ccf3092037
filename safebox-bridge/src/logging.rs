//! Tracing setup. Logs go to stderr: stdout carries the native-messaging stream.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Filter from `RUST_LOG`, default `info`.
/// A second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

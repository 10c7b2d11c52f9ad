//! Logging setup

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber
///
/// Use the RUST_LOG env var to override the level,
/// e.g. `RUST_LOG=debug` or `RUST_LOG=chat_relay=trace`.
pub fn setup_logger(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("chat_relay={default_level}"))),
        )
        .init();
}

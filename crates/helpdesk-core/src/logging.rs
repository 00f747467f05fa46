//! `tracing` subscriber setup.
//!
//! Output goes to stderr, either compact human-readable lines or one JSON
//! object per event. `RUST_LOG` overrides the configured level.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logging output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact single-line text.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Build the level filter, preferring `RUST_LOG` when it is set and valid.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Default filter directive, e.g. `"info"` or `"helpdesk_broker=debug"`.
/// * `format` - Output format.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let filter = env_filter(level);

    let result = match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init(),
    };

    // try_init fails only when a global subscriber already exists
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}

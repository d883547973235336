//! Diagnostic logging setup for the binary.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a stderr subscriber.
///
/// `RUST_LOG` wins when set. Otherwise only warnings are shown, or
/// everything down to debug when `verbose` is set; per-file progress is
/// already printed by the console reporter.
///
/// Calling this twice is harmless: the second subscriber is not installed.
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .try_init();

    if result.is_ok() {
        tracing::debug!(verbose, "logging initialized");
    }
}

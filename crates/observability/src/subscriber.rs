//! Tracing subscriber initialization.

use tracing_subscriber::EnvFilter;

use crate::LogFormat;

/// Install the process-wide fmt subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Safe to call
/// multiple times; only the first call installs anything.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .with_target(true)
            .try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(format = format.as_str(), "tracing initialized");
    }
}

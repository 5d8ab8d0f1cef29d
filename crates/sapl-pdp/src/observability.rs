// Tracing initialisation with a configurable level and output format.
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::settings::LoggingSettings;

/// Installs the global subscriber. `RUST_LOG` wins over the configured
/// level. Calling this again after a subscriber is set is a no-op.
pub fn init_tracing(settings: &LoggingSettings) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(&settings.level));

    let json = settings.json.then(|| fmt::layer().json());
    let plain = (!settings.json).then(fmt::layer);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init();
}

//! Logging setup.
//!
//! Uses tracing-subscriber with an env-filter. The level can be set
//! with the `LOG_LEVEL` environment variable (e.g. `LOG_LEVEL=debug`),
//! defaulting to `info`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber. Safe to call more than
/// once; only the first call takes effect.
pub fn init_logger() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("LOG_LEVEL")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    });
}

//! Tracing subscriber installation.
//!
//! Stock operations emit spans through `#[instrument(err)]`; this module only
//! decides where those spans and events end up.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the JSON subscriber. Safe to call multiple times.
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

/// Install the JSON subscriber, falling back to `directive` when `RUST_LOG`
/// is unset or unparsable.
pub fn init_with_default(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    // First caller wins; later calls see a global default and return.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init();
}

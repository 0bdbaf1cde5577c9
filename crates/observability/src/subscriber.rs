//! Subscriber construction.
//!
//! Filtering follows `RUST_LOG`; when it is unset or invalid the given default
//! directive applies.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";
const TEST_DIRECTIVE: &str = "warn";

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// JSON logs with timestamps; later calls are no-ops.
pub fn init() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter(DEFAULT_DIRECTIVE))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("tracing subscriber installed");
    }
}

/// Compact logs routed through the libtest output capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(TEST_DIRECTIVE))
        .compact()
        .with_test_writer()
        .try_init();
}

//! Process-wide tracing setup shared by the stockwise binaries and tests.

pub mod subscriber;

/// Initialize process-wide observability (JSON tracing to stdout).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init();
}

/// Human-readable output captured by the test harness.
///
/// Safe to call from every test.
pub fn init_for_tests() {
    subscriber::init_for_tests();
}

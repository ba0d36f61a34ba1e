//! env_logger setup shared by the demo binary and tests

use env_logger::{Builder, Env};

/// Initialize logging with an `info` default that `RUST_LOG` can override.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    init_with_default("info");
}

pub fn init_with_default(filter: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}

/// Test-friendly initializer that captures output per test
pub fn init_for_tests() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

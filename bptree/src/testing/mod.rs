//! Shared helpers for unit tests.

use crate::config::TreeConfig;

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call
/// installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A configuration with the smallest fan-outs allowed, so a few dozen keys
/// already produce several levels of interior nodes.
pub fn small_config() -> TreeConfig {
    TreeConfig::new(8)
        .with_max_leaf_records(3)
        .with_max_interior_entries(3)
}

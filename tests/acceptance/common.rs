//! Common utilities for acceptance scenarios.

#![allow(dead_code)]

use std::sync::Once;

static TRACING: Once = Once::new();

/// Initialize a tracing subscriber once for the whole test binary, honoring
/// `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

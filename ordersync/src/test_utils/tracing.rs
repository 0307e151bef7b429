//! Tracing setup for tests.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initializes a process-wide tracing subscriber for tests.
///
/// Honors `RUST_LOG` and defaults to `info`. Safe to call from every test; only
/// the first call installs the subscriber.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .init();
    });
}

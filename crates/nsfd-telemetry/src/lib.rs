//! Tracing setup for nsfd.
//!
//! Binaries call [`init_tracing`] once at startup. Tests call
//! [`init_test_tracing`] as often as they like; only the first call installs
//! a subscriber.
//!
//! ```bash
//! # Show every namespace mutation
//! RUST_LOG=nsfd_kernel=debug nsfd --config ns.ron ls /
//!
//! # Include forwarded opens
//! RUST_LOG=nsfd_kernel=trace nsfd --config ns.ron resolve /svc/logger
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter: `RUST_LOG` if set and valid, else `default_filter`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a registry with an env filter and a stderr fmt layer.
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Install a subscriber that writes through the test harness's capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(env_filter("nsfd_kernel=debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

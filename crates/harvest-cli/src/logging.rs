//! Tracing setup for the `harvest` binary.
//!
//! Reads `RUST_LOG`; defaults to `info` for the harvest crates and `warn` elsewhere.
//! Output goes to stderr so `--print-json` keeps stdout clean.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,harvest=info,harvest_core=info";

pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

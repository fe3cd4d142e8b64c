//! Structured logging setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a stdout `tracing` subscriber honoring `RUST_LOG`, falling
/// back to `info` when unset.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(fmt::layer()).with(env_filter).init();
}

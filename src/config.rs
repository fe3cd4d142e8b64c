//! Runtime configuration.
//!
//! There is no on-disk config file here — this crate is embedded in a
//! broker process, not a standalone daemon, so its only external input is
//! a handful of env vars plus whatever the embedding integrator passes to
//! [`Config::new`] directly.

use std::env;

/// The single capability name subject to quota enforcement for accounts
/// that can't pay. A future store-provided list would replace this field
/// without changing how callers construct a [`Config`].
pub const DEFAULT_METERED_CAPABILITY: &str = "ros-tool";
/// Byte quota per metered capability per month for accounts that can't pay.
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Informational only: the URL of the billing service this deployment
    /// is paired with. Nothing in this crate calls out to it; it exists so
    /// operators can see which billing environment an instance is wired to.
    pub billing_service_url: Option<String>,
    pub metered_capability: String,
    pub max_bytes: u64,
    pub cache_ttl_secs: i64,
    pub rate_threshold: i64,
    pub refetch_interval: std::time::Duration,
    pub flush_interval: std::time::Duration,
}

impl Config {
    /// Build a [`Config`] from defaults, reading `TR_BILLING_SERVICE` from
    /// the environment for the informational field.
    pub fn from_env() -> Self {
        Self {
            billing_service_url: env::var("TR_BILLING_SERVICE").ok(),
            ..Self::defaults()
        }
    }

    pub fn defaults() -> Self {
        Self {
            billing_service_url: None,
            metered_capability: DEFAULT_METERED_CAPABILITY.to_owned(),
            max_bytes: DEFAULT_MAX_BYTES,
            cache_ttl_secs: crate::cache::CACHE_TTL,
            rate_threshold: crate::ratelimit::THRESHOLD,
            refetch_interval: crate::tasks::REFETCH_INTERVAL,
            flush_interval: crate::tasks::FLUSH_INTERVAL,
        }
    }
}

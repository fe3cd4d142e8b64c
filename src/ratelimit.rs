//! Component F — write rate limiting with a firewall side effect.
//!
//! Mirrors the original plugin's additive-decay counter: every write bumps
//! a per-client counter by one; every two seconds (at minimum) elapsed, all
//! counters decay by `THRESHOLD` per elapsed second, floored at zero. A
//! client whose counter crosses [`BURST_THRESHOLD`] gets added to the
//! firewall's block list; once decay brings it back under [`THRESHOLD`] it
//! is removed again.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Permitted sustained writes per second before throttling kicks in.
pub const THRESHOLD: i64 = 200;
/// Permitted burst above [`THRESHOLD`] before the client is firewalled.
pub const BURST_THRESHOLD: i64 = 2 * THRESHOLD;
/// Minimum interval between decay sweeps, in seconds.
const DECAY_INTERVAL: i64 = 2;

/// A side-effecting block/unblock mechanism for misbehaving client IPs.
pub trait FirewallControl: Send + Sync {
    fn block(&self, ip: &str);
    fn unblock(&self, ip: &str);

    /// Clear the entire block list. Called once at startup so a restarted
    /// process doesn't inherit a stale `limit` set from a previous run.
    fn flush(&self);
}

/// A [`FirewallControl`] that shells out to `ipset`, mirroring the original
/// plugin's `update_ipset`.
#[derive(Debug, Default)]
pub struct IpsetFirewall;

impl FirewallControl for IpsetFirewall {
    fn block(&self, ip: &str) {
        run_ipset(&["-exist", "add", "limit", ip]);
    }

    fn unblock(&self, ip: &str) {
        run_ipset(&["-exist", "del", "limit", ip]);
    }

    fn flush(&self) {
        run_ipset(&["flush", "limit"]);
    }
}

fn run_ipset(args: &[&str]) {
    match std::process::Command::new("ipset").args(args).status() {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!(?args, code = ?status.code(), "ipset exited with a non-zero status"),
        Err(error) => tracing::warn!(?args, %error, "failed to run ipset"),
    }
}

/// A [`FirewallControl`] double that just records calls, for tests.
#[derive(Debug, Default)]
pub struct NoopFirewall {
    pub blocked: Mutex<Vec<String>>,
    pub flushed: Mutex<bool>,
}

impl FirewallControl for NoopFirewall {
    fn block(&self, ip: &str) {
        self.blocked.lock().push(ip.to_owned());
    }

    fn unblock(&self, ip: &str) {
        self.blocked.lock().retain(|blocked| blocked != ip);
    }

    fn flush(&self) {
        *self.flushed.lock() = true;
        self.blocked.lock().clear();
    }
}

#[derive(Debug, Clone)]
struct ClientCounter {
    ip: String,
    count: i64,
    is_limited: bool,
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<String, ClientCounter>,
    last_decay: i64,
}

/// Shared write-rate limiter state, parameterized over a [`FirewallControl`]
/// implementation.
#[derive(Clone)]
pub struct RateLimiter<F> {
    inner: Arc<Mutex<Inner>>,
    pub firewall: Arc<F>,
    /// Sustained writes per second allowed before throttling; the burst
    /// threshold is always twice this. Defaults to [`THRESHOLD`] but is
    /// overridable via `Config::rate_threshold` so tests can shrink the
    /// window instead of issuing hundreds of writes.
    threshold: i64,
}

impl<F: FirewallControl> RateLimiter<F> {
    pub fn new(firewall: F) -> Self {
        Self::with_threshold(firewall, THRESHOLD)
    }

    pub fn with_threshold(firewall: F, threshold: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            firewall: Arc::new(firewall),
            threshold,
        }
    }

    fn burst_threshold(&self) -> i64 {
        self.threshold * 2
    }

    /// Record a write from `client_key` at `ip`, decaying stale counters
    /// first, and firewall the IP if it just crossed the burst threshold.
    pub fn record_write(&self, client_key: &str, ip: &str) {
        self.decay();

        let mut inner = self.inner.lock();
        let entry = inner.clients.entry(client_key.to_owned()).or_insert_with(|| ClientCounter {
            ip: ip.to_owned(),
            count: 0,
            is_limited: false,
        });
        entry.ip = ip.to_owned();
        entry.count += 1;

        if !entry.is_limited && entry.count > self.burst_threshold() {
            entry.is_limited = true;
            let ip = entry.ip.clone();
            drop(inner);
            self.firewall.block(&ip);
        }
    }

    /// Decay every client's counter by `threshold * elapsed_seconds`, at
    /// most once per [`DECAY_INTERVAL`] seconds; unblock clients that have
    /// decayed back under `threshold`.
    fn decay(&self) {
        let now = crate::clock::unix_timestamp();
        let mut inner = self.inner.lock();
        let elapsed = now - inner.last_decay;
        if elapsed < DECAY_INTERVAL {
            return;
        }

        let mut to_unblock = Vec::new();
        for client in inner.clients.values_mut() {
            if client.count > 0 {
                client.count = (client.count - self.threshold * elapsed).max(0);
                if client.is_limited && client.count < self.threshold {
                    client.is_limited = false;
                    to_unblock.push(client.ip.clone());
                }
            }
        }
        inner.last_decay = now;
        drop(inner);

        for ip in to_unblock {
            self.firewall.unblock(&ip);
        }
    }

    /// Drop a disconnecting client's counter entirely.
    pub fn remove_client(&self, client_key: &str) {
        self.inner.lock().clients.remove(client_key);
    }

    /// Clear the firewall's block list. Called once at process start,
    /// mirroring the original plugin's preliminary `ipset flush`.
    pub fn init_firewall(&self) {
        self.firewall.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_burst_threshold_blocks_the_ip() {
        let firewall = NoopFirewall::default();
        let limiter = RateLimiter::new(firewall);
        for _ in 0..=BURST_THRESHOLD {
            limiter.record_write("c1", "10.0.0.1");
        }
        assert_eq!(limiter.firewall.blocked.lock().as_slice(), ["10.0.0.1"]);
    }

    #[test]
    fn staying_under_burst_threshold_never_blocks() {
        let firewall = NoopFirewall::default();
        let limiter = RateLimiter::new(firewall);
        for _ in 0..10 {
            limiter.record_write("c1", "10.0.0.1");
        }
        assert!(limiter.firewall.blocked.lock().is_empty());
    }

    #[test]
    fn remove_client_drops_its_counter() {
        let firewall = NoopFirewall::default();
        let limiter = RateLimiter::new(firewall);
        limiter.record_write("c1", "10.0.0.1");
        limiter.remove_client("c1");
        assert!(!limiter.inner.lock().clients.contains_key("c1"));
    }

    #[test]
    fn a_shrunk_threshold_blocks_far_sooner_than_the_default_would() {
        let limiter = RateLimiter::with_threshold(NoopFirewall::default(), 2);
        for _ in 0..10 {
            limiter.record_write("c1", "10.0.0.1");
        }
        assert_eq!(limiter.firewall.blocked.lock().as_slice(), ["10.0.0.1"]);
    }
}

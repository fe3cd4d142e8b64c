//! Component E — per-client topic permission cache.
//!
//! Once a websocket client's permission token has been evaluated ALLOW for
//! a given topic, that decision is cached for [`CACHE_TTL`] seconds so
//! every subsequent publish/subscribe on the same topic skips the
//! evaluator. DENY decisions are never cached (see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// How long a cached ALLOW decision remains valid, in seconds.
pub const CACHE_TTL: i64 = 300;

#[derive(Debug, Default)]
struct Inner {
    // client_key -> topic -> cached-at timestamp
    permissions: HashMap<String, HashMap<String, i64>>,
}

#[derive(Debug, Clone)]
pub struct PermissionCache {
    inner: Arc<Mutex<Inner>>,
    /// How long a cached ALLOW stays valid, in seconds. Defaults to
    /// [`CACHE_TTL`] but is overridable via `Config::cache_ttl_secs` so
    /// tests can shrink the window instead of waiting out the real one.
    ttl_secs: i64,
}

impl PermissionCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl_secs,
        }
    }

    /// Whether `client_key` has a still-valid cached ALLOW for `topic`.
    pub fn is_allowed(&self, client_key: &str, topic: &str) -> bool {
        let now = crate::clock::unix_timestamp();
        self.inner
            .lock()
            .permissions
            .get(client_key)
            .and_then(|topics| topics.get(topic))
            .is_some_and(|&cached_at| cached_at + self.ttl_secs > now)
    }

    pub fn record_allow(&self, client_key: &str, topic: &str) {
        let now = crate::clock::unix_timestamp();
        self.inner
            .lock()
            .permissions
            .entry(client_key.to_owned())
            .or_default()
            .insert(topic.to_owned(), now);
    }

    /// Drop all cached entries for a disconnecting client.
    pub fn remove_client(&self, client_key: &str) {
        self.inner.lock().permissions.remove(client_key);
    }
}

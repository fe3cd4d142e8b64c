//! Component C — the process-wide account cache.
//!
//! Mirrors a small slice of the account document store in memory: JWT
//! secrets (so auth doesn't round-trip to the store on every connect),
//! the `can_pay` flag, and this month's per-capability byte counters.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::AccountDocument;

#[derive(Debug, Clone, Default)]
struct Account {
    jwt_secret: Option<String>,
    can_pay: bool,
    cap_usage: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<String, Account>,
}

/// Cheaply cloneable handle to the shared account cache.
#[derive(Debug, Clone, Default)]
pub struct AccountCache(Arc<Mutex<Inner>>);

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache wholesale with freshly fetched documents. Existing
    /// usage counters for accounts no longer returned by the store are
    /// dropped; counters for accounts still present are replaced with
    /// whatever the store reports (the store is the usage source of truth;
    /// this cache's own counts are flushed to it separately, see
    /// [`crate::tasks::FlushMeterTask`]).
    pub fn refresh(&self, documents: Vec<AccountDocument>) {
        let mut inner = self.0.lock();
        inner.accounts = documents
            .into_iter()
            .map(|doc| {
                (
                    doc.id,
                    Account {
                        jwt_secret: doc.jwt_secret,
                        can_pay: doc.can_pay,
                        cap_usage: doc.cap_usage,
                    },
                )
            })
            .collect();
    }

    pub fn jwt_secret(&self, account_id: &str) -> Option<String> {
        self.0.lock().accounts.get(account_id).and_then(|a| a.jwt_secret.clone())
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.0.lock().accounts.contains_key(account_id)
    }

    pub fn can_pay(&self, account_id: &str) -> bool {
        self.0.lock().accounts.get(account_id).map(|a| a.can_pay).unwrap_or(false)
    }

    /// Add `bytes` to `account_id`'s usage for `capability` and return the
    /// new running total; accounts not yet known to the cache (e.g. a
    /// superuser publishing before the first refresh) are recorded with a
    /// usage entry anyway so a later refresh can reconcile them.
    pub fn record_read(&self, account_id: &str, capability: &str, bytes: u64) -> u64 {
        let mut inner = self.0.lock();
        let account = inner.accounts.entry(account_id.to_owned()).or_default();
        let total = account.cap_usage.entry(capability.to_owned()).or_insert(0);
        *total += bytes;
        *total
    }

    /// Snapshot of every account's usage, for flushing to the store.
    pub fn usage_snapshot(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        self.0
            .lock()
            .accounts
            .iter()
            .map(|(id, account)| (id.clone(), account.cap_usage.clone()))
            .collect()
    }

    /// Clear every account's usage counters, on a month rollover.
    pub fn reset_usage(&self) {
        for account in self.0.lock().accounts.values_mut() {
            account.cap_usage.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_doc(id: &str, can_pay: bool) -> AccountDocument {
        AccountDocument {
            id: id.to_owned(),
            jwt_secret: Some("secret".to_owned()),
            can_pay,
            cap_usage: BTreeMap::new(),
        }
    }

    #[test]
    fn refresh_replaces_contents() {
        let cache = AccountCache::new();
        cache.refresh(vec![account_doc("u1", true)]);
        assert!(cache.contains("u1"));
        assert!(cache.can_pay("u1"));
        assert!(!cache.contains("u2"));
    }

    #[test]
    fn record_read_accumulates_per_capability() {
        let cache = AccountCache::new();
        cache.refresh(vec![account_doc("u1", false)]);
        assert_eq!(cache.record_read("u1", "ros-tool", 10), 10);
        assert_eq!(cache.record_read("u1", "ros-tool", 5), 15);
        assert_eq!(cache.record_read("u1", "other-cap", 3), 3);
    }

    #[test]
    fn reset_usage_clears_all_accounts() {
        let cache = AccountCache::new();
        cache.refresh(vec![account_doc("u1", false)]);
        cache.record_read("u1", "ros-tool", 500);
        cache.reset_usage();
        assert_eq!(cache.record_read("u1", "ros-tool", 1), 1);
    }
}

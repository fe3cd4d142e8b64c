//! Component H — periodic background maintenance.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::account::AccountCache;
use crate::store::{AccountDocument, AccountStore};
use crate::task::{ShutdownSignal, Task};

/// Re-fetch every account from the store into the in-memory cache on this
/// interval.
pub const REFETCH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);
/// Flush metered usage to the store on this interval.
pub const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Fetch every account once and replace [`AccountCache`]'s contents,
/// returning whether the fetch succeeded. Shared by the periodic
/// [`RefetchAccountsTask`] loop and the on-demand refresh
/// [`crate::jwt::authenticate`] triggers on a cache miss.
pub async fn refetch_once<S: AccountStore>(store: &S, cache: &AccountCache) -> Result<(), crate::store::StoreError> {
    let documents = store.fetch_all().await?;
    let count = documents.len();
    cache.refresh(documents);
    tracing::debug!(count, "refreshed account cache");
    Ok(())
}

/// Periodically replaces [`AccountCache`]'s contents with a fresh fetch
/// from the store, so JWT secrets and payment status stay current without
/// a store round trip on every connection.
pub struct RefetchAccountsTask<S> {
    pub store: std::sync::Arc<S>,
    pub cache: AccountCache,
    /// How often to re-fetch. Defaults to [`REFETCH_INTERVAL`] but is
    /// overridable via `Config::refetch_interval` so tests can shrink the
    /// window instead of waiting out the real one.
    pub interval: std::time::Duration,
}

#[async_trait]
impl<S: AccountStore + 'static> Task for RefetchAccountsTask<S> {
    type Output = ();

    const NAME: &'static str = "refetch-accounts";

    async fn run(self, mut shutdown_signal: ShutdownSignal) {
        loop {
            if let Err(error) = refetch_once(self.store.as_ref(), &self.cache).await {
                tracing::warn!(%error, "failed to refetch accounts");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                () = shutdown_signal.wait() => break,
            }
        }
    }
}

/// Periodically flushes metered usage from [`AccountCache`] to the store,
/// resetting every account's counters on a calendar month rollover (the
/// rollover check compares the current month against the month observed at
/// the previous tick, so it only fires once per boundary).
pub struct FlushMeterTask<S> {
    pub store: std::sync::Arc<S>,
    pub cache: AccountCache,
    /// How often to flush. Defaults to [`FLUSH_INTERVAL`] but is
    /// overridable via `Config::flush_interval`.
    pub interval: std::time::Duration,
}

#[async_trait]
impl<S: AccountStore + 'static> Task for FlushMeterTask<S> {
    type Output = ();

    const NAME: &'static str = "flush-meter";

    async fn run(self, mut shutdown_signal: ShutdownSignal) {
        let mut last_month = current_month();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                () = shutdown_signal.wait() => break,
            }

            let month = current_month();
            if month != last_month {
                tracing::info!("new month, resetting metered usage");
                self.cache.reset_usage();
                last_month = month;
            }

            for (account_id, cap_usage) in self.cache.usage_snapshot() {
                if let Err(error) = self.store.record_usage(&account_id, &cap_usage).await {
                    tracing::warn!(%account_id, %error, "failed to flush metered usage");
                }
            }
        }
    }
}

fn current_month() -> u8 {
    OffsetDateTime::now_utc().month() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAccountStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn refetch_task_populates_cache_then_stops_on_shutdown() {
        let store = Arc::new(InMemoryAccountStore::new(vec![AccountDocument {
            id: "u1".into(),
            jwt_secret: Some("s".into()),
            can_pay: true,
            cap_usage: Default::default(),
        }]));
        let cache = AccountCache::new();
        let (shutdown, signal) = crate::task::ShutdownHandle::new();

        let handle = crate::task::spawn_task(
            RefetchAccountsTask {
                store,
                cache: cache.clone(),
                interval: REFETCH_INTERVAL,
            },
            signal,
        );

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(cache.contains("u1"));

        shutdown.signal();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn a_shrunk_interval_drives_several_refetches_within_a_short_window() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingStore {
            inner: InMemoryAccountStore,
            fetches: AtomicUsize,
        }

        #[async_trait]
        impl AccountStore for CountingStore {
            async fn fetch_all(&self) -> Result<Vec<AccountDocument>, crate::store::StoreError> {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                self.inner.fetch_all().await
            }

            async fn record_usage(
                &self,
                account_id: &str,
                cap_usage: &std::collections::BTreeMap<String, u64>,
            ) -> Result<(), crate::store::StoreError> {
                self.inner.record_usage(account_id, cap_usage).await
            }
        }

        let store = Arc::new(CountingStore {
            inner: InMemoryAccountStore::new(vec![AccountDocument {
                id: "u1".into(),
                jwt_secret: Some("s".into()),
                can_pay: true,
                cap_usage: Default::default(),
            }]),
            fetches: AtomicUsize::new(0),
        });
        let cache = AccountCache::new();
        let (shutdown, signal) = crate::task::ShutdownHandle::new();

        let handle = crate::task::spawn_task(
            RefetchAccountsTask {
                store: store.clone(),
                cache,
                interval: std::time::Duration::from_millis(5),
            },
            signal,
        );

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        shutdown.signal();
        handle.join().await.unwrap();

        assert!(
            store.fetches.load(Ordering::SeqCst) >= 3,
            "expected several refetches within the window, got {}",
            store.fetches.load(Ordering::SeqCst)
        );
    }
}

//! The account document store collaborator boundary.
//!
//! This crate never talks to a particular database. It depends on
//! [`AccountStore`], an async trait a caller implements against whatever
//! document store actually holds accounts; [`InMemoryAccountStore`] is a
//! fixture double used by tests and the demonstration binary.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::value::Document;

/// One account record as read from the store: its id, JWT secret, whether
/// it can pay (free tier or has a working payment method and isn't
/// delinquent), and its metered usage per capability so far this month.
#[derive(Debug, Clone)]
pub struct AccountDocument {
    pub id: String,
    pub jwt_secret: Option<String>,
    pub can_pay: bool,
    pub cap_usage: BTreeMap<String, u64>,
}

impl AccountDocument {
    /// Derive [`can_pay`](Self::can_pay) from a raw account [`Document`],
    /// matching the free/stripe-customer formula: free tier, or has a
    /// default payment method, or is allowed to pay by invoice — and in
    /// either payment case, not delinquent.
    pub fn can_pay_from_document(doc: &Document) -> bool {
        let free = doc.get("free").and_then(Document::as_bool).unwrap_or(false);
        if free {
            return true;
        }

        let Some(stripe) = doc.get("stripeCustomer") else {
            return false;
        };
        let delinquent = stripe.get("delinquent").and_then(Document::as_bool).unwrap_or(false);
        if delinquent {
            return false;
        }

        let has_payment_method = stripe
            .get("invoice_settings")
            .and_then(|s| s.get("default_payment_method"))
            .and_then(Document::as_str)
            .is_some();
        let pays_by_invoice = stripe
            .get("metadata")
            .and_then(|m| m.get("collection_method"))
            .and_then(Document::as_str)
            .is_some_and(|method| method.starts_with("send_invoice"));

        has_payment_method || pays_by_invoice
    }

    /// Build an [`AccountDocument`] from a raw document as the store
    /// returns it, e.g. `{ _id, jwtSecret, free, stripeCustomer, cap_usage }`.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let id = doc.get("_id").and_then(Document::as_str)?.to_owned();
        let jwt_secret = doc.get("jwtSecret").and_then(Document::as_str).map(str::to_owned);
        let can_pay = Self::can_pay_from_document(doc);
        let cap_usage = doc
            .get("cap_usage")
            .and_then(|usage| match usage {
                Document::Object(map) => Some(
                    map.iter()
                        .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n as u64)))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();

        Some(Self {
            id,
            jwt_secret,
            can_pay,
            cap_usage,
        })
    }
}

/// Errors surfaced by an [`AccountStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("account store is unreachable: {0}")]
    Unreachable(#[source] anyhow::Error),
}

/// The document store holding account records, external to this crate.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch every account currently on record.
    async fn fetch_all(&self) -> Result<Vec<AccountDocument>, StoreError>;

    /// Persist this month's metered usage for one account.
    async fn record_usage(&self, account_id: &str, cap_usage: &BTreeMap<String, u64>) -> Result<(), StoreError>;
}

/// A fixture [`AccountStore`] backed by an in-process map, for tests and
/// the demonstration binary.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: parking_lot::Mutex<BTreeMap<String, AccountDocument>>,
}

impl InMemoryAccountStore {
    pub fn new(accounts: Vec<AccountDocument>) -> Self {
        Self {
            accounts: parking_lot::Mutex::new(accounts.into_iter().map(|a| (a.id.clone(), a)).collect()),
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn fetch_all(&self) -> Result<Vec<AccountDocument>, StoreError> {
        Ok(self.accounts.lock().values().cloned().collect())
    }

    async fn record_usage(&self, account_id: &str, cap_usage: &BTreeMap<String, u64>) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.lock().get_mut(account_id) {
            account.cap_usage = cap_usage.clone();
        }
        Ok(())
    }
}

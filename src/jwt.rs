//! Component D — verifying a websocket client's password as a JWT against
//! its username.
//!
//! The MQTT username is a JSON document `{ id, payload }`; the password is
//! an HS256 JWT signed with that account's secret, whose own payload must
//! equal `username.payload` exactly and must still be within its stated
//! validity window.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use thiserror::Error;

use crate::account::AccountCache;
use crate::store::AccountStore;
use crate::value::Document;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username is not valid JSON")]
    UsernameNotJson,
    #[error("username is missing an `id` field")]
    MissingId,
    #[error("no account is known for id '{0}'")]
    UnknownAccount(String),
    #[error("account has no JWT secret on record")]
    MissingSecret,
    #[error("JWT signature verification failed: {0}")]
    Verification(#[source] jsonwebtoken::errors::Error),
    #[error("JWT payload does not match the username's payload")]
    PayloadMismatch,
    #[error("JWT is expired or missing validity/iat claims")]
    Expired,
}

/// The parsed username document and the JWT payload it claims, once both
/// have been checked to agree with each other.
#[derive(Debug)]
pub struct VerifiedIdentity {
    pub account_id: String,
    pub username_doc: Document,
}

impl From<VerifiedIdentity> for crate::dispatch::Identity {
    fn from(verified: VerifiedIdentity) -> Self {
        crate::dispatch::Identity::WebsocketUser {
            account_id: verified.account_id,
            username_doc: verified.username_doc,
        }
    }
}

/// Verify `password` as an HS256 JWT against `account_secret`, and check
/// that its payload structurally matches `username`'s embedded `payload`
/// field and that it has not expired.
pub fn verify(username: &str, password: &str, account_secret: &str) -> Result<VerifiedIdentity, AuthError> {
    let username_json: Value = serde_json::from_str(username).map_err(|_| AuthError::UsernameNotJson)?;
    let username_doc = Document::from(username_json);

    let account_id = username_doc
        .get("id")
        .and_then(Document::as_str)
        .ok_or(AuthError::MissingId)?
        .to_owned();

    let mut validation = Validation::new(Algorithm::HS256);
    // The payload carries its own `iat`/`validity` pair, checked below with
    // the exact semantics the original plugin uses; jsonwebtoken's builtin
    // `exp`/`nbf` checks don't apply to this token shape.
    validation.required_spec_claims.clear();
    validation.validate_exp = false;

    let key = DecodingKey::from_secret(account_secret.as_bytes());
    let token = decode::<Value>(password, &key, &validation).map_err(AuthError::Verification)?;
    let jwt_payload = Document::from(token.claims);

    let username_payload = username_doc.get("payload").cloned().unwrap_or(Document::Null);
    if jwt_payload != username_payload {
        return Err(AuthError::PayloadMismatch);
    }

    let validity = jwt_payload.get("validity").and_then(Document::as_f64);
    let iat = jwt_payload.get("iat").and_then(Document::as_f64);
    let now = crate::clock::unix_timestamp() as f64;
    match (iat, validity) {
        (Some(iat), Some(validity)) if iat + validity > now => {}
        _ => return Err(AuthError::Expired),
    }

    Ok(VerifiedIdentity {
        account_id,
        username_doc,
    })
}

/// The full basic-auth callback: look up the claimed account's JWT secret
/// in `accounts`, triggering one on-demand refetch from `store` on a cache
/// miss (the account may have been created since the last periodic
/// refresh), then verify the password against whichever secret is found.
///
/// Mirrors the original plugin's `basic_auth_callback` step 3: an unknown
/// or secret-less account gets exactly one refetch-and-retry before
/// failing, not a retry loop.
pub async fn authenticate<S: AccountStore>(
    username: &str,
    password: &str,
    accounts: &AccountCache,
    store: &S,
) -> Result<VerifiedIdentity, AuthError> {
    let username_json: Value = serde_json::from_str(username).map_err(|_| AuthError::UsernameNotJson)?;
    let account_id = Document::from(username_json)
        .get("id")
        .and_then(Document::as_str)
        .ok_or(AuthError::MissingId)?
        .to_owned();

    let mut secret = accounts.jwt_secret(&account_id);
    if secret.is_none() {
        if let Err(error) = crate::tasks::refetch_once(store, accounts).await {
            tracing::warn!(%error, account_id, "on-demand account refetch failed");
        }
        secret = accounts.jwt_secret(&account_id);
    }
    let secret = secret.ok_or_else(|| AuthError::UnknownAccount(account_id.clone()))?;

    verify(username, password, &secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn signed_token(secret: &str, payload: &Value) -> String {
        encode(&Header::new(Algorithm::HS256), payload, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn accepts_matching_payload_within_validity() {
        let now = crate::clock::unix_timestamp();
        let payload = serde_json::json!({"id": "org1", "device": "dev1", "iat": now, "validity": 1000});
        let username = serde_json::json!({"id": "org1", "payload": payload}).to_string();
        let token = signed_token("s3cr3t", &payload);

        let identity = verify(&username, &token, "s3cr3t").unwrap();
        assert_eq!(identity.account_id, "org1");
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = crate::clock::unix_timestamp();
        let payload = serde_json::json!({"id": "org1", "iat": now, "validity": 1000});
        let username = serde_json::json!({"id": "org1", "payload": payload}).to_string();
        let token = signed_token("s3cr3t", &payload);

        assert!(matches!(verify(&username, &token, "wrong"), Err(AuthError::Verification(_))));
    }

    #[test]
    fn rejects_payload_that_diverges_from_username() {
        let now = crate::clock::unix_timestamp();
        let jwt_payload = serde_json::json!({"id": "org1", "iat": now, "validity": 1000});
        let username_payload = serde_json::json!({"id": "org1", "iat": now, "validity": 999});
        let username = serde_json::json!({"id": "org1", "payload": username_payload}).to_string();
        let token = signed_token("s3cr3t", &jwt_payload);

        assert!(matches!(verify(&username, &token, "s3cr3t"), Err(AuthError::PayloadMismatch)));
    }

    #[test]
    fn rejects_expired_token() {
        let expired_iat = crate::clock::unix_timestamp() - 1000;
        let payload = serde_json::json!({"id": "org1", "iat": expired_iat, "validity": 10});
        let username = serde_json::json!({"id": "org1", "payload": payload}).to_string();
        let token = signed_token("s3cr3t", &payload);

        assert!(matches!(verify(&username, &token, "s3cr3t"), Err(AuthError::Expired)));
    }

    #[test]
    fn rejects_non_json_username() {
        assert!(matches!(verify("not json", "irrelevant", "s3cr3t"), Err(AuthError::UsernameNotJson)));
    }

    #[tokio::test]
    async fn authenticate_refetches_once_on_a_cold_cache() {
        use crate::store::{AccountDocument, InMemoryAccountStore};

        let now = crate::clock::unix_timestamp();
        let payload = serde_json::json!({"id": "org1", "device": "dev1", "iat": now, "validity": 1000});
        let username = serde_json::json!({"id": "org1", "payload": payload}).to_string();
        let token = signed_token("s3cr3t", &payload);

        let store = InMemoryAccountStore::new(vec![AccountDocument {
            id: "org1".to_owned(),
            jwt_secret: Some("s3cr3t".to_owned()),
            can_pay: true,
            cap_usage: Default::default(),
        }]);
        let accounts = AccountCache::new();
        assert!(accounts.jwt_secret("org1").is_none());

        let identity = authenticate(&username, &token, &accounts, &store).await.unwrap();
        assert_eq!(identity.account_id, "org1");
        assert!(accounts.jwt_secret("org1").is_some());
    }

    #[tokio::test]
    async fn authenticate_fails_when_account_stays_unknown_after_refetch() {
        use crate::store::InMemoryAccountStore;

        let now = crate::clock::unix_timestamp();
        let payload = serde_json::json!({"id": "ghost", "iat": now, "validity": 1000});
        let username = serde_json::json!({"id": "ghost", "payload": payload}).to_string();
        let token = signed_token("s3cr3t", &payload);

        let store = InMemoryAccountStore::new(vec![]);
        let accounts = AccountCache::new();

        assert!(matches!(
            authenticate(&username, &token, &accounts, &store).await,
            Err(AuthError::UnknownAccount(id)) if id == "ghost"
        ));
    }
}

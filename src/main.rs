//! Demonstration binary: wires an [`AclEngine`] to an in-memory account
//! store and a no-op firewall, runs the periodic maintenance tasks, and
//! exercises a handful of checks. Not a broker plugin — there is no
//! listener here, just proof the pieces assemble and run together.

use std::sync::Arc;

use fleet_broker_acl::account::AccountCache;
use fleet_broker_acl::config::Config;
use fleet_broker_acl::dispatch::{AclEngine, CheckRequest};
use fleet_broker_acl::ratelimit::NoopFirewall;
use fleet_broker_acl::store::{AccountDocument, InMemoryAccountStore};
use fleet_broker_acl::task::ShutdownHandle;
use fleet_broker_acl::tasks::{FlushMeterTask, RefetchAccountsTask};
use fleet_broker_acl::{Access, Decision};

fn main() -> anyhow::Result<()> {
    fleet_broker_acl::logging::init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env();
    tracing::info!(billing_service = ?config.billing_service_url, "starting");

    let store = Arc::new(InMemoryAccountStore::new(vec![AccountDocument {
        id: "org1".to_owned(),
        jwt_secret: Some("s3cr3t".to_owned()),
        can_pay: true,
        cap_usage: Default::default(),
    }]));

    let accounts = AccountCache::new();
    let refetch_interval = config.refetch_interval;
    let flush_interval = config.flush_interval;
    let engine = AclEngine::new(config, accounts.clone(), NoopFirewall::default());
    engine.init();
    tracing::info!(mqtt_version = engine.negotiate_version(), "negotiated protocol version");

    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();
    let _refetch = fleet_broker_acl::task::spawn_task(
        RefetchAccountsTask {
            store: store.clone(),
            cache: accounts.clone(),
            interval: refetch_interval,
        },
        shutdown_signal.clone(),
    );
    let _flush = fleet_broker_acl::task::spawn_task(
        FlushMeterTask {
            store: store.clone(),
            cache: accounts,
            interval: flush_interval,
        },
        shutdown_signal,
    );

    // Give the initial refetch a moment to populate the cache.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let now = fleet_broker_acl::clock::unix_timestamp();
    let payload = serde_json::json!({
        "id": "org1",
        "device": "dev1",
        "capability": "@scope/capName",
        "iat": now,
        "validity": 3600,
    });
    let username = serde_json::json!({"id": "org1", "payload": payload}).to_string();
    let secret = engine.accounts.jwt_secret("org1").expect("account cache was refreshed above");
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    let password = encode(&Header::new(Algorithm::HS256), &payload, &EncodingKey::from_secret(secret.as_bytes()))?;

    // The full basic-auth path: look up (and, on a miss, refetch) the
    // account before verifying, exactly as the broker's auth callback would.
    let identity = engine.basic_auth(&username, &password, store.as_ref()).await?;

    let req = CheckRequest {
        identity: Some(&identity),
        client_key: Some("client-1"),
        client_ip: "127.0.0.1",
        topic: Some("/org1/dev1/@scope/capName/0.1.0/status"),
        access: Access::Write,
        payload_len: 128,
    };
    let decision = engine.check(&req);
    tracing::info!(?decision, topic = ?req.topic, "check result");
    assert_eq!(decision, Decision::Allow);

    tokio::signal::ctrl_c().await.ok();
    shutdown_handle.signal();
    Ok(())
}

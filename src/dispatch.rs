//! Component G — `AclEngine`, the single object orchestrating A–F for each
//! connection event.
//!
//! [`AclEngine::check`] follows the same rule order as the plugin this
//! crate's logic was distilled from: public topics first, then superusers,
//! then read metering and quota enforcement, then identity-specific
//! matching (permission cache plus evaluator for websocket clients;
//! direct topic-grammar matching for capability and device clients).

use std::sync::Arc;

use crate::account::AccountCache;
use crate::cache::PermissionCache;
use crate::config::Config;
use crate::permission;
use crate::ratelimit::{FirewallControl, RateLimiter};
use crate::topic::TopicParts;
use crate::types::{Access, Decision};
use crate::value::Document;

/// The reserved topic every client, authenticated or not, may subscribe to.
pub const PUBLIC_TOPIC: &str = "$SYS/broker/uptime";
/// Usernames with this prefix bypass every other check.
pub const SUPERUSER_PREFIX: &str = "transitiverobotics:";
/// Usernames with this prefix identify a cloud capability, e.g.
/// `cap:scope/name`.
pub const CAPABILITY_PREFIX: &str = "cap:";
/// Reserved device id granting org-wide read access.
pub const FLEET_DEVICE: &str = "_fleet";

/// Who is making this request, as determined from the MQTT username. This
/// replaces sniffing the raw prefix at every call site with a single
/// up-front classification.
#[derive(Debug, Clone)]
pub enum Identity {
    /// A trusted internal service (`transitiverobotics:...` username).
    Superuser,
    /// A cloud capability, scoped to its own namespace org-wide
    /// (`cap:scope/name` username).
    Capability { scope: String, name: String },
    /// A robot/device identified by its org and device id
    /// (`org:device` username).
    Device { org: String, device: String },
    /// A websocket client presenting a JSON username and a JWT password,
    /// already verified by [`crate::jwt::verify`].
    WebsocketUser { account_id: String, username_doc: Document },
}

impl Identity {
    /// Classify a raw MQTT username into its identity shape. Returns
    /// `None` for a JSON (`{...}`) username — those must go through
    /// [`crate::jwt::verify`] instead, which both authenticates the client
    /// and produces a [`Identity::WebsocketUser`].
    pub fn classify(username: &str) -> Option<Self> {
        if username.starts_with(SUPERUSER_PREFIX) {
            return Some(Identity::Superuser);
        }
        if username.starts_with('{') {
            return None;
        }
        if let Some(rest) = username.strip_prefix(CAPABILITY_PREFIX) {
            let mut parts = rest.splitn(2, '/');
            let scope = parts.next()?.to_owned();
            let name = parts.next()?.to_owned();
            return Some(Identity::Capability { scope, name });
        }
        let mut parts = username.splitn(2, ':');
        let org = parts.next()?.to_owned();
        let device = parts.next()?.to_owned();
        Some(Identity::Device { org, device })
    }
}

/// Everything `AclEngine::check` needs to know about one ACL check.
///
/// `identity`, `client_key` and `topic` are `Option` because the broker
/// event they come from can omit them entirely — an unparseable or missing
/// username leaves no [`Identity`] to classify, and the broker callback
/// contract allows an absent topic or client id. `spec.md` §4.G rule 1
/// ("missing topic/id/username → DENY") takes priority over every other
/// rule, including the superuser bypass, so `check()` checks for `None`
/// (and for an empty string, broker-side shorthand for "absent") before
/// anything else.
#[derive(Debug, Clone)]
pub struct CheckRequest<'a> {
    pub identity: Option<&'a Identity>,
    /// An opaque key identifying the connected client, used for caching
    /// and rate-limiting (the original plugin uses the raw username).
    pub client_key: Option<&'a str>,
    pub client_ip: &'a str,
    pub topic: Option<&'a str>,
    pub access: Access,
    /// Payload size in bytes, used only for read metering.
    pub payload_len: u64,
}

/// The shared, cloneable ACL engine. Construct one, spawn its background
/// tasks (see [`crate::tasks`]), and call [`AclEngine::check`] from every
/// ACL callback.
#[derive(Clone)]
pub struct AclEngine<F> {
    pub config: Arc<Config>,
    pub accounts: AccountCache,
    pub permissions: PermissionCache,
    pub rate_limiter: RateLimiter<F>,
}

/// The only MQTT protocol version this engine's callbacks negotiate.
/// `negotiate_version` always returns this value — the broker-side plugin
/// only registers for MQTT 5 connections.
pub const SUPPORTED_MQTT_VERSION: u32 = 5;

impl<F: FirewallControl> AclEngine<F> {
    /// Build an engine from `config`, wiring its tunables into the
    /// permission cache's TTL and the rate limiter's sustained-write
    /// threshold rather than leaving either hardcoded to the crate-wide
    /// defaults.
    pub fn new(config: Config, accounts: AccountCache, firewall: F) -> Self {
        let permissions = PermissionCache::new(config.cache_ttl_secs);
        let rate_limiter = RateLimiter::with_threshold(firewall, config.rate_threshold);
        Self {
            config: Arc::new(config),
            accounts,
            permissions,
            rate_limiter,
        }
    }

    /// One-time startup side effect: clears the firewall's block list so a
    /// restarted process doesn't inherit a stale set from its previous run.
    /// Call once before the engine starts serving checks.
    pub fn init(&self) {
        self.rate_limiter.init_firewall();
        tracing::info!("acl engine initialized");
    }

    /// The broker's version-negotiation callback: the highest MQTT version
    /// this engine supports. Always [`SUPPORTED_MQTT_VERSION`] — there is
    /// no fallback to an earlier protocol version.
    pub fn negotiate_version(&self) -> u32 {
        SUPPORTED_MQTT_VERSION
    }

    /// The broker's basic-auth callback for a websocket client: verify its
    /// password as a JWT against the account its JSON username claims,
    /// refetching the account cache once on a miss. Returns the resulting
    /// [`Identity`] for immediate use in a following [`Self::check`], since
    /// the broker invokes auth and ACL checks as separate callbacks but
    /// this crate has no session state to stash the identity in between.
    pub async fn basic_auth<S: crate::store::AccountStore>(
        &self,
        username: &str,
        password: &str,
        store: &S,
    ) -> Result<Identity, crate::jwt::AuthError> {
        let verified = crate::jwt::authenticate(username, password, &self.accounts, store).await?;
        Ok(verified.into())
    }

    /// Decide ALLOW/DENY for one ACL check.
    pub fn check(&self, req: &CheckRequest<'_>) -> Decision {
        // Rule 1 (`spec.md` §4.G): a missing topic, client id, or username
        // (here: an unclassifiable identity) denies unconditionally, ahead
        // of every other rule including the public-topic and superuser
        // bypasses below. An empty string is treated the same as absent.
        let present = |value: Option<&str>| value.is_some_and(|v| !v.is_empty());
        if !present(req.topic) || !present(req.client_key) || req.identity.is_none() {
            tracing::warn!("denied: missing topic, client id, or username");
            return Decision::Deny;
        }
        let topic_str = req.topic.expect("checked above");
        let client_key = req.client_key.expect("checked above");
        let identity = req.identity.expect("checked above");

        if topic_str == PUBLIC_TOPIC {
            return Decision::Allow;
        }

        if matches!(identity, Identity::Superuser) {
            return Decision::Allow;
        }

        let topic = TopicParts::parse(topic_str);

        // The metered usage bucket is keyed by the topic's bare `name`
        // segment (`topicParts[4]` in the original), not the `scope/name`
        // pair the permission evaluator matches against.
        if req.access == Access::Read && !topic_str.starts_with('$') {
            if let (Some(account_id), Some(capability)) = (topic.org(), topic.name()) {
                let total = self.accounts.record_read(account_id, capability, req.payload_len);
                if !self.accounts.can_pay(account_id) && total > self.config.max_bytes && capability == self.config.metered_capability
                {
                    tracing::warn!(account_id, capability, total, "denied: over metered quota");
                    return Decision::Deny;
                }
            }
        }

        let read_access = req.access.is_read();

        match identity {
            Identity::Superuser => unreachable!("handled above"),
            Identity::WebsocketUser { username_doc, .. } => {
                let decision = if self.permissions.is_allowed(client_key, topic_str) {
                    Decision::Allow
                } else if permission::evaluate(&topic, username_doc, read_access) {
                    self.permissions.record_allow(client_key, topic_str);
                    Decision::Allow
                } else {
                    Decision::Deny
                };
                // Websocket clients are authenticated per-message by their
                // JWT-backed permission token, not by sustained write
                // volume; only capability/device clients are subject to
                // the write-rate limiter below.
                decision
            }
            Identity::Capability { scope, name } => {
                self.rate_limit_write(client_key, req.client_ip, req.access);
                match (topic.scope(), topic.name()) {
                    (Some(s), Some(n)) if s == scope && n == name => Decision::Allow,
                    _ => Decision::Deny,
                }
            }
            Identity::Device { org, device } => {
                self.rate_limit_write(client_key, req.client_ip, req.access);
                let Some(topic_org) = topic.org() else {
                    return Decision::Deny;
                };
                if topic_org != org {
                    return Decision::Deny;
                }
                if read_access && topic.device() == Some(FLEET_DEVICE) {
                    return Decision::Allow;
                }
                match topic.device() {
                    Some(d) if d == device => Decision::Allow,
                    _ => Decision::Deny,
                }
            }
        }
    }

    fn rate_limit_write(&self, client_key: &str, client_ip: &str, access: Access) {
        if access == Access::Write {
            self.rate_limiter.record_write(client_key, client_ip);
        }
    }

    /// Release any per-client state kept for a disconnecting client.
    pub fn on_disconnect(&self, client_key: &str) {
        self.permissions.remove_client(client_key);
        self.rate_limiter.remove_client(client_key);
    }
}

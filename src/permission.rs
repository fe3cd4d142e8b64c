//! Component B — permission evaluator.
//!
//! Matches a parsed topic against a websocket client's permission token
//! (the `payload` embedded in its JSON username, already verified against
//! the JWT in the password by [`crate::jwt`]). Malformed input never
//! produces an error channel — it simply denies, per `spec.md` §4.B.

use crate::topic::TopicParts;
use crate::value::Document;

/// The reserved capability identifying the per-device management agent.
/// Any valid device token also confers read access to this capability, and
/// a `_fleet` token confers org-wide read access to it.
pub const AGENT_CAPABILITY: &str = "@transitive-robotics/_robot-agent";

/// Reserved device identifier granting org-wide (read-mostly) scope.
pub const FLEET_DEVICE: &str = "_fleet";

/// Decide ALLOW/DENY for a websocket client's permission token against a
/// requested topic.
///
/// `username_doc` is the parsed JSON username: `{ id, payload: { id, device,
/// capability, iat, validity, topics? } }`. `read_access` is
/// `access ∈ {READ, SUBSCRIBE}` as decided by the caller.
pub fn evaluate(topic: &TopicParts, username_doc: &Document, read_access: bool) -> bool {
    if topic.len() < 5 {
        return false;
    }

    // Topic parts referenced below are all guaranteed present by the length
    // check (indices 1..=4); `unwrap_or_default` only guards the compiler.
    let org = topic.org().unwrap_or_default();
    let device = topic.device().unwrap_or_default();
    let capability = topic.capability().unwrap_or_default();
    let sub = topic.sub_path();

    let Some(payload) = username_doc.get("payload") else {
        return false;
    };

    let doc_id = username_doc.get("id").and_then(Document::as_str);
    let payload_id = payload.get("id").and_then(Document::as_str);

    // Preconditions: claimed org must match both the outer id and the topic.
    let Some(doc_id) = doc_id else { return false };
    let Some(payload_id) = payload_id else { return false };
    if doc_id != payload_id || doc_id != org {
        return false;
    }

    let Some(validity) = payload.get("validity").and_then(Document::as_f64) else {
        return false;
    };
    let Some(iat) = payload.get("iat").and_then(Document::as_f64) else {
        return false;
    };
    let now = crate::clock::unix_timestamp() as f64;
    if iat + validity <= now {
        return false;
    }

    let payload_device = payload.get("device").and_then(Document::as_str);
    let payload_capability = payload.get("capability").and_then(Document::as_str);

    let device_match = payload_device == Some(device);
    let cap_match = payload_capability == Some(capability.as_str());
    let agent_permission = payload_capability == Some(AGENT_CAPABILITY);
    let agent_requested = capability == AGENT_CAPABILITY;
    let fleet_permission = payload_device == Some(FLEET_DEVICE);
    let no_topic_constraints = payload.get("topics").is_none();

    let topics_allow = no_topic_constraints
        || payload
            .get("topics")
            .is_some_and(|topics| topics.any_str_is_prefix_of(&sub));

    // Rule 1: device-scoped token with matching (or agent) capability,
    // subject to any `topics` sub-path restriction.
    let rule1 = device_match && (cap_match || agent_permission) && topics_allow;
    // Rule 2: any valid device token also grants read access to the agent topic.
    let rule2 = device_match && read_access && agent_requested;
    // Rule 3: a fleet token grants read access to every device's agent topic.
    let rule3 = fleet_permission && read_access && agent_requested && no_topic_constraints;
    // Rule 4: a fleet token grants full access to its specific capability, org-wide.
    let rule4 = fleet_permission && (cap_match || agent_permission) && no_topic_constraints;

    rule1 || rule2 || rule3 || rule4
}

//! Idempotency keys and content hashes.
//!
//! Keys are digests over `(org_id, workflow_id, step_name, hash(input))`
//! where the input is the step's *declared* payload. A sampling rewrite of
//! the request shape therefore never changes the key of a step.

use serde::Serialize;
use uuid::Uuid;

use crate::service::hash::ContentHasher;

const FIELD_SEPARATOR: char = '\u{1f}';

/// Serialize `value` as JSON with object keys sorted at every level.
///
/// Going through `serde_json::Value` sorts keys, since its map is a `BTreeMap`.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_value(value)?.to_string())
}

/// Hash of any serializable payload, independent of field order.
pub fn content_hash<T: Serialize>(
    hasher: &dyn ContentHasher,
    value: &T,
) -> Result<String, serde_json::Error> {
    Ok(hasher.compute_hash(&canonical_json(value)?))
}

/// Deterministic idempotency key for one step of one workflow.
pub fn idempotency_key<T: Serialize>(
    hasher: &dyn ContentHasher,
    org_id: &str,
    workflow_id: Uuid,
    step_name: &str,
    input: &T,
) -> Result<String, serde_json::Error> {
    let input_hash = content_hash(hasher, input)?;
    let material = [org_id, &workflow_id.to_string(), step_name, &input_hash]
        .join(&FIELD_SEPARATOR.to_string());
    Ok(hasher.compute_hash(&material))
}

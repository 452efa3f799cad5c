//! Row identity
//!
//! All deterministic ids are `digest128` over a `_`-joined string, so the
//! same inputs give the same id on every run and in every other
//! implementation using the same digest.

use crate::normalize::types::RecordId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;

/// Digest bytes read; 15 bytes encode to 20 base64 characters without padding
const DIGEST_LEN: usize = 15;

/// Base64 of 15 bytes of SHAKE-128 output over `value`
pub fn digest128(value: &str) -> String {
    let mut hasher = Shake128::default();
    hasher.update(value.as_bytes());

    let mut digest = [0u8; DIGEST_LEN];
    hasher.finalize_xof().read(&mut digest);
    STANDARD.encode(digest)
}

/// Id of the row at `position` in the list that produced `child_table`
/// under parent `parent_id`
pub fn child_row_id(parent_id: &RecordId, child_table: &str, position: usize) -> RecordId {
    RecordId(digest128(&format!("{}_{}_{}", parent_id, child_table, position)))
}

/// Id derived from primary key values, in the order given
pub fn primary_key_id(key: &Map<String, Value>) -> RecordId {
    let joined = key.values().map(key_string).collect::<Vec<_>>().join("_");
    RecordId(digest128(&joined))
}

/// A fresh id that is not reproducible across runs
pub fn random_id() -> RecordId {
    RecordId(digest128(&uuid::Uuid::new_v4().simple().to_string()))
}

/// String form of a key value. Booleans and null render as `True`, `False`
/// and `None`, which keeps ids identical to existing loads.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

//! Callback authentication and id generation.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Bearer token the agent must present on its result callback, derived
/// from the control-plane secret and the execution id. Stateless: the
/// callback route re-derives and compares.
pub fn callback_token(secret: &str, execution_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(execution_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short random id with a type prefix, e.g. `sess-3fa09c21d4b7`.
pub fn new_id(prefix: &str) -> String {
    let suffix: u64 = rand::rng().random();
    format!("{prefix}-{:012x}", suffix & 0xffff_ffff_ffff)
}

//! Deterministic bucketing.
//!
//! All SDK implementations must produce the same bucket for the same inputs, so everything
//! here is integer math on a SHA-256 prefix. No floating point.
use base64::Engine;
use sha2::{Digest, Sha256};

/// Size of the pass-percentage bucket space. `passPercentage` is scaled by 100 before being
/// compared against `hash % BUCKET_SPACE`.
pub const BUCKET_SPACE: u64 = 10_000;

/// Size of the `user_bucket` condition space.
pub const USER_BUCKET_SPACE: u64 = 1_000;

/// Hash a string to the 64-bit bucketing space: the first 8 bytes of SHA-256, big-endian.
pub fn compute_user_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

/// Return `true` if `unit_id` falls within `pass_percentage` for the given salts.
///
/// The rule salt defaults to the rule id when the rule carries no salt of its own; callers
/// resolve that before calling here.
pub fn passes_percentage(
    spec_salt: &str,
    rule_salt: &str,
    unit_id: &str,
    pass_percentage: f64,
) -> bool {
    if pass_percentage <= 0.0 {
        return false;
    }
    if pass_percentage >= 100.0 {
        return true;
    }
    let hash = compute_user_hash(&format!("{spec_salt}.{rule_salt}.{unit_id}"));
    hash % BUCKET_SPACE < (pass_percentage * 100.0) as u64
}

/// Bucket for `user_bucket` conditions: `h(salt.unit_id) % 1000`.
pub fn user_bucket(salt: &str, unit_id: &str) -> u64 {
    compute_user_hash(&format!("{salt}.{unit_id}")) % USER_BUCKET_SPACE
}

/// Membership token for server-side ID lists: base64 of the SHA-256 digest, truncated to 8
/// characters. This matches the token format the list service hands out.
pub fn segment_list_token(unit_id: &str) -> String {
    let digest = Sha256::digest(unit_id.as_bytes());
    let encoded = base64::engine::general_purpose::STANDARD.encode(digest);
    encoded[..8].to_string()
}

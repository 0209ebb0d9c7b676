//! Signed interactive payload verification: HMAC-SHA256 over
//! `"v0:{timestamp}:{body}"`, constant-time comparison, 300-second
//! timestamp freshness window.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed clock skew between the presented timestamp and now.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

/// Compute the expected signature header value: `"v0=" + lowercase hex`.
pub fn compute_signature(secret: &str, timestamp: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a presented signature. Fails on stale timestamps (more than
/// [`MAX_TIMESTAMP_SKEW_SECS`] from `now_unix`), malformed signatures, and
/// MAC mismatch. The comparison is constant-time via `Mac::verify_slice`.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    body: &str,
    presented: &str,
    now_unix: i64,
) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now_unix - ts).abs() > MAX_TIMESTAMP_SKEW_SECS {
        return false;
    }

    let Some(hex_part) = presented.strip_prefix("v0=") else {
        return false;
    };
    let Ok(presented_bytes) = hex::decode(hex_part) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    mac.verify_slice(&presented_bytes).is_ok()
}

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

/// Decodes the payload (middle) segment of a three-part identity token.
///
/// Returns `None` on any malformation: wrong segment count, invalid
/// base64url, or invalid JSON. Signature verification is the provider's
/// job; this only inspects claims the client needs for local decisions.
#[must_use]
pub fn decode_claims(token: &str) -> Option<JsonValue> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload_bytes = URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    serde_json::from_slice(&payload_bytes).ok()
}

/// Reads the `exp` claim (epoch seconds) from an identity token.
///
/// `None` if the token is malformed or the claim is absent or non-numeric.
#[must_use]
pub fn expires_at(token: &str) -> Option<f64> {
    decode_claims(token)?.get("exp")?.as_f64()
}

/// Whether the token's expiry is strictly in the future at `now`.
///
/// A missing, non-numeric, or zero `exp` claim fails closed.
#[must_use]
pub fn is_current(token: &str, now: OffsetDateTime) -> bool {
    match expires_at(token) {
        Some(exp) => exp * 1000.0 > (now.unix_timestamp_nanos() / 1_000_000) as f64,
        None => false,
    }
}

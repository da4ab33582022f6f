//! Local staleness check for JWT access tokens
//!
//! The client never verifies signatures; it only peeks at the `exp` claim so
//! an access token that has visibly expired can be renewed before it is sent.
//! Anything that does not parse as a three-part JWT with a numeric `exp` is
//! treated as "expiry unknown".

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Expiry of `token` as unix seconds, if it is a JWT with an `exp` claim.
pub fn expires_at(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    exp.as_u64()
        .or_else(|| exp.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Whether `token` is known to be expired at `now_secs`.
///
/// `leeway_secs` treats tokens that expire within that window as already
/// expired, covering the request's own flight time.
pub fn is_expired(token: &str, now_secs: u64, leeway_secs: u64) -> bool {
    expires_at(token).is_some_and(|exp| exp <= now_secs.saturating_add(leeway_secs))
}

#[cfg(test)]
pub(crate) fn encode_for_test(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_exp_claim() {
        let token = encode_for_test(&serde_json::json!({"sub": "42", "exp": 1_700_000_000u64}));
        assert_eq!(expires_at(&token), Some(1_700_000_000));
    }

    #[test]
    fn fractional_exp_is_truncated() {
        let token = encode_for_test(&serde_json::json!({"exp": 1_700_000_000.75}));
        assert_eq!(expires_at(&token), Some(1_700_000_000));
    }

    #[test]
    fn opaque_tokens_have_unknown_expiry() {
        assert_eq!(expires_at("A1"), None);
        assert_eq!(expires_at("a.b"), None);
        assert_eq!(expires_at("a.b.c.d"), None);
        assert_eq!(expires_at("a.!!!.c"), None);
    }

    #[test]
    fn missing_exp_is_unknown() {
        let token = encode_for_test(&serde_json::json!({"sub": "42"}));
        assert_eq!(expires_at(&token), None);
        assert!(!is_expired(&token, u64::MAX, 0));
    }

    #[test]
    fn expiry_respects_leeway() {
        let token = encode_for_test(&serde_json::json!({"exp": 1_000u64}));
        assert!(!is_expired(&token, 900, 30));
        assert!(is_expired(&token, 980, 30));
        assert!(is_expired(&token, 1_000, 0));
        assert!(is_expired(&token, 5_000, 0));
    }

    #[test]
    fn padded_payload_is_accepted() {
        let token = encode_for_test(&serde_json::json!({"exp": 1u64}));
        let mut parts: Vec<String> = token.split('.').map(str::to_owned).collect();
        parts[1].push_str("==");
        assert_eq!(expires_at(&parts.join(".")), Some(1));
    }
}

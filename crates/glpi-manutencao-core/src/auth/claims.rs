//! Unverified credential decoding and local expiry checks.
//!
//! Only the payload segment of the credential is read. The signature is
//! trusted to the backend; these checks exist to redirect early without a
//! wasted round-trip.

use std::collections::BTreeSet;

use base64::{engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD}, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::TokenStore;

/// Default clock-skew tolerance subtracted from `exp`, in seconds.
pub const DEFAULT_SKEW_SECS: i64 = 30;

/// Decoded credential payload.
///
/// Numeric claims that are not numbers decode as `None` rather than failing
/// the whole payload, so a malformed `exp` still reads as expired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub groups: BTreeSet<String>,
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Claims this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Expiry as a timestamp, if the credential carries one
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Issue time as a timestamp, if present
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| DateTime::from_timestamp(iat, 0))
    }

    /// Seconds left before `exp`, clamped at zero. `None` without `exp`.
    pub fn seconds_until_expiry(&self, now: i64) -> Option<i64> {
        self.exp.map(|exp| exp.saturating_sub(now).max(0))
    }

    /// Whether these claims are expired at `now` given `skew_secs` tolerance
    pub fn is_expired_at(&self, skew_secs: i64, now: i64) -> bool {
        match self.exp {
            Some(exp) => now >= exp.saturating_sub(skew_secs.max(0)),
            None => true,
        }
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Base64url segment to text: `-`/`_` mapped to the standard alphabet and
/// padded to a multiple of four before decoding.
fn decode_segment(segment: &str) -> Option<String> {
    let mut encoded: String = segment
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while encoded.len() % 4 != 0 {
        encoded.push('=');
    }

    let bytes = STANDARD.decode(encoded.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Decode the claims of a credential without checking its signature.
///
/// Returns `None` for fewer than two segments or any decode/parse failure.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() < 2 {
        debug!(segments = segments.len(), "Credential has no payload segment");
        return None;
    }

    let payload = match decode_segment(segments[1]) {
        Some(payload) => payload,
        None => {
            debug!("Credential payload is not base64url text");
            return None;
        }
    };

    match serde_json::from_str(&payload) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!(error = %e, "Credential payload is not a claims object");
            None
        }
    }
}

/// Decode the claims of the currently stored credential
pub fn decode_stored(store: &dyn TokenStore) -> Option<Claims> {
    store.get().and_then(|token| decode_claims(&token))
}

/// Encode claims as an unpadded base64url payload segment
pub fn encode_claims(claims: &Claims) -> String {
    // Serializing a struct of strings, sets and a JSON map cannot fail
    let json = serde_json::to_vec(claims).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Whether `token` must be treated as expired at `now`.
///
/// Fail-closed: no token, undecodable claims, or a missing `exp` all count
/// as expired. Negative skew is clamped to zero.
pub fn is_expired_at(token: Option<&str>, skew_secs: i64, now: i64) -> bool {
    match token.and_then(decode_claims) {
        Some(claims) => claims.is_expired_at(skew_secs, now),
        None => true,
    }
}

/// `is_expired_at` against the system clock
pub fn is_expired(token: Option<&str>, skew_secs: i64) -> bool {
    is_expired_at(token, skew_secs, Utc::now().timestamp())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;

    const NOW: i64 = 1_760_000_000;

    /// Build an unsigned credential around the given claims
    pub(crate) fn make_token(claims: &Claims) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        format!("{}.{}.signature", header, encode_claims(claims))
    }

    pub(crate) fn token_expiring_at(exp: i64) -> String {
        make_token(&Claims {
            sub: Some("42".to_string()),
            exp: Some(exp),
            ..Default::default()
        })
    }

    #[test]
    fn test_not_expired_outside_skew() {
        let token = token_expiring_at(NOW + 100);
        assert!(!is_expired_at(Some(token.as_str()), 30, NOW));
    }

    #[test]
    fn test_expired_inside_skew() {
        let token = token_expiring_at(NOW + 10);
        assert!(is_expired_at(Some(token.as_str()), 30, NOW));
    }

    #[test]
    fn test_expiry_boundary_is_expired() {
        // now == exp - skew counts as expired
        let token = token_expiring_at(NOW + 30);
        assert!(is_expired_at(Some(token.as_str()), 30, NOW));
        assert!(!is_expired_at(Some(token.as_str()), 30, NOW - 1));
    }

    #[test]
    fn test_negative_skew_is_clamped() {
        let token = token_expiring_at(NOW + 5);
        assert!(!is_expired_at(Some(token.as_str()), -100, NOW));
        assert!(is_expired_at(Some(token.as_str()), -100, NOW + 5));
    }

    #[test]
    fn test_missing_exp_is_expired() {
        let token = make_token(&Claims {
            sub: Some("42".to_string()),
            ..Default::default()
        });
        assert!(is_expired_at(Some(token.as_str()), 30, NOW));
        assert!(is_expired_at(Some(token.as_str()), 0, 0));
    }

    #[test]
    fn test_non_numeric_exp_is_expired() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        for payload in [r#"{"exp":"tomorrow"}"#, r#"{"exp":null}"#, r#"{"exp":[1]}"#] {
            let token = format!("{}.{}.", header, URL_SAFE_NO_PAD.encode(payload));
            let claims = decode_claims(&token).expect("payload is an object");
            assert_eq!(claims.exp, None);
            assert!(is_expired_at(Some(token.as_str()), 30, NOW));
        }
    }

    #[test]
    fn test_no_token_is_expired() {
        assert!(is_expired_at(None, 30, NOW));
    }

    #[test]
    fn test_fewer_than_two_segments() {
        assert_eq!(decode_claims(""), None);
        assert_eq!(decode_claims("justonesegment"), None);
        assert!(is_expired_at(Some("justonesegment"), 30, NOW));
    }

    #[test]
    fn test_malformed_payloads_decode_to_none() {
        assert_eq!(decode_claims("a.!!!notbase64!!!.c"), None);
        // Valid base64, invalid UTF-8
        let bad_utf8 = URL_SAFE_NO_PAD.encode([0xff, 0xfe, 0xfd]);
        assert_eq!(decode_claims(&format!("a.{}.c", bad_utf8)), None);
        // Valid text, not a JSON object
        let not_object = URL_SAFE_NO_PAD.encode("[1,2,3]");
        assert_eq!(decode_claims(&format!("a.{}.c", not_object)), None);
        // Length that no amount of padding fixes
        assert_eq!(decode_claims("a.abcde.c"), None);
    }

    #[test]
    fn test_two_segments_are_enough() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"7"}"#);
        let claims = decode_claims(&format!("header.{}", payload)).expect("claims");
        assert_eq!(claims.sub.as_deref(), Some("7"));
    }

    #[test]
    fn test_url_safe_alphabet_and_padding() {
        // Unpadded segment using '_' in place of '/'
        let claims = decode_claims("h.eyJzdWIiOiI_Pz4_Pz4_Pz4ifQ.s").expect("claims");
        assert_eq!(claims.sub.as_deref(), Some("??>??>??>"));

        // Already padded segment is accepted as-is
        let claims = decode_claims("h.eyJzdWIiOiI_Pz4_Pz4_Pz4ifQ==.s").expect("claims");
        assert_eq!(claims.sub.as_deref(), Some("??>??>??>"));
    }

    #[test]
    fn test_numeric_sub_is_kept_as_text() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":1234,"exp":1760000100.9}"#);
        let claims = decode_claims(&format!("h.{}.s", payload)).expect("claims");
        assert_eq!(claims.sub.as_deref(), Some("1234"));
        assert_eq!(claims.exp, Some(1_760_000_100));
    }

    #[test]
    fn test_round_trip() {
        let mut extra = Map::new();
        extra.insert("tenant".to_string(), Value::String("hospital".to_string()));

        let claims = Claims {
            sub: Some("ana".to_string()),
            display_name: Some("Ana Conceição".to_string()),
            email: Some("ana@example.org".to_string()),
            groups: ["tecnicos", "admin"].iter().map(|g| g.to_string()).collect(),
            iat: Some(NOW),
            exp: Some(NOW + 3600),
            extra,
        };

        let token = make_token(&claims);
        assert_eq!(decode_claims(&token), Some(claims));
    }

    #[test]
    fn test_decode_stored() {
        let store = MemoryTokenStore::new();
        assert_eq!(decode_stored(&store), None);

        store.set(&token_expiring_at(NOW));
        let claims = decode_stored(&store).expect("claims");
        assert_eq!(claims.exp, Some(NOW));
    }

    #[test]
    fn test_seconds_until_expiry() {
        let claims = Claims {
            exp: Some(NOW + 90),
            ..Default::default()
        };
        assert_eq!(claims.seconds_until_expiry(NOW), Some(90));
        assert_eq!(claims.seconds_until_expiry(NOW + 1000), Some(0));
        assert_eq!(Claims::default().seconds_until_expiry(NOW), None);
        assert_eq!(claims.expires_at().map(|t| t.timestamp()), Some(NOW + 90));
    }
}

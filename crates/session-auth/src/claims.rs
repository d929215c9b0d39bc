//! Local, unverified decoding of JWT claims.
//!
//! Claims are only used to reject an obviously expired token before any
//! network call. The signature is never checked here; the server decides.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token payload is not valid base64url: {0}")]
    Base64(String),

    #[error("token payload is not a JSON object: {0}")]
    Json(String),

    #[error("claim `{0}` has an unexpected type")]
    ClaimType(&'static str),
}

/// Claims read from the token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub subject: Option<String>,
    pub role: Option<String>,
    /// `exp`, seconds since the Unix epoch.
    pub expires_at: Option<i64>,
}

impl TokenClaims {
    /// A token expiring exactly at `now` counts as expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// Whether the token looks like `header.payload.signature`.
pub fn is_jwt_shaped(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3 && !parts[0].is_empty() && !parts[1].is_empty()
}

/// Decode the claims of a JWT-shaped token.
///
/// Returns `Ok(None)` for opaque tokens, which carry no local claims.
pub fn decode_claims(token: &str) -> Result<Option<TokenClaims>, ClaimsError> {
    if !is_jwt_shaped(token) {
        return Ok(None);
    }

    let payload = token.split('.').nth(1).unwrap_or_default();
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ClaimsError::Base64(e.to_string()))?;
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| ClaimsError::Json(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ClaimsError::Json("payload is not an object".into()));
    };

    let expires_at = match map.get("exp") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .map(Some)
            .ok_or(ClaimsError::ClaimType("exp"))?,
        Some(_) => return Err(ClaimsError::ClaimType("exp")),
    };

    let subject = ["sub", "user_id"]
        .iter()
        .find_map(|key| map.get(*key).and_then(scalar_to_string));
    let role = ["role", "rol"]
        .iter()
        .find_map(|key| map.get(*key).and_then(scalar_to_string));

    Ok(Some(TokenClaims {
        subject,
        role,
        expires_at,
    }))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opaque_tokens_have_no_claims() {
        assert_eq!(decode_claims("T").unwrap(), None);
        assert_eq!(decode_claims("a.b").unwrap(), None);
        assert_eq!(decode_claims(".payload.sig").unwrap(), None);
    }

    #[test]
    fn reads_subject_role_and_expiry() {
        let token = encode_test_token(&json!({"user_id": 7, "rol": "admin", "exp": 1_700_000_000}));
        let claims = decode_claims(&token).unwrap().unwrap();

        assert_eq!(claims.subject.as_deref(), Some("7"));
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert_eq!(claims.expires_at, Some(1_700_000_000));
    }

    #[test]
    fn fractional_exp_is_floored() {
        let token = encode_test_token(&json!({"sub": "u", "exp": 100.9}));
        assert_eq!(decode_claims(&token).unwrap().unwrap().expires_at, Some(100));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let claims = TokenClaims {
            subject: None,
            role: None,
            expires_at: Some(100),
        };
        assert!(claims.is_expired_at(100));
        assert!(claims.is_expired_at(101));
        assert!(!claims.is_expired_at(99));

        let no_exp = TokenClaims {
            expires_at: None,
            ..claims
        };
        assert!(!no_exp.is_expired_at(i64::MAX));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(matches!(
            decode_claims("aaa.!!!.sig"),
            Err(ClaimsError::Base64(_))
        ));

        let not_json = format!("aaa.{}.sig", URL_SAFE_NO_PAD.encode("hello"));
        assert!(matches!(decode_claims(&not_json), Err(ClaimsError::Json(_))));

        let bad_exp = encode_test_token(&json!({"exp": "tomorrow"}));
        assert_eq!(decode_claims(&bad_exp), Err(ClaimsError::ClaimType("exp")));
    }
}

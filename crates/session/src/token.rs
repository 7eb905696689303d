//! Access token claim decoding and expiry checks
//!
//! Tokens are only decoded, never verified. The API verifies signatures; the
//! client just needs to know who the token is for and when it stops working.

use crate::error::SessionError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value;

/// Claims derived from an access token on demand. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Subject (user ID), from `sub` or `user_id`
    pub subject: Option<String>,
    /// Expiration time (as UTC timestamp)
    pub expires_at: i64,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    exp: Option<Value>,
}

/// Decodes access tokens and answers expiry questions. Pure.
pub struct TokenValidator;

impl TokenValidator {
    /// Decode the claims of a compact JWS access token.
    pub fn decode(access_token: &str) -> Result<AccessTokenClaims, SessionError> {
        let mut segments = access_token.trim().split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(SessionError::Decode(
                "expected three dot-separated segments".into(),
            ));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| SessionError::Decode(format!("payload is not base64url: {e}")))?;
        let raw: RawClaims = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::Decode(format!("payload is not a claims object: {e}")))?;

        let expires_at = raw
            .exp
            .as_ref()
            .and_then(numeric_date)
            .ok_or_else(|| SessionError::Decode("missing or invalid `exp` claim".into()))?;
        let subject = raw.sub.or(raw.user_id).as_ref().and_then(subject_text);

        Ok(AccessTokenClaims {
            subject,
            expires_at,
        })
    }

    /// True iff the token expired strictly before `now` (epoch seconds).
    pub fn is_expired(claims: &AccessTokenClaims, now: i64) -> bool {
        claims.expires_at < now
    }
}

#[allow(clippy::cast_possible_truncation)]
fn numeric_date(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        _ => None,
    }
}

fn subject_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Source of the current time in epoch seconds.
pub trait Clock {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde::Serialize;

    #[derive(Serialize)]
    struct DjangoClaims {
        token_type: &'static str,
        exp: i64,
        iat: i64,
        jti: &'static str,
        user_id: i64,
    }

    #[derive(Serialize)]
    struct StandardClaims {
        sub: String,
        exp: i64,
    }

    fn sign<T: Serialize>(claims: &T) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_round_trips_expiry() {
        for exp in [0, 1_000, 1_700_000_000, 4_102_444_800] {
            let token = sign(&StandardClaims {
                sub: "user-1".into(),
                exp,
            });
            let claims = TokenValidator::decode(&token).unwrap();
            assert_eq!(claims.expires_at, exp);
            assert_eq!(claims.subject.as_deref(), Some("user-1"));
        }
    }

    #[test]
    fn test_decode_numeric_user_id() {
        let token = sign(&DjangoClaims {
            token_type: "access",
            exp: 1_000,
            iat: 700,
            jti: "abc",
            user_id: 42,
        });
        let claims = TokenValidator::decode(&token).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("42"));
        assert_eq!(claims.expires_at, 1_000);
    }

    #[test]
    fn test_decode_ignores_signature() {
        let token = sign(&StandardClaims {
            sub: "u".into(),
            exp: 5,
        });
        let (unsigned, _) = token.rsplit_once('.').unwrap();
        let tampered = format!("{unsigned}.not-a-real-signature");
        assert_eq!(TokenValidator::decode(&tampered).unwrap().expires_at, 5);
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        for token in ["", "T2", "a.b", "a.b.c.d", "x.!!!.y"] {
            assert!(
                matches!(TokenValidator::decode(token), Err(SessionError::Decode(_))),
                "{token:?} should not decode"
            );
        }

        let no_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode(b"not json"));
        assert!(TokenValidator::decode(&no_json).is_err());

        let no_exp = format!("h.{}.s", URL_SAFE_NO_PAD.encode(br#"{"sub":"u"}"#));
        assert!(TokenValidator::decode(&no_exp).is_err());

        let text_exp = format!("h.{}.s", URL_SAFE_NO_PAD.encode(br#"{"exp":"soon"}"#));
        assert!(TokenValidator::decode(&text_exp).is_err());
    }

    #[test]
    fn test_decode_tolerates_padding() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":12}"#);
        let token = format!("h.{payload}.s");
        assert_eq!(TokenValidator::decode(&token).unwrap().expires_at, 12);
    }

    #[test]
    fn test_is_expired_is_strict() {
        let claims = AccessTokenClaims {
            subject: None,
            expires_at: 1_000,
        };
        assert!(!TokenValidator::is_expired(&claims, 999));
        assert!(!TokenValidator::is_expired(&claims, 1_000));
        assert!(TokenValidator::is_expired(&claims, 1_001));
        assert!(TokenValidator::is_expired(&claims, 2_000));
    }
}

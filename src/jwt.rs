//! Access-token payload introspection.
//!
//! Bearer tokens issued by the realm are JWTs; the payload segment carries
//! claims (subject, roles, expiry) that clients occasionally want to read
//! locally. Signatures are not verified here, this is introspection only.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};

/// Decoded JWT payload.
#[derive(Debug, Clone)]
pub struct Jwt {
    pub payload: Map<String, Value>,
}

impl Jwt {
    /// Decode the payload segment of an access token.
    ///
    /// Returns `None` when the token is not a three-segment JWT or its
    /// payload is not a base64url-encoded JSON object. Trailing padding is
    /// tolerated even though base64url payloads are normally unpadded.
    pub fn parse(access_token: &str) -> Option<Self> {
        let segments: Vec<&str> = access_token.split('.').collect();
        if segments.len() != 3 {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .ok()?;
        let payload = serde_json::from_slice::<Value>(&bytes).ok()?;
        let payload = payload.as_object()?.clone();
        Some(Self { payload })
    }

    /// Look up a single claim.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "eyJhbGciOiJSUzI1NiJ9.{}.c2lnbmF0dXJl",
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn parses_payload_claims() {
        let token = token_with_payload(r#"{"sub":"user-1","preferred_username":"u"}"#);
        let jwt = Jwt::parse(&token).unwrap();
        assert_eq!(jwt.claim("sub").and_then(Value::as_str), Some("user-1"));
        assert_eq!(
            jwt.claim("preferred_username").and_then(Value::as_str),
            Some("u")
        );
        assert!(jwt.claim("missing").is_none());
    }

    #[test]
    fn tolerates_padded_payload() {
        let padded = URL_SAFE.encode(r#"{"sub":"x"}"#);
        let token = format!("h.{padded}.s");
        let jwt = Jwt::parse(&token).unwrap();
        assert_eq!(jwt.claim("sub").and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(Jwt::parse("not-a-jwt").is_none());
        assert!(Jwt::parse("a.b").is_none());
        assert!(Jwt::parse("a.!!!.c").is_none());
        // payload decodes but is not an object
        let token = token_with_payload("[1,2,3]");
        assert!(Jwt::parse(&token).is_none());
    }
}

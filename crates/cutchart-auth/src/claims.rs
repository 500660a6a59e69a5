//! Identity claims decoded from JWTs
//!
//! Tokens arrive straight from the issuer over TLS, so only the payload is
//! decoded here; no signature check is attempted. Every lookup tolerates a
//! missing or malformed token and yields empty values instead.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde_json::{Map, Value};

/// The non-secret user attributes forwarded to telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityClaims {
    pub name: String,
    pub nickname: String,
    pub email: String,
    pub issuer: String,
    pub subject: String,
}

impl IdentityClaims {
    pub fn from_id_token(token: &str) -> Self {
        let Some(payload) = decode_payload(token) else {
            return Self::default();
        };
        Self {
            name: claim(&payload, "name"),
            nickname: claim(&payload, "nickname"),
            email: claim(&payload, "email"),
            issuer: claim(&payload, "iss"),
            subject: claim(&payload, "sub"),
        }
    }

    /// Claims as telemetry properties.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("nickname", self.nickname.clone()),
            ("email", self.email.clone()),
            ("issuer", self.issuer.clone()),
            ("subject", self.subject.clone()),
        ]
    }
}

/// The `exp` claim (unix seconds) of a JWT, if it has one.
pub fn jwt_expiry(token: &str) -> Option<u64> {
    decode_payload(token)?.get("exp")?.as_u64()
}

/// Decode the payload segment of a JWT into a JSON object.
pub fn decode_payload(token: &str) -> Option<Map<String, Value>> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn claim(payload: &Map<String, Value>, name: &str) -> String {
    match payload.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn encode_jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

// Client-side bearer token inspection.
//
// The client never verifies the signature (it has no key); it only decodes
// the payload segment to read identity claims and the expiry. The issuing
// server emits either the short claim names (`sub`, `email`) or the
// long-form namespaced ASP.NET claim URIs, so extraction follows an explicit
// precedence list: short names first, namespaced keys as fallback.

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

const CLAIM_NAME_ID: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
const CLAIM_EMAIL: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl TokenIdentity {
    pub fn numeric_user_id(&self) -> Option<i64> {
        self.user_id.parse().ok()
    }
}

/// Decode the payload segment of a JWT into a JSON object.
/// Returns `None` on any malformed input.
pub fn decode_payload(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    // JWT base64url is unpadded; tolerate padded emitters anyway.
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value.is_object().then_some(value)
}

/// A token is valid only while `exp` is in the future. Missing token,
/// malformed payload or missing `exp` all fail closed.
pub fn is_valid(token: &str) -> bool {
    match decode_payload(token) {
        Some(claims) => match claims.get("exp").and_then(Value::as_i64) {
            Some(exp) => exp > chrono::Utc::now().timestamp(),
            None => false,
        },
        None => false,
    }
}

fn str_claim<'a>(claims: &'a Value, key: &str) -> Option<&'a str> {
    claims
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Extract identity claims. Does not check expiry; callers that need a live
/// session go through `SessionStore::identity`.
pub fn identity(token: &str) -> Option<TokenIdentity> {
    let claims = decode_payload(token)?;
    let user_id = str_claim(&claims, "sub")
        .or_else(|| str_claim(&claims, CLAIM_NAME_ID))
        .unwrap_or_default()
        .to_string();
    let email = str_claim(&claims, "email")
        .or_else(|| str_claim(&claims, CLAIM_EMAIL))
        .or_else(|| str_claim(&claims, "sub"))
        .unwrap_or_default()
        .to_string();
    Some(TokenIdentity {
        user_id,
        email,
        first_name: str_claim(&claims, "firstName").unwrap_or_default().to_string(),
        last_name: str_claim(&claims, "lastName").unwrap_or_default().to_string(),
    })
}

//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays in process memory for the length of one interactive
//! login; the S256 challenge goes into the authorization URL so the issuer
//! can bind the later code exchange to this process.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Parameters for the front-channel authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a str,
    pub audience: Option<&'a str>,
    pub challenge: &'a str,
    pub state: &'a str,
}

/// Generate a random PKCE code verifier.
///
/// 64 random bytes encoded as URL-safe base64 without padding gives 86
/// characters, inside the 43-128 range RFC 7636 requires.
pub fn generate_verifier() -> String {
    random_token::<64>()
}

/// Generate an opaque `state` value for CSRF protection.
pub fn generate_state() -> String {
    random_token::<32>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the authorization URL with all required parameters.
///
/// The audience is sent as an extra front-channel parameter when set; the
/// issuer uses it to mint an access token for the cut chart API.
pub fn build_authorization_url(endpoint: &str, request: &AuthorizationRequest<'_>) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| Error::Discovery(format!("invalid authorization endpoint {endpoint}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", request.client_id)
            .append_pair("redirect_uri", request.redirect_uri)
            .append_pair("scope", request.scopes)
            .append_pair("code_challenge", request.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", request.state);
        if let Some(audience) = request.audience {
            query.append_pair("audience", audience);
        }
    }
    Ok(url)
}

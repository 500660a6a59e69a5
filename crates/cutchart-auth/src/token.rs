//! OIDC token endpoint interactions
//!
//! 1. Authorization code exchange (end of the interactive login)
//! 2. Refresh token grant (renewing an expiring access token)
//!
//! Both POST a form to the issuer's token endpoint through the shared
//! retry policy, so connection faults and 5xx answers are retried like any
//! API call. A final non-2xx answer is turned into an error carrying the
//! issuer's own `error_description` (or `error`) text so it can be shown to
//! the user unchanged.

use std::fmt;

use retry_policy::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The refresh
/// grant may omit `refresh_token`, in which case the old one stays valid.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("has_id_token", &self.id_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Error body shape from RFC 6749 section 5.2
#[derive(Debug, Deserialize)]
struct IssuerError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Inputs to the authorization code grant.
#[derive(Debug, Clone)]
pub struct CodeExchange<'a> {
    pub client_id: &'a str,
    pub code: &'a str,
    pub verifier: &'a str,
    pub redirect_uri: &'a str,
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    token_endpoint: &str,
    exchange: &CodeExchange<'_>,
) -> Result<TokenResponse> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", exchange.code),
        ("code_verifier", exchange.verifier),
        ("client_id", exchange.client_id),
        ("redirect_uri", exchange.redirect_uri),
    ];
    let response = retry
        .execute(|_| client.post(token_endpoint).form(&form).send())
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(issuer_reason(status.as_u16(), &body)));
    }

    debug!("authorization code exchanged");
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Obtain new tokens with a refresh token.
pub async fn refresh_token(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    token_endpoint: &str,
    client_id: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", client_id),
    ];
    let response = retry
        .execute(|_| client.post(token_endpoint).form(&form).send())
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        let reason = issuer_reason(status.as_u16(), &body);

        // 400 invalid_grant, 401 and 403 mean the refresh token is dead
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(reason));
        }
        return Err(Error::TokenExchange(reason));
    }

    debug!("refresh grant succeeded");
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Pick the most readable reason out of an issuer error body.
fn issuer_reason(status: u16, body: &str) -> String {
    match serde_json::from_str::<IssuerError>(body) {
        Ok(IssuerError {
            error_description: Some(description),
            ..
        }) if !description.is_empty() => description,
        Ok(IssuerError {
            error: Some(error), ..
        }) if !error.is_empty() => error,
        _ if body.trim().is_empty() => format!("token endpoint returned {status}"),
        _ => format!("token endpoint returned {status}: {}", body.trim()),
    }
}

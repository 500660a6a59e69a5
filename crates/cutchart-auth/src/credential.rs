//! Persisted credential and the validity rule
//!
//! A `CacheEntry` is written as one JSON document, sealed by the cache, and
//! overwritten whole on every refresh or re-login. Fields default when
//! absent so a partially populated entry reads as "no usable token" instead
//! of an error.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::claims::{IdentityClaims, jwt_expiry};
use crate::constants::EXPIRY_SKEW;
use crate::error::{Error, Result};
use crate::oidc::TokenSet;

/// Persisted form of a credential.
///
/// `expires_at` is the access token's absolute expiry in unix seconds.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default)]
    pub identity_token: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: u64,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("has_identity_token", &!self.identity_token.is_empty())
            .field("has_access_token", &!self.access_token.is_empty())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CacheEntry {
    /// Build an entry from freshly issued tokens.
    ///
    /// Expiry comes from `expires_in` when the issuer sent it, else from the
    /// access token's `exp` claim, else the token is treated as expired. A
    /// refresh grant that omits `refresh_token` keeps `previous_refresh`.
    pub fn from_tokens(tokens: TokenSet, previous_refresh: Option<String>, now: u64) -> Self {
        let expires_at = tokens
            .expires_in
            .map(|delta| now.saturating_add(delta))
            .or_else(|| jwt_expiry(&tokens.access_token))
            .unwrap_or(0);
        Self {
            identity_token: tokens.id_token,
            access_token: tokens.access_token,
            refresh_token: tokens
                .refresh_token
                .filter(|t| !t.is_empty())
                .or(previous_refresh),
            expires_at,
        }
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        is_valid(&self.access_token, self.expires_at, now)
    }

    /// The cached refresh token, if one is present and non-empty.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn claims(&self) -> IdentityClaims {
        IdentityClaims::from_id_token(&self.identity_token)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::CacheUnavailable(format!("serializing credential: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::CacheUnavailable(format!("parsing cached credential: {e}")))
    }
}

/// `token` is usable only if it expires strictly after `now + EXPIRY_SKEW`.
pub fn is_valid(access_token: &str, expires_at: u64, now: u64) -> bool {
    !access_token.is_empty() && expires_at > now.saturating_add(EXPIRY_SKEW.as_secs())
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

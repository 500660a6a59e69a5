//! Token lifecycle manager
//!
//! Resolves a usable access token for one logical user per call:
//!
//! ```text
//! reachability ──no──► NoConnectivity (error log, empty token)
//!      │
//!  cache lookup ──valid──────────────────────────► Authenticated
//!      │
//!      ├─ expiring + refresh token ─► refresh ─┐
//!      └─ nothing usable ─► confirm ─► login ──┤
//!                                              ▼
//!                          skew check ──fail──► Untrusted (error log, empty token)
//!                                              │
//!                                 persist + telemetry ─► Authenticated
//! ```
//!
//! The choice of path is the pure `plan` function; `resolve` executes it.
//! Only this module mutates cached credentials.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cache::CredentialCache;
use crate::constants::{IDENTITY_RESOLVED_EVENT, LOGOUT_TRACE, SESSION_ENDED_EVENT, storage_key};
use crate::credential::{CacheEntry, unix_now};
use crate::error::{Error, Result};
use crate::network::Reachability;
use crate::oidc::OidcClient;
use crate::telemetry::Telemetry;

/// Prompt shown before a browser login is started.
pub const LOGIN_PROMPT: &str = "No saved sign-in found. Open a browser to sign in?";

/// Asks the operator a yes/no question.
pub type Confirm = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Next step for a cache lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    UseCached,
    Refresh(String),
    FreshLogin,
}

/// Decide what to do with what the cache holds.
pub fn plan(entry: Option<&CacheEntry>, now: u64) -> Plan {
    match entry {
        Some(entry) if entry.is_valid_at(now) => Plan::UseCached,
        Some(entry) => match entry.refresh_token() {
            Some(refresh) => Plan::Refresh(refresh.to_string()),
            None => Plan::FreshLogin,
        },
        None => Plan::FreshLogin,
    }
}

/// Where an access token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Cache,
    Refresh,
    Login,
}

/// Outcome of one credential resolution that is not a typed failure.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Authenticated {
        access_token: String,
        source: TokenSource,
    },
    /// The reachability probe said no; nothing was attempted.
    NoConnectivity,
    /// The issuer returned a token that already fails the skew rule.
    Untrusted { source: TokenSource, expires_at: u64 },
}

pub struct TokenLifecycleManager {
    cache: Arc<dyn CredentialCache>,
    oidc: Arc<dyn OidcClient>,
    telemetry: Arc<dyn Telemetry>,
    network: Arc<dyn Reachability>,
    confirm: Confirm,
}

impl TokenLifecycleManager {
    pub fn new(
        cache: Arc<dyn CredentialCache>,
        oidc: Arc<dyn OidcClient>,
        telemetry: Arc<dyn Telemetry>,
        network: Arc<dyn Reachability>,
        confirm: Confirm,
    ) -> Self {
        Self {
            cache,
            oidc,
            telemetry,
            network,
            confirm,
        }
    }

    /// Return a usable access token for `user`, or an empty string when
    /// there is no network or the issuer handed out an already-expiring
    /// token (both logged at error).
    ///
    /// Issuer rejections surface as `AuthenticationFailed` carrying the
    /// issuer's reason; cache failures as `CacheUnavailable`.
    pub async fn login(&self, user: &str) -> Result<String> {
        match self.resolve(user).await? {
            Resolution::Authenticated { access_token, .. } => Ok(access_token),
            Resolution::NoConnectivity => {
                error!(user, "{}", Error::NoConnectivity);
                Ok(String::new())
            }
            Resolution::Untrusted { source, expires_at } => {
                error!(
                    user,
                    ?source,
                    expires_at,
                    "issued access token expires within the skew window, check the system clock"
                );
                Ok(String::new())
            }
        }
    }

    /// Run the state machine for `user` and report how it ended.
    pub async fn resolve(&self, user: &str) -> Result<Resolution> {
        if !self.network.is_available().await {
            return Ok(Resolution::NoConnectivity);
        }

        let key = storage_key(user);
        let cached = match self.cache.get(&key).await? {
            Some(bytes) => Some(CacheEntry::from_bytes(&bytes)?),
            None => None,
        };

        let (entry, source) = match plan(cached.as_ref(), unix_now()) {
            Plan::UseCached => {
                let entry = cached.unwrap_or_default();
                debug!(user, expires_at = entry.expires_at, "using cached access token");
                self.telemetry.set_user(&entry.claims());
                return Ok(Resolution::Authenticated {
                    access_token: entry.access_token,
                    source: TokenSource::Cache,
                });
            }
            Plan::Refresh(refresh) => {
                info!(user, "access token expiring, refreshing");
                let tokens = self
                    .oidc
                    .refresh(&refresh)
                    .await
                    .map_err(Error::into_auth_failure)?;
                let mut entry = CacheEntry::from_tokens(tokens, Some(refresh), unix_now());
                if entry.identity_token.is_empty() {
                    // Refresh grants may omit the id token; the identity is unchanged
                    entry.identity_token = cached.map(|c| c.identity_token).unwrap_or_default();
                }
                (entry, TokenSource::Refresh)
            }
            Plan::FreshLogin => {
                if !(self.confirm)(LOGIN_PROMPT) {
                    return Err(Error::AuthenticationFailed("login cancelled by user".into()));
                }
                info!(user, "starting interactive sign-in");
                let tokens = self
                    .oidc
                    .interactive_login()
                    .await
                    .map_err(Error::into_auth_failure)?;
                (CacheEntry::from_tokens(tokens, None, unix_now()), TokenSource::Login)
            }
        };

        self.persist(user, &key, entry, source).await
    }

    async fn persist(
        &self,
        user: &str,
        key: &str,
        entry: CacheEntry,
        source: TokenSource,
    ) -> Result<Resolution> {
        if !entry.is_valid_at(unix_now()) {
            return Ok(Resolution::Untrusted {
                source,
                expires_at: entry.expires_at,
            });
        }

        self.cache.put(key, &entry.to_bytes()?).await?;

        let claims = entry.claims();
        self.telemetry
            .record_event(IDENTITY_RESOLVED_EVENT, &claims.properties());
        self.telemetry.set_user(&claims);
        info!(user, ?source, expires_at = entry.expires_at, "credential stored");

        Ok(Resolution::Authenticated {
            access_token: entry.access_token,
            source,
        })
    }

    /// Drop the cached credential for `user`. Safe to call repeatedly.
    pub async fn logout(&self, user: &str) -> Result<()> {
        self.telemetry.record_trace(LOGOUT_TRACE);
        let key = storage_key(user);
        if !self.cache.exists(&key).await? {
            warn!(user, "no saved sign-in to remove");
        }
        self.cache.clear(&key).await?;
        self.telemetry
            .record_event(SESSION_ENDED_EVENT, &[("user", user.to_string())]);
        info!(user, "signed out");
        Ok(())
    }
}

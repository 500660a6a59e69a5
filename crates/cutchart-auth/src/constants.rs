//! OIDC client and credential cache constants
//!
//! These values identify the public CLI client and the cache layout. The
//! secrets themselves (tokens, storage password, storage salt) never appear
//! here.

use std::time::Duration;

/// Logical user when the caller doesn't name one
pub const DEFAULT_USER: &str = "default-user";

/// Cache namespace prefix for token entries (`cc-cli:<user>`)
pub const STORAGE_KEY_PREFIX: &str = "cc-cli:";

/// Scopes requested at interactive login. `offline_access` is what makes the
/// issuer hand out a refresh token.
pub const DEFAULT_SCOPES: &str =
    "openid profile email api offline_access read read:custom write:custom read:truehole read:truebevel";

/// An access token expiring within this window is treated as expired.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(5 * 60);

/// Loopback port registered as the client's redirect URI
pub const DEFAULT_REDIRECT_PORT: u16 = 7890;

/// How long the loopback listener waits for the browser redirect
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Discovery document path relative to the authority
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Telemetry event emitted once a credential is persisted
pub const IDENTITY_RESOLVED_EVENT: &str = "IdentityResolved";

/// Telemetry event emitted on logout
pub const SESSION_ENDED_EVENT: &str = "SessionEnded";

/// Trace recorded when a user signs out
pub const LOGOUT_TRACE: &str = "Logging out user.";

/// Cache key for a logical user.
pub fn storage_key(user: &str) -> String {
    format!("{STORAGE_KEY_PREFIX}{user}")
}

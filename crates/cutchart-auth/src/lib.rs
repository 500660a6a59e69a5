//! Credential lifecycle for the cut chart CLI
//!
//! Keeps one user signed in across short-lived process runs without storing
//! secrets in the clear:
//!
//! 1. `lifecycle::TokenLifecycleManager::login()` checks reachability, then
//!    the encrypted `cache::FileCache`
//! 2. A valid cached token is returned as is; an expiring one is refreshed
//!    through `oidc::OidcClient::refresh()`
//! 3. With nothing usable, the operator is asked to confirm and
//!    `oidc::OidcClient::interactive_login()` runs the browser flow
//! 4. New tokens are checked against the expiry skew, persisted as one
//!    `credential::CacheEntry`, and reported to `telemetry::Telemetry`
//!    with non-secret claims only
//!
//! Collaborators are passed in explicitly; nothing here is global.

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod claims;
pub mod constants;
pub mod credential;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod oidc;
pub mod pkce;
pub mod telemetry;
pub mod token;

/// Boxed future returned by the collaborator traits so they stay
/// object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use cache::{CredentialCache, FileCache, Sealing};
pub use claims::IdentityClaims;
pub use constants::*;
pub use credential::{CacheEntry, is_valid};
pub use error::{Error, Result};
pub use lifecycle::{Confirm, Resolution, TokenLifecycleManager, TokenSource};
pub use network::{Reachability, TcpProbe};
pub use oidc::{LoopbackOidcClient, OidcClient, OidcConfig, TokenSet};
pub use telemetry::{Telemetry, TracingTelemetry};

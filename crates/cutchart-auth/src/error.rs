//! Error types for credential lifecycle operations

/// Errors from credential lifecycle operations.
///
/// `NoConnectivity`, `AuthenticationFailed`, and `CacheUnavailable` are what
/// callers of the lifecycle manager see. The remaining variants come out of
/// the OIDC capability and are folded into `AuthenticationFailed` before they
/// leave the manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no network connection detected")]
    NoConnectivity,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("credential cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("access token not usable: {0}")]
    InvalidToken(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error("login callback failed: {0}")]
    Callback(String),
}

impl Error {
    /// Fold an issuer/transport failure into `AuthenticationFailed`, keeping
    /// the issuer's reason text. Cache and connectivity errors pass through.
    pub fn into_auth_failure(self) -> Self {
        match self {
            Error::NoConnectivity | Error::CacheUnavailable(_) | Error::AuthenticationFailed(_) => {
                self
            }
            Error::InvalidCredentials(reason)
            | Error::TokenExchange(reason)
            | Error::Http(reason)
            | Error::Discovery(reason)
            | Error::Callback(reason)
            | Error::InvalidToken(reason) => Error::AuthenticationFailed(reason),
        }
    }
}

/// Result alias for credential lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

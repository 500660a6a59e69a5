//! Error types for cut chart API calls

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The reachability check failed; nothing was sent.
    #[error("no network connection, cut chart API not contacted")]
    NoConnectivity,

    /// A retryable status that was still failing when the retry budget ran out.
    #[error("cut chart API returned {status} after {attempts} attempts")]
    HttpTransient { status: u16, attempts: u32 },

    /// A status that retrying cannot change.
    #[error("cut chart API returned {status}: {body}")]
    HttpTerminal { status: u16, body: String },

    #[error("request to cut chart API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;

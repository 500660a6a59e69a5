//! Outcome classification
//!
//! Retry only on the explicit transient set (connection faults, 408, 5xx)
//! and terminate on everything else. The explicit terminal statuses are
//! listed separately so callers can report them distinctly.

use std::fmt;

/// Status codes that a retry can never change.
pub const TERMINAL_STATUSES: &[u16] = &[400, 401, 403, 404, 415, 422];

/// What one attempt produced, reduced to what the policy cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Socket, connect, timeout, or other transport-level failure
    Fault,
    /// A failure raised before anything reached the network (bad request
    /// construction, undecodable body). Retrying cannot fix it.
    Unrecoverable,
    /// A completed response
    Status(u16),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Fault => write!(f, "transport fault"),
            Outcome::Unrecoverable => write!(f, "unrecoverable error"),
            Outcome::Status(status) => write!(f, "HTTP {status}"),
        }
    }
}

/// Decision derived from an outcome. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Terminate,
}

/// Classify a completed response by status code.
pub fn classify_status(status: u16) -> RetryDecision {
    match status {
        s if TERMINAL_STATUSES.contains(&s) => RetryDecision::Terminate,
        408 | 500..=599 => RetryDecision::Retry,
        _ => RetryDecision::Terminate,
    }
}

/// Classify any attempt outcome.
pub fn classify(outcome: Outcome) -> RetryDecision {
    match outcome {
        Outcome::Fault => RetryDecision::Retry,
        Outcome::Unrecoverable => RetryDecision::Terminate,
        Outcome::Status(status) => classify_status(status),
    }
}

/// Anything the executor can inspect after an attempt.
pub trait Classify {
    fn outcome(&self) -> Outcome;
}

impl Classify for Outcome {
    fn outcome(&self) -> Outcome {
        *self
    }
}

impl Classify for reqwest::Result<reqwest::Response> {
    fn outcome(&self) -> Outcome {
        match self {
            Ok(response) => Outcome::Status(response.status().as_u16()),
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => Outcome::Fault,
            Err(e) => match e.status() {
                Some(status) => Outcome::Status(status.as_u16()),
                None => Outcome::Unrecoverable,
            },
        }
    }
}

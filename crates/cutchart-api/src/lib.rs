//! Authenticated client for the cut chart API
//!
//! Every request carries the caller's bearer token, a per-process
//! correlation cookie, and an `Accept` type chosen by the requested
//! artifact, and runs through the shared retry policy. The client only
//! reads the token it was given; renewing it is the lifecycle manager's job.

pub mod artifact;
pub mod client;
pub mod error;
pub mod url;

pub use artifact::ArtifactType;
pub use client::{ApiClient, CORRELATION_COOKIE};
pub use error::{Error, Result};
pub use url::{API_ROOT, build_url, path_and_query};

//! Shared types for the cut chart CLI workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;

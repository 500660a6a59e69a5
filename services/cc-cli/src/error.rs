//! CLI-specific error types

use thiserror::Error;

/// Failures that originate in the CLI itself rather than in a library
/// crate. Library errors pass through `anyhow` unchanged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("no product information was found")]
    NoProducts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert_eq!(
            Error::Usage("a --product must be given".into()).to_string(),
            "a --product must be given"
        );
        assert_eq!(
            Error::NoProducts.to_string(),
            "no product information was found"
        );
    }

    #[test]
    fn converts_into_anyhow_with_context() {
        use anyhow::Context;
        let err = Err::<(), _>(Error::NoProducts)
            .context("listing products failed")
            .unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "listing products failed: no product information was found"
        );
        assert!(err.downcast_ref::<Error>().is_some());
    }
}

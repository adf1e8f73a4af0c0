//! Error types for wallet provenance analysis

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for provenance analysis
///
/// Traversal outcomes such as a funding cycle or an exhausted depth budget are
/// not errors; they are reported through [`crate::types::ChainStatus`].
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    // Ledger gateway errors
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Gateway returned {status}: {body}")]
    Gateway { status: u16, body: String },

    #[error("No data found: {0}")]
    NotFound(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Pagination limit reached on {endpoint} after {pages} pages")]
    PaginationLimit { endpoint: String, pages: u32 },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::GatewayUnavailable(_))
    }

    /// Check if this error came from the ledger gateway rather than local setup
    pub fn is_gateway_failure(&self) -> bool {
        matches!(
            self,
            Error::GatewayUnavailable(_)
                | Error::Gateway { .. }
                | Error::NotFound(_)
                | Error::MalformedRecord(_)
                | Error::PaginationLimit { .. }
        )
    }
}

// Conversion from reqwest errors; transport failures are transient
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::GatewayUnavailable(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(Error::GatewayUnavailable("timeout".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::MalformedRecord("x".into()).is_retryable());
        assert!(!Error::Gateway { status: 400, body: String::new() }.is_retryable());
    }

    #[test]
    fn test_gateway_failure_classification() {
        assert!(Error::MalformedRecord("missing trader".into()).is_gateway_failure());
        assert!(!Error::Config("bad".into()).is_gateway_failure());
    }
}

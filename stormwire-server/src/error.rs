//! Error types for stormwire-server

use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reference data error: {0}")]
    ReferenceData(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Push source error: {0}")]
    PushSource(String),

    #[error("Pull source error: {0}")]
    PullSource(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Typed parse failures for raw text products.
///
/// Parse failures are never fatal: the offending body lands in the
/// diagnostics ring and the pipeline moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed communication header")]
    MalformedHeader,

    #[error("no UGC block in segment")]
    MissingUgc,

    #[error("malformed VTEC line: {0}")]
    InvalidVtec(String),

    #[error("empty product body")]
    EmptyBody,

    /// Products the pipeline deliberately does not carry (informational
    /// outlooks, non-thunderstorm statements, filtered states).
    #[error("product filtered: {0}")]
    Filtered(&'static str),
}

impl ParseError {
    /// Filtered products are expected traffic, not failures worth warning
    /// about.
    pub fn is_filtered(&self) -> bool {
        matches!(self, ParseError::Filtered(_))
    }
}

/// Convenience Result type using the server Error
pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

/// Failures talking to the remote variable store.
///
/// The reconciliation engine never retries or recovers from these; they are
/// handed back to the caller as-is.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The project URL could not be turned into an API endpoint.
    #[error("Invalid project URL: {0}")]
    InvalidUrl(String),

    /// Connection, TLS or timeout failure before a response arrived.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("GitLab API error {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the JSON we expected.
    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Rejections raised by strict variable parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("variable record must be a JSON object")]
    NotAnObject,

    #[error("unknown variable field: {0}")]
    UnknownField(String),

    #[error("field {field} expects a boolean, got {value}")]
    InvalidFlag { field: &'static str, value: String },

    #[error("field {field} expects a string, got {value}")]
    InvalidText { field: &'static str, value: String },
}

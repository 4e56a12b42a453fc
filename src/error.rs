//! Error types for reply composition.

use thiserror::Error;

/// Failures that end a compose request.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The inbound email could not be accepted
    #[error("invalid request: {0}")]
    Validation(String),
    /// The model backend or a collaborator failed after retries
    #[error("upstream failure: {0}")]
    Upstream(String),
    /// The agent loop ended without a usable final message
    #[error("generation failure: {0}")]
    Generation(String),
}

/// Failures inside a tool handler. These never leave the tool executor,
/// they are encoded into the tool output so the model can react.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing required parameters for {tool}: {}", .missing.join(", "))]
    MissingParameter { tool: String, missing: Vec<String> },
    #[error("Failed to fetch attachment: {0}")]
    Attachment(String),
    #[error("Failed to analyze attachment: {0}")]
    Analysis(#[from] UpstreamError),
}

/// An error returned by the model backend client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Worth retrying: connection problems, timeouts, 429 and 5xx
    #[error("transient error from {endpoint}: {message}")]
    Transient { endpoint: String, message: String },
    /// Retrying will not help: 4xx validation errors, bad payloads
    #[error("error from {endpoint}: {message}")]
    Permanent { endpoint: String, message: String },
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient { .. })
    }
}

impl From<UpstreamError> for ComposeError {
    fn from(err: UpstreamError) -> Self {
        ComposeError::Upstream(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing env var {0}")]
    Missing(&'static str),
    #[error("Invalid value for env var {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

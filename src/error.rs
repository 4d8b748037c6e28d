// src/error.rs

//! Unified error handling for the feed.
//!
//! Every error raised while polling the portal is recoverable: the poll loop
//! logs it and treats the cycle as having produced nothing.

use std::fmt;

use thiserror::Error;

/// Result type alias for feed operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request could not be completed
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// Request completed with an unexpected status code
    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    /// Portal did not accept the supplied credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Expected page structure was absent
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Coarse classification of recoverable poll failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Authentication,
    Decode,
    Parse,
    /// Local setup problems (config, selectors, I/O)
    Local,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a transport error for a URL.
    pub fn transport(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an authentication failure.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Create a body decoding error.
    pub fn decode(message: impl fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }

    /// Create a page parsing error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Which recoverable failure class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Transport { .. } | Self::Status { .. } => ErrorKind::Transport,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Parse(_) | Self::Selector { .. } => ErrorKind::Parse,
            Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_)
            | Self::Url(_)
            | Self::Config(_)
            | Self::Validation(_) => ErrorKind::Local,
        }
    }
}

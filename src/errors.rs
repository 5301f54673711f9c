//! Error types for the probe sidecar

use std::fmt;

pub type Result<T> = std::result::Result<T, ScraperError>;

#[derive(Debug)]
pub enum ScraperError {
    /// Check carries none of the ping/http/dns settings
    UnsupportedCheckKind(i64),

    /// Provider request could not be built
    Request(String),

    /// HTTP request failed
    Http(reqwest::Error),

    /// Debug dump could not be split into its sections
    Extraction(std::io::Error),

    /// Metrics section violates the text exposition grammar
    Decode { line: usize, message: String },

    /// Payload could not be handed to the downstream publisher
    Publish(String),

    /// Configuration error
    Config(String),

    /// IO operation failed
    Io(std::io::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),
}

impl ScraperError {
    pub(crate) fn decode(line: usize, message: impl Into<String>) -> Self {
        ScraperError::Decode {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScraperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScraperError::UnsupportedCheckKind(id) => {
                write!(f, "unsupported check kind for check {}", id)
            }
            ScraperError::Request(msg) => write!(f, "creating provider request: {}", msg),
            ScraperError::Http(err) => write!(f, "requesting data from provider: {}", err),
            ScraperError::Extraction(err) => write!(f, "extracting debug dump sections: {}", err),
            ScraperError::Decode { line, message } => {
                write!(f, "decoding metrics (line {}): {}", line, message)
            }
            ScraperError::Publish(msg) => write!(f, "publishing payload: {}", msg),
            ScraperError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ScraperError::Io(err) => write!(f, "IO error: {}", err),
            ScraperError::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl std::error::Error for ScraperError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScraperError::Http(err) => Some(err),
            ScraperError::Extraction(err) => Some(err),
            ScraperError::Io(err) => Some(err),
            ScraperError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScraperError {
    fn from(err: std::io::Error) -> Self {
        ScraperError::Io(err)
    }
}

impl From<reqwest::Error> for ScraperError {
    fn from(err: reqwest::Error) -> Self {
        ScraperError::Http(err)
    }
}

impl From<serde_json::Error> for ScraperError {
    fn from(err: serde_json::Error) -> Self {
        ScraperError::Json(err)
    }
}

impl From<url::ParseError> for ScraperError {
    fn from(err: url::ParseError) -> Self {
        ScraperError::Request(err.to_string())
    }
}

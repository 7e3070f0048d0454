//! Failure taxonomy for a single inference attempt.
//!
//! Every kind is terminal for the attempt: nothing here is retried, and no
//! placeholder result is ever produced in place of an error.

use serde::Serialize;
use std::time::Duration;

/// Why a parsed response was rejected by the local schema check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("label `{0}` is not one of Benign, Malignant")]
    UnknownLabel(String),
    #[error("confidence {0} is outside 0..=100")]
    ConfidenceOutOfRange(f64),
    #[error("recommendations must not be empty")]
    EmptyRecommendations,
}

/// Underlying cause of a transport failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no Gemini API key configured")]
    MissingApiKey,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("inference service returned {status}: {body}")]
    Status { status: u16, body: String },
    /// Submitted outside a Tokio runtime, so the call could not be scheduled.
    #[error("no async runtime available to run the request")]
    NoRuntime,
}

impl TransportError {
    /// Credential missing or rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::MissingApiKey)
            || matches!(self, TransportError::Status { status, .. } if *status == 401 || *status == 403)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::Status { status: 429, .. })
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, TransportError::Status { status, .. } if *status >= 500)
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout(_) => true,
            TransportError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Empty or unreadable image payload. Detected before any request.
    #[error("invalid image: {0}")]
    InvalidInput(String),
    #[error("unsupported language `{0}`")]
    UnsupportedLanguage(String),
    /// Service answered with something that is not JSON.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("response violates schema: {0}")]
    SchemaViolation(#[from] SchemaError),
    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::InvalidInput(_) => ErrorKind::InvalidInput,
            InferenceError::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
            InferenceError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            InferenceError::SchemaViolation(_) => ErrorKind::SchemaViolation,
            InferenceError::TransportFailure(_) => ErrorKind::TransportFailure,
        }
    }
}

/// Copyable tag for an [`InferenceError`], kept by the session after the
/// error itself has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidInput,
    UnsupportedLanguage,
    MalformedResponse,
    SchemaViolation,
    TransportFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::UnsupportedLanguage => "UnsupportedLanguage",
            ErrorKind::MalformedResponse => "MalformedResponse",
            ErrorKind::SchemaViolation => "SchemaViolation",
            ErrorKind::TransportFailure => "TransportFailure",
        };
        f.write_str(name)
    }
}

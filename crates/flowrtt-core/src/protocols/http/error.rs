use thiserror::Error;

/// Errors returned by HTTP/1.x parsing.
///
/// # Examples
/// ```
/// use flowrtt_core::protocols::http::error::HttpError;
///
/// let err = HttpError::InvalidStatusCode("20".to_string());
/// assert!(err.to_string().contains("malformed HTTP status code"));
/// ```
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("payload too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("payload does not start like HTTP")]
    NotHttp,
    #[error("missing start line")]
    MissingStartLine,
    #[error("start line is not valid UTF-8")]
    NotUtf8,
    #[error("malformed HTTP request {0:?}")]
    MalformedRequestLine(String),
    #[error("malformed HTTP response {0:?}")]
    MalformedStatusLine(String),
    #[error("malformed HTTP version {0:?}")]
    InvalidVersion(String),
    #[error("malformed HTTP status code {0:?}")]
    InvalidStatusCode(String),
    #[error("invalid request target {0:?}")]
    InvalidTarget(String),
}

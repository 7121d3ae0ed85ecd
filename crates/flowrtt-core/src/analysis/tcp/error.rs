use thiserror::Error;

/// Errors returned by TCP segment decoding.
///
/// # Examples
/// ```
/// use flowrtt_core::analysis::tcp::error::TcpError;
///
/// let err = TcpError::MissingNetworkLayer;
/// assert!(err.to_string().contains("missing network layer"));
/// ```
#[derive(Debug, Error)]
pub enum TcpError {
    #[error("packet slice error: {0}")]
    Slice(String),
    #[error("missing network layer in packet")]
    MissingNetworkLayer,
}

//! Core error types and result handling for the Xcom client.

use std::time::Duration;

use thiserror::Error;

use crate::constants::error_name;

/// Result type used throughout the library
pub type XcomResult<T> = Result<T, XcomError>;

/// Error type covering every failure surfaced by the Xcom client.
///
/// The variants follow the protocol's failure taxonomy:
///
/// - Local validation failures (`InvalidParameter`, `NotFound`,
///   `Configuration`) are raised before any wire traffic and are never
///   retried.
/// - Transport failures (`Connection`, `Write`, `Read`, `Timeout`) and
///   protocol failures (`ResponseIsError`, `Frame`, `Unpack`) are retried by
///   the request engine up to its configured bound.
#[derive(Debug, Error)]
pub enum XcomError {
    /// No usable connection to the Xcom gateway
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failure while writing a request package to the gateway
    #[error("Write error: {0}")]
    Write(String),

    /// Failure while reading a response package from the gateway
    #[error("Read error: {0}")]
    Read(String),

    /// No matching response arrived within the per-attempt deadline
    #[error("Timeout after {timeout_ms}ms while {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The matched response carries the error flag; `name` is the decoded
    /// SCOM error-code name
    #[error("Response package contains error: '{name}'")]
    ResponseIsError { code: u16, name: String },

    /// Malformed package bytes: bad checksum, truncated region, invalid field
    #[error("Frame error: {0}")]
    Frame(String),

    /// A response payload did not match the declared format or byte length
    #[error("Unpack error: {0}")]
    Unpack(String),

    /// Local request validation failed; nothing was sent on the wire
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A datapoint, device code, address or family could not be resolved
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog or transport configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XcomError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        XcomError::Connection(msg.into())
    }

    /// Create a write error
    pub fn write<S: Into<String>>(msg: S) -> Self {
        XcomError::Write(msg.into())
    }

    /// Create a read error
    pub fn read<S: Into<String>>(msg: S) -> Self {
        XcomError::Read(msg.into())
    }

    /// Create a timeout error for the given operation and deadline
    pub fn timeout<S: Into<String>>(operation: S, timeout: Duration) -> Self {
        XcomError::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a response-is-error failure from a raw SCOM error code
    pub fn response_is_error(code: u16) -> Self {
        XcomError::ResponseIsError {
            code,
            name: error_name(code),
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(msg: S) -> Self {
        XcomError::Frame(msg.into())
    }

    /// Create an unpack error
    pub fn unpack<S: Into<String>>(msg: S) -> Self {
        XcomError::Unpack(msg.into())
    }

    /// Create a local parameter-validation error
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        XcomError::InvalidParameter(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        XcomError::NotFound(msg.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        XcomError::Configuration(msg.into())
    }

    /// True for timeout failures. The batch layer uses this to decide
    /// whether failed multi-info items are worth retrying one by one.
    pub fn is_timeout(&self) -> bool {
        matches!(self, XcomError::Timeout { .. })
    }

    /// True for failures raised by local validation, before any wire traffic
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            XcomError::InvalidParameter(_)
                | XcomError::NotFound(_)
                | XcomError::Configuration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = XcomError::timeout("listening for response", Duration::from_secs(3));
        assert!(err.is_timeout());
        assert!(!err.is_local());
        assert!(err.to_string().contains("3000ms"));

        let err = XcomError::invalid_parameter("bad category");
        assert!(!err.is_timeout());
        assert!(err.is_local());
    }

    #[test]
    fn test_response_is_error_name() {
        let err = XcomError::response_is_error(0x002A);
        assert_eq!(err.to_string(), "Response package contains error: 'READ_PROPERTY_FAILED'");

        let err = XcomError::response_is_error(0xFEDC);
        assert!(err.to_string().contains("unknown error 'fedc'"));
    }
}

//! Error types for SILTA adapters

use thiserror::Error;

/// Error type for adapter operations
///
/// This is the standard error type used by all SILTA transport bindings.
/// It provides structured error categories that help with debugging and
/// error handling without leaking protocol-specific types.
///
/// # Example
///
/// ```
/// use silta_core::AdapterError;
///
/// fn connect_to_backend() -> Result<(), AdapterError> {
///     // Simulate connection failure
///     Err(AdapterError::Connection("refused".to_string()))
/// }
///
/// match connect_to_backend() {
///     Ok(_) => println!("Connected!"),
///     Err(AdapterError::Connection(msg)) => println!("Connection failed: {}", msg),
///     Err(e) => println!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Initialization failed
    ///
    /// Returned when an adapter fails to initialize, typically during
    /// startup. Examples: invalid configuration, failed to bind port.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Connection error
    ///
    /// Returned when establishing or maintaining a transport connection
    /// fails. Examples: DNS lookup failed, refused, TLS handshake error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Send failed
    ///
    /// Returned when an adapter fails to deliver a message to its peer.
    /// Examples: network timeout, peer rejected request.
    #[error("send failed: {0}")]
    Send(String),

    /// Receive failed
    ///
    /// Returned when reading a message from the transport fails.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Not ready
    ///
    /// Returned when an adapter is used before it reached the connected
    /// state. This is typically transient during startup or recovery.
    #[error("adapter not ready")]
    NotReady,

    /// Shutdown error
    ///
    /// Returned when graceful shutdown fails.
    /// Examples: failed to drain in-flight calls, timeout while closing.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::Init("connection refused".to_string());
        assert_eq!(err.to_string(), "initialization failed: connection refused");

        let err = AdapterError::Connection("DNS lookup failed".to_string());
        assert_eq!(err.to_string(), "connection error: DNS lookup failed");

        let err = AdapterError::NotReady;
        assert_eq!(err.to_string(), "adapter not ready");
    }

    #[test]
    fn test_adapter_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AdapterError>();
    }
}

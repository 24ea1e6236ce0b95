//! Connector Framework error types
//!
//! Error definitions with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Transport errors (transient)
    /// Failed to establish connection to the directory endpoint.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection or operation timed out on the client side.
    #[error("connection timeout after {timeout_ms} ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// The established connection was dropped or broke mid-operation.
    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Protocol errors (permanent)
    /// Bind rejected by the directory.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Bind returned a non-success result code other than invalid credentials.
    #[error("bind failed (rc={rc}): {message}")]
    BindFailed { rc: u32, message: String },

    /// Search request was rejected or returned a non-success result code.
    #[error("search failed (rc={rc}): {message}")]
    SearchFailed { rc: u32, message: String },

    /// The compound search filter could not be parsed.
    #[error("invalid search filter '{filter}'")]
    InvalidFilter { filter: String },

    /// A value could not be parsed as a distinguished name.
    #[error("invalid distinguished name '{dn}': {message}")]
    InvalidDn { dn: String, message: String },

    // Configuration errors (fatal at startup)
    /// Configuration is missing or invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// No resolver factory is registered under this selector.
    #[error("unsupported resolver implementation: {selector}")]
    UnsupportedResolver { selector: String },

    // Write-side errors (non-fatal during reconciliation)
    /// A mutating call against the target directory failed.
    #[error("write failed: {message}")]
    WriteFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Object already exists in the target directory.
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// Object not found in the target directory.
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Check if this error is transient and the operation should be retried.
    ///
    /// Only transport-level failures are transient. A malformed filter or a
    /// rejected bind fails the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::ConnectionTimeout { .. }
                | ConnectorError::NetworkError { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if this error belongs to the configuration class.
    ///
    /// Configuration errors halt startup; there is no degraded mode.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConnectorError::InvalidConfiguration { .. } | ConnectorError::UnsupportedResolver { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            ConnectorError::NetworkError { .. } => "NETWORK_ERROR",
            ConnectorError::AuthenticationFailed => "AUTH_FAILED",
            ConnectorError::BindFailed { .. } => "BIND_FAILED",
            ConnectorError::SearchFailed { .. } => "SEARCH_FAILED",
            ConnectorError::InvalidFilter { .. } => "INVALID_FILTER",
            ConnectorError::InvalidDn { .. } => "INVALID_DN",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::UnsupportedResolver { .. } => "UNSUPPORTED_RESOLVER",
            ConnectorError::WriteFailed { .. } => "WRITE_FAILED",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a write failed error.
    pub fn write_failed(message: impl Into<String>) -> Self {
        ConnectorError::WriteFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a write failed error with source.
    pub fn write_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::WriteFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: None,
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let transient_errors = vec![
            ConnectorError::connection_failed("test"),
            ConnectorError::ConnectionTimeout { timeout_ms: 10_000 },
            ConnectorError::network("test"),
        ];

        for err in transient_errors {
            assert!(
                err.is_transient(),
                "Expected {} to be transient",
                err.error_code()
            );
            assert!(
                !err.is_permanent(),
                "Expected {} to not be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_protocol_errors_are_permanent() {
        let permanent_errors = vec![
            ConnectorError::AuthenticationFailed,
            ConnectorError::BindFailed {
                rc: 53,
                message: "unwillingToPerform".to_string(),
            },
            ConnectorError::SearchFailed {
                rc: 32,
                message: "noSuchObject".to_string(),
            },
            ConnectorError::InvalidFilter {
                filter: "(&(cn=".to_string(),
            },
            ConnectorError::invalid_configuration("test"),
            ConnectorError::write_failed("test"),
        ];

        for err in permanent_errors {
            assert!(
                err.is_permanent(),
                "Expected {} to be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_configuration_class() {
        let err = ConnectorError::invalid_configuration("url");
        assert!(err.is_configuration());
        assert!(ConnectorError::UnsupportedResolver {
            selector: "kerberos".to_string()
        }
        .is_configuration());
        assert!(!ConnectorError::AuthenticationFailed.is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = ConnectorError::ConnectionTimeout { timeout_ms: 500 };
        assert_eq!(err.to_string(), "connection timeout after 500 ms");

        let err = ConnectorError::UnsupportedResolver {
            selector: "nis".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported resolver implementation: nis");
    }

    #[test]
    fn test_error_with_source() {
        let source_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = ConnectorError::network_with_source("dropped", source_err);

        assert!(err.is_transient());
        if let ConnectorError::NetworkError { source, .. } = &err {
            assert!(source.is_some());
        } else {
            panic!("Expected NetworkError variant");
        }
    }
}

//! Error types for tag and adapter operations.
//!
//! These mirror the failures a platform NFC stack reports: the tag leaving
//! the field, a handle used outside a connection, the platform refusing
//! access, and technologies the tag does not offer.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while talking to a tag or the reader.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The tag left the field or stopped answering.
    #[error("Tag lost: {message}")]
    TagLost { message: String },

    /// The tag handle is not connected.
    #[error("Tag not connected")]
    NotConnected,

    /// The platform refused access to the tag handle.
    #[error("Security error: {message}")]
    Security { message: String },

    /// Operation is not supported by this tag or reader.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Transceive timed out.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Reader mode is not enabled.
    #[error("Reader mode disabled")]
    ReaderModeDisabled,

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new tag lost error.
    pub fn tag_lost(message: impl Into<String>) -> Self {
        Self::TagLost {
            message: message.into(),
        }
    }

    /// Create a new security error.
    pub fn security(message: impl Into<String>) -> Self {
        Self::Security {
            message: message.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns `true` if the error means the connection to the tag is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            HardwareError::TagLost { .. }
                | HardwareError::NotConnected
                | HardwareError::Security { .. }
                | HardwareError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_lost_error() {
        let error = HardwareError::tag_lost("out of field");
        assert!(matches!(error, HardwareError::TagLost { .. }));
        assert_eq!(error.to_string(), "Tag lost: out of field");
        assert!(error.is_connection_loss());
    }

    #[test]
    fn test_timeout_error() {
        let error = HardwareError::timeout(500);
        assert_eq!(error.to_string(), "Operation timeout after 500ms");
        assert!(error.is_connection_loss());
    }

    #[test]
    fn test_unsupported_is_not_connection_loss() {
        let error = HardwareError::unsupported("transceive");
        assert_eq!(error.to_string(), "Unsupported operation: transceive");
        assert!(!error.is_connection_loss());
        assert!(!HardwareError::ReaderModeDisabled.is_connection_loss());
    }
}

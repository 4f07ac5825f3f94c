//! Protocol error types.
//!
//! Errors fall in two groups. Precondition errors are raised before a frame
//! is built and mean the caller asked for something the tag cannot do; no
//! byte has been transmitted. Everything else describes a response the tag
//! actually sent, or a failed cryptographic check.

use thiserror::Error;
use wristpay_core::ChipFamily;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Preconditions
    #[error("Page {page} out of range for a tag with {page_count} pages")]
    InvalidPage { page: u8, page_count: u8 },

    #[error("Invalid payload length: expected {expected} bytes, got {actual}")]
    InvalidPayloadLength { expected: usize, actual: usize },

    #[error("Invalid key type: {0}")]
    InvalidKeyType(u8),

    #[error("Invalid challenge response length: expected {expected} bits, got {actual}")]
    InvalidChallengeLength { expected: usize, actual: usize },

    #[error("A {key} key cannot authenticate a {family} tag")]
    KeyFamilyMismatch { family: ChipFamily, key: ChipFamily },

    // Responses
    #[error("Unexpected response length: expected {expected} bytes, got {actual}")]
    UnexpectedResponseLength { expected: usize, actual: usize },

    #[error("Unexpected status byte: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedStatus { expected: u8, actual: u8 },

    #[error("Tag answered NAK {0:#03x}")]
    Nak(u8),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    // Authentication
    #[error("CMAC verification failed")]
    CmacMismatch,

    #[error("CMAC command counter exhausted")]
    CounterExhausted,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid authentication state: {0}")]
    InvalidState(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Core(#[from] wristpay_core::Error),
}

impl ProtocolError {
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    /// Returns `true` if the error was raised before anything was transmitted.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidPage { .. }
                | ProtocolError::InvalidPayloadLength { .. }
                | ProtocolError::InvalidKeyType(_)
                | ProtocolError::InvalidChallengeLength { .. }
                | ProtocolError::KeyFamilyMismatch { .. }
        )
    }

    /// Returns `true` if the error means the peer failed to prove key possession
    /// or a frame failed its integrity check.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            ProtocolError::CmacMismatch | ProtocolError::AuthenticationFailed(_)
        )
    }
}

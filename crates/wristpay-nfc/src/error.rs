//! Error types for tag sessions and the scan broker.
//!
//! [`TagError`] collects everything that can go wrong while a tag is in the
//! field. It is turned into a [`ScanFailure`] once, at the dispatcher
//! boundary, so no hardware or protocol error reaches a waiting caller.

use thiserror::Error;
use wristpay_core::ScanFailure;
use wristpay_hardware::HardwareError;
use wristpay_protocol::ProtocolError;

pub type Result<T> = std::result::Result<T, TagError>;

#[derive(Error, Debug)]
pub enum TagError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Core(#[from] wristpay_core::Error),

    /// Handshake or frame integrity failure.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A protected page was addressed without a completed handshake.
    #[error("{operation} needs an authenticated session")]
    NotAuthenticated { operation: String },

    #[error("Incompatible tag: {0}")]
    Incompatible(String),
}

impl TagError {
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth(reason.into())
    }

    pub fn incompatible(reason: impl Into<String>) -> Self {
        Self::Incompatible(reason.into())
    }

    pub fn not_authenticated(operation: impl Into<String>) -> Self {
        Self::NotAuthenticated {
            operation: operation.into(),
        }
    }

    /// Returns `true` if the tag left the field or the connection broke.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        matches!(self, TagError::Hardware(e) if e.is_connection_loss())
    }

    /// Returns `true` if nothing was transmitted because the request itself
    /// was invalid.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        match self {
            TagError::Protocol(e) => e.is_precondition(),
            TagError::Core(_) => true,
            _ => false,
        }
    }

    /// Classify into the failure taxonomy reported to the caller.
    pub fn into_failure(self) -> ScanFailure {
        match self {
            TagError::Hardware(e) if e.is_connection_loss() => ScanFailure::Lost(e.to_string()),
            TagError::Hardware(HardwareError::Unsupported { operation }) => {
                ScanFailure::Incompatible(format!("unsupported operation: {operation}"))
            }
            TagError::Hardware(e) => ScanFailure::Other(e.to_string()),
            TagError::Protocol(
                e @ (ProtocolError::CmacMismatch
                | ProtocolError::CounterExhausted
                | ProtocolError::AuthenticationFailed(_)),
            ) => ScanFailure::Auth(e.to_string()),
            TagError::Protocol(e @ ProtocolError::KeyFamilyMismatch { .. }) => {
                ScanFailure::Incompatible(e.to_string())
            }
            TagError::Protocol(e) => ScanFailure::Other(e.to_string()),
            TagError::Core(e) => ScanFailure::Other(e.to_string()),
            TagError::Auth(reason) => ScanFailure::Auth(reason),
            e @ TagError::NotAuthenticated { .. } => ScanFailure::Auth(e.to_string()),
            TagError::Incompatible(reason) => ScanFailure::Incompatible(reason),
        }
    }
}

/// Errors returned by [`ScanBroker::scan`](crate::ScanBroker::scan).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Another caller is still waiting for its result.
    #[error("A scan request is already pending")]
    RequestPending,
}

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Bit vector errors
    #[error("Bit index {index} out of range for vector of {len} bits")]
    BitIndexOutOfRange { index: usize, len: usize },

    #[error("Bit vector of {len} bits is not byte aligned")]
    NotByteAligned { len: usize },

    // Data model errors
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Invalid UID length: {0} bytes")]
    InvalidUidLength(usize),

    #[error("Invalid page range: {0}")]
    InvalidPageRange(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

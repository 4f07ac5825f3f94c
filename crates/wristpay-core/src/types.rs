use crate::{
    Result,
    constants::{
        AES_AUTH0_BYTE, AES_CFG0_PAGE, AES_KEY_LEN, PAGE_COUNT, PAGE_COUNT_AES, TDES_SECRET_LEN,
        ULC_AUTH0_PAGE,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Chip family of a detected tag.
///
/// The family decides the memory layout and which authentication
/// handshake the tag speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipFamily {
    /// MIFARE Ultralight and Ultralight-C (optional 3DES authentication).
    Ultralight,

    /// MIFARE Ultralight-AES (AES authentication, optional CMAC).
    UltralightAes,
}

impl ChipFamily {
    /// Number of addressable pages.
    #[must_use]
    pub fn page_count(self) -> u8 {
        match self {
            ChipFamily::Ultralight => PAGE_COUNT,
            ChipFamily::UltralightAes => PAGE_COUNT_AES,
        }
    }

    /// Page and byte index holding AUTH0.
    #[must_use]
    pub fn auth0_location(self) -> (u8, usize) {
        match self {
            ChipFamily::Ultralight => (ULC_AUTH0_PAGE, 0),
            ChipFamily::UltralightAes => (AES_CFG0_PAGE, AES_AUTH0_BYTE),
        }
    }

    /// AUTH0 value that switches protection off.
    #[must_use]
    pub fn auth0_disabled(self) -> u8 {
        self.page_count()
    }

    /// Length of the encrypted challenge returned by the first handshake step.
    #[must_use]
    pub fn challenge_len(self) -> usize {
        match self {
            ChipFamily::Ultralight => 8,
            ChipFamily::UltralightAes => 16,
        }
    }

    /// Length of the encrypted confirmation returned by the second handshake step.
    #[must_use]
    pub fn confirmation_len(self) -> usize {
        match self {
            ChipFamily::Ultralight => 24,
            ChipFamily::UltralightAes => 16,
        }
    }

    /// Returns `true` if the family can protect frames with a CMAC.
    #[must_use]
    pub fn supports_cmac(self) -> bool {
        matches!(self, ChipFamily::UltralightAes)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ChipFamily::Ultralight => "MIFARE Ultralight",
            ChipFamily::UltralightAes => "MIFARE Ultralight AES",
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Authentication secret supplied by the terminal configuration.
///
/// The subsystem never persists keys. `Debug` output is redacted and
/// equality is constant time.
///
/// Keys deserialize from hex strings: 12 digits give a 3DES secret,
/// 32 digits an AES key.
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub enum AuthKey {
    /// 6-byte secret for the Ultralight-C 3DES handshake.
    Tdes([u8; TDES_SECRET_LEN]),

    /// 16-byte AES-128 key for Ultralight-AES.
    Aes([u8; AES_KEY_LEN]),
}

impl AuthKey {
    /// Create a 3DES secret.
    ///
    /// # Errors
    /// Returns `Error::InvalidKeyLength` unless `bytes` is exactly 6 bytes long.
    pub fn tdes(bytes: &[u8]) -> Result<Self> {
        let key = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: TDES_SECRET_LEN,
            actual: bytes.len(),
        })?;
        Ok(AuthKey::Tdes(key))
    }

    /// Create an AES key.
    ///
    /// # Errors
    /// Returns `Error::InvalidKeyLength` unless `bytes` is exactly 16 bytes long.
    pub fn aes(bytes: &[u8]) -> Result<Self> {
        let key = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: AES_KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(AuthKey::Aes(key))
    }

    /// Parse a key from hex, choosing the kind from its length.
    ///
    /// # Errors
    /// Returns `Error::InvalidKeyEncoding` for malformed hex and
    /// `Error::InvalidKeyLength` for lengths other than 6 or 16 bytes.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::InvalidKeyEncoding(e.to_string()))?;
        match bytes.len() {
            TDES_SECRET_LEN => Self::tdes(&bytes),
            AES_KEY_LEN => Self::aes(&bytes),
            actual => Err(Error::InvalidKeyLength {
                expected: AES_KEY_LEN,
                actual,
            }),
        }
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AuthKey::Tdes(key) => key,
            AuthKey::Aes(key) => key,
        }
    }

    /// The chip family this key can authenticate against.
    #[must_use]
    pub fn family(&self) -> ChipFamily {
        match self {
            AuthKey::Tdes(_) => ChipFamily::Ultralight,
            AuthKey::Aes(_) => ChipFamily::UltralightAes,
        }
    }
}

impl TryFrom<String> for AuthKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl std::str::FromStr for AuthKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthKey::Tdes(_) => write!(f, "AuthKey::Tdes(<redacted>)"),
            AuthKey::Aes(_) => write!(f, "AuthKey::Aes(<redacted>)"),
        }
    }
}

/// Constant-time comparison so key checks do not leak where keys differ.
impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.family() == other.family() && bool::from(self.as_bytes().ct_eq(other.as_bytes()))
    }
}

impl Eq for AuthKey {}

/// Tag unique identifier folded into an integer, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(u64);

impl Uid {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Uid(value)
    }

    /// Fold UID bytes into an integer.
    ///
    /// # Errors
    /// Returns `Error::InvalidUidLength` for empty input or more than 8 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > 8 {
            return Err(Error::InvalidUidLength(bytes.len()));
        }
        Ok(Uid(bytes
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let digits = format!("{:X}", self.0);
        if digits.len() % 2 == 1 {
            write!(f, "0{digits}")
        } else {
            write!(f, "{digits}")
        }
    }
}

/// Operation requested by the application for the next presented tag.
///
/// A request is consumed at most once. Variants that carry a `key`
/// authenticate before touching memory; `cmac` asks for CMAC-protected
/// frames after an AES handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRequest {
    /// Report the tag's anti-collision identifier, no memory access.
    FastRead,

    /// Read user memory from `page` to the end of the user area.
    Read {
        page: u8,
        key: Option<AuthKey>,
        cmac: bool,
    },

    /// Like `Read`, trying each key until one authenticates.
    ReadMultiKey {
        page: u8,
        keys: Vec<AuthKey>,
        cmac: bool,
    },

    /// Write `data` to consecutive user pages starting at `page`.
    Write {
        page: u8,
        data: Vec<u8>,
        key: Option<AuthKey>,
        cmac: bool,
    },

    /// Replace the tag's keys with `new_key`.
    WriteKey {
        key: Option<AuthKey>,
        new_key: AuthKey,
        cmac: bool,
    },

    /// Switch memory protection (AUTH0) on or off.
    WriteProtect {
        key: Option<AuthKey>,
        enable: bool,
        cmac: bool,
    },

    /// Switch the tag's CMAC requirement on or off (Ultralight-AES only).
    WriteCmac {
        key: Option<AuthKey>,
        enable: bool,
        cmac: bool,
    },

    /// Run the diagnostic sequence with both keys and return its log.
    Test { key0: AuthKey, key1: AuthKey },
}

impl ScanRequest {
    /// Short name for logs and status displays.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ScanRequest::FastRead => "FastRead",
            ScanRequest::Read { .. } => "Read",
            ScanRequest::ReadMultiKey { .. } => "ReadMultiKey",
            ScanRequest::Write { .. } => "Write",
            ScanRequest::WriteKey { .. } => "WriteKey",
            ScanRequest::WriteProtect { .. } => "WriteProtect",
            ScanRequest::WriteCmac { .. } => "WriteCmac",
            ScanRequest::Test { .. } => "Test",
        }
    }

    /// Returns `true` if the request modifies tag memory.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ScanRequest::Write { .. }
                | ScanRequest::WriteKey { .. }
                | ScanRequest::WriteProtect { .. }
                | ScanRequest::WriteCmac { .. }
        )
    }
}

impl fmt::Display for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a scan failed. Every failure is terminal for its request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum ScanFailure {
    /// Tag technology or chip family cannot serve the request.
    #[error("incompatible tag: {0}")]
    Incompatible(String),

    /// Connection to the tag was lost mid-operation.
    #[error("tag lost: {0}")]
    Lost(String),

    /// Authentication or frame integrity check failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl ScanFailure {
    /// Human readable reason, as shown to the operator.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            ScanFailure::Incompatible(reason)
            | ScanFailure::Lost(reason)
            | ScanFailure::Auth(reason)
            | ScanFailure::Other(reason) => reason,
        }
    }
}

/// Outcome of a scan request, produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanResult {
    FastRead(Uid),

    Read {
        /// AUTH0 protects part of the memory.
        protected: bool,
        uid: Uid,
        content: Vec<u8>,
    },

    /// The write completed.
    Write,

    /// Diagnostic log.
    Test(String),

    Fail(ScanFailure),
}

impl ScanResult {
    #[must_use]
    pub fn is_fail(&self) -> bool {
        matches!(self, ScanResult::Fail(_))
    }

    #[must_use]
    pub fn failure(&self) -> Option<&ScanFailure> {
        match self {
            ScanResult::Fail(failure) => Some(failure),
            _ => None,
        }
    }

    /// Content of a `Read` result as text, trailing zero padding removed.
    #[must_use]
    pub fn content_text(&self) -> Option<String> {
        match self {
            ScanResult::Read { content, .. } => {
                let end = content
                    .iter()
                    .rposition(|b| *b != 0)
                    .map_or(0, |i| i + 1);
                Some(String::from_utf8_lossy(&content[..end]).into_owned())
            }
            _ => None,
        }
    }
}

impl From<ScanFailure> for ScanResult {
    fn from(failure: ScanFailure) -> Self {
        ScanResult::Fail(failure)
    }
}

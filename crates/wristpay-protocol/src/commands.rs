//! Command codes and key numbers understood by the Ultralight family.

use crate::error::ProtocolError;
use std::fmt;

/// First byte of every command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// Product version information.
    GetVersion = 0x60,

    /// Read four pages.
    Read = 0x30,

    /// Write one page.
    Write = 0xA2,

    /// First authentication step, carries the key number.
    Authenticate = 0x1A,

    /// Second authentication step, carries the host response.
    AuthenticateContinue = 0xAF,
}

impl CommandCode {
    #[inline]
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CommandCode::GetVersion => "GET_VERSION",
            CommandCode::Read => "READ",
            CommandCode::Write => "WRITE",
            CommandCode::Authenticate => "AUTHENTICATE",
            CommandCode::AuthenticateContinue => "AUTHENTICATE_CONTINUE",
        };
        write!(f, "{name}")
    }
}

/// Status byte the tag prefixes to its challenge.
pub const AUTH_CONTINUE: u8 = 0xAF;

/// Status byte the tag prefixes to its confirmation.
pub const AUTH_OK: u8 = 0x00;

/// Key slot addressed by an authentication.
///
/// Ultralight-C only has the data protection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum KeyType {
    #[default]
    DataProtKey = 0,
    UidRetrKey = 1,
    OriginalityKey = 2,
}

impl KeyType {
    #[inline]
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for KeyType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyType::DataProtKey),
            1 => Ok(KeyType::UidRetrKey),
            2 => Ok(KeyType::OriginalityKey),
            other => Err(ProtocolError::InvalidKeyType(other)),
        }
    }
}

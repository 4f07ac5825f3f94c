//! Common types shared by tag and adapter implementations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use wristpay_core::ChipFamily;

/// Default delay between presence checks.
///
/// Some readers send presence heartbeats outside the CMAC session; a
/// CMAC-enabled tag then refuses further traffic. Keeping the delay above a
/// typical transaction avoids heartbeats mid-operation.
pub const DEFAULT_PRESENCE_CHECK_DELAY: Duration = Duration::from_millis(500);

/// Technology advertised by a detected tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Technology {
    /// ISO 14443 Type A.
    NfcA,
    NfcB,
    NfcF,
    NfcV,
    IsoDep,
    MifareClassic,
    /// MIFARE Ultralight, Ultralight-C or NTAG.
    MifareUltralight,
    /// MIFARE Ultralight AES.
    MifareUltralightAes,
    Ndef,
    Other(String),
}

impl Technology {
    /// Parse a platform technology name such as `android.nfc.tech.NfcA`.
    pub fn from_name(name: &str) -> Self {
        let short = name.rsplit('.').next().unwrap_or(name);
        match short {
            "NfcA" => Technology::NfcA,
            "NfcB" => Technology::NfcB,
            "NfcF" => Technology::NfcF,
            "NfcV" => Technology::NfcV,
            "IsoDep" => Technology::IsoDep,
            "MifareClassic" => Technology::MifareClassic,
            "MifareUltralight" => Technology::MifareUltralight,
            "MifareUltralightAES" | "MifareUltralightAes" => Technology::MifareUltralightAes,
            "Ndef" => Technology::Ndef,
            _ => Technology::Other(name.to_string()),
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Technology::Other(name) => write!(f, "{name}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Identify the chip family from an advertised technology list.
///
/// Ultralight-AES takes precedence because AES tags also advertise the
/// plain Ultralight technology.
pub fn detect_family(technologies: &[Technology]) -> Option<ChipFamily> {
    if technologies.contains(&Technology::MifareUltralightAes) {
        Some(ChipFamily::UltralightAes)
    } else if technologies.contains(&Technology::MifareUltralight) {
        Some(ChipFamily::Ultralight)
    } else {
        None
    }
}

/// Reader mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderFlags {
    pub nfc_a: bool,
    pub nfc_b: bool,
    pub nfc_f: bool,
    pub nfc_v: bool,
    /// Do not probe tags for NDEF content.
    pub skip_ndef_check: bool,
    /// Suppress the platform's tag-detected sound.
    pub no_platform_sounds: bool,
}

impl Default for ReaderFlags {
    fn default() -> Self {
        Self {
            nfc_a: true,
            nfc_b: false,
            nfc_f: false,
            nfc_v: false,
            skip_ndef_check: false,
            no_platform_sounds: true,
        }
    }
}

/// Options passed when enabling reader mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    pub flags: ReaderFlags,
    pub presence_check_delay: Duration,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            flags: ReaderFlags::default(),
            presence_check_delay: DEFAULT_PRESENCE_CHECK_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("android.nfc.tech.NfcA", Technology::NfcA)]
    #[case("NfcA", Technology::NfcA)]
    #[case("android.nfc.tech.MifareUltralight", Technology::MifareUltralight)]
    #[case("MifareUltralightAES", Technology::MifareUltralightAes)]
    #[case("android.nfc.tech.Ndef", Technology::Ndef)]
    fn test_technology_from_name(#[case] name: &str, #[case] expected: Technology) {
        assert_eq!(Technology::from_name(name), expected);
    }

    #[test]
    fn test_unknown_technology() {
        let tech = Technology::from_name("vendor.Thing");
        assert_eq!(tech, Technology::Other("vendor.Thing".to_string()));
        assert_eq!(tech.to_string(), "vendor.Thing");
        assert_eq!(Technology::NfcA.to_string(), "NfcA");
    }

    #[rstest]
    #[case(vec![Technology::NfcA, Technology::MifareUltralight], Some(ChipFamily::Ultralight))]
    #[case(
        vec![Technology::NfcA, Technology::MifareUltralight, Technology::MifareUltralightAes],
        Some(ChipFamily::UltralightAes)
    )]
    #[case(vec![Technology::NfcA, Technology::MifareClassic], None)]
    #[case(vec![], None)]
    fn test_detect_family(#[case] techs: Vec<Technology>, #[case] expected: Option<ChipFamily>) {
        assert_eq!(detect_family(&techs), expected);
    }

    #[test]
    fn test_default_options() {
        let options = ReaderOptions::default();
        assert!(options.flags.nfc_a);
        assert!(!options.flags.nfc_b);
        assert!(options.flags.no_platform_sounds);
        assert_eq!(options.presence_check_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_flags_serialization() {
        let flags = ReaderFlags::default();
        let json = serde_json::to_string(&flags).unwrap();
        let parsed: ReaderFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, flags);
    }
}

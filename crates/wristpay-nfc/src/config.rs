//! Reader and scan configuration.
//!
//! [`ReaderConfig`] controls reader mode. [`ScanPolicy`] carries the keys
//! and CMAC/restriction settings supplied by the terminal configuration and
//! turns them into [`ScanRequest`] values. Both deserialize from JSON; keys
//! are hex strings (12 digits for a 3DES secret, 32 for an AES key).
//!
//! ```
//! use wristpay_nfc::ScanPolicy;
//!
//! let policy = ScanPolicy::from_json(
//!     r#"{ "data_protection_key": "00112233445566778899aabbccddeeff", "restricted": true }"#,
//! )
//! .unwrap();
//! assert!(policy.cmac);
//! assert_eq!(policy.read_request(4).name(), "Read");
//! ```

use serde::Deserialize;
use std::time::Duration;
use wristpay_core::{AuthKey, Error, Result, ScanRequest};
use wristpay_hardware::{ReaderFlags, ReaderOptions};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Delay between presence checks. Kept above a transaction's duration
    /// so presence heartbeats do not interleave with CMAC traffic.
    pub presence_check_delay_ms: u64,

    pub platform_sounds: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            presence_check_delay_ms: 500,
            platform_sounds: false,
        }
    }
}

impl ReaderConfig {
    /// Reader mode options: NFC-A only.
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            flags: ReaderFlags {
                nfc_a: true,
                nfc_b: false,
                nfc_f: false,
                nfc_v: false,
                skip_ndef_check: true,
                no_platform_sounds: !self.platform_sounds,
            },
            presence_check_delay: Duration::from_millis(self.presence_check_delay_ms),
        }
    }
}

fn default_cmac() -> bool {
    true
}

/// Authentication policy for scans.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScanPolicy {
    #[serde(default)]
    pub data_protection_key: Option<AuthKey>,

    #[serde(default)]
    pub uid_retrieval_key: Option<AuthKey>,

    /// Tried in order after the data protection key when reading.
    #[serde(default)]
    pub fallback_keys: Vec<AuthKey>,

    #[serde(default = "default_cmac")]
    pub cmac: bool,

    /// Every scan must authenticate.
    #[serde(default)]
    pub restricted: bool,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            data_protection_key: None,
            uid_retrieval_key: None,
            fallback_keys: Vec::new(),
            cmac: true,
            restricted: false,
        }
    }
}

impl ScanPolicy {
    /// Parse and validate a policy.
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.restricted && self.data_protection_key.is_none() {
            return Err(Error::Config(
                "restricted policy needs a data protection key".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fast_read(&self) -> ScanRequest {
        ScanRequest::FastRead
    }

    /// Read from `page`, trying the fallback keys when there are any.
    pub fn read_request(&self, page: u8) -> ScanRequest {
        let keys: Vec<AuthKey> = self
            .data_protection_key
            .iter()
            .chain(&self.fallback_keys)
            .cloned()
            .collect();
        match keys.len() {
            0 | 1 => ScanRequest::Read {
                page,
                key: keys.into_iter().next(),
                cmac: self.cmac,
            },
            _ => ScanRequest::ReadMultiKey {
                page,
                keys,
                cmac: self.cmac,
            },
        }
    }

    pub fn write_request(&self, page: u8, data: Vec<u8>) -> ScanRequest {
        ScanRequest::Write {
            page,
            data,
            key: self.data_protection_key.clone(),
            cmac: self.cmac,
        }
    }

    pub fn protect_request(&self, enable: bool) -> ScanRequest {
        ScanRequest::WriteProtect {
            key: self.data_protection_key.clone(),
            enable,
            cmac: self.cmac,
        }
    }

    pub fn cmac_request(&self, enable: bool) -> ScanRequest {
        ScanRequest::WriteCmac {
            key: self.data_protection_key.clone(),
            enable,
            cmac: self.cmac,
        }
    }

    /// Replace the tag's keys, authenticating with the current key.
    pub fn rekey_request(&self, new_key: AuthKey) -> ScanRequest {
        ScanRequest::WriteKey {
            key: self.data_protection_key.clone(),
            new_key,
            cmac: self.cmac,
        }
    }

    /// Diagnostic run with both configured keys.
    pub fn test_request(&self) -> Result<ScanRequest> {
        match (&self.data_protection_key, &self.uid_retrieval_key) {
            (Some(key0), Some(key1)) => Ok(ScanRequest::Test {
                key0: key0.clone(),
                key1: key1.clone(),
            }),
            _ => Err(Error::Config(
                "diagnostics need both the data protection and the UID retrieval key".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_config_defaults() {
        let config: ReaderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReaderConfig::default());
        let options = config.reader_options();
        assert_eq!(options.presence_check_delay, Duration::from_millis(500));
        assert!(options.flags.no_platform_sounds);
        assert!(!options.flags.nfc_b);
    }

    #[test]
    fn test_policy_keys_from_hex() {
        let policy = ScanPolicy::from_json(
            r#"{
                "data_protection_key": "a1b2c3d4e5f6",
                "fallback_keys": ["000000000000"],
                "cmac": false
            }"#,
        )
        .unwrap();
        assert_eq!(
            policy.data_protection_key,
            Some(AuthKey::tdes(&[0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]).unwrap())
        );
        assert!(matches!(
            policy.read_request(4),
            ScanRequest::ReadMultiKey { ref keys, cmac: false, .. } if keys.len() == 2
        ));
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let err = ScanPolicy::from_json(r#"{ "data_protection_key": "abc" }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_restricted_needs_key() {
        let err = ScanPolicy::from_json(r#"{ "restricted": true }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_open_policy_reads_without_key() {
        let policy = ScanPolicy::default();
        assert_eq!(
            policy.read_request(4),
            ScanRequest::Read {
                page: 4,
                key: None,
                cmac: true
            }
        );
        assert!(policy.test_request().is_err());
        assert_eq!(
            policy.protect_request(true),
            ScanRequest::WriteProtect {
                key: None,
                enable: true,
                cmac: true
            }
        );
    }
}

//! Frame encoding and response parsing.
//!
//! [`CommandCodec`] knows the exact byte layout of every command the
//! subsystem sends and of the responses it expects back. It is bound to a
//! [`ChipFamily`] because the page count and handshake lengths differ
//! between families.
//!
//! # Frames
//!
//! ```text
//! GET_VERSION      60                    -> version bytes
//! READ             30 page               -> 16 bytes (4 pages)
//! WRITE            A2 page d0 d1 d2 d3   -> ACK (0x0A)
//! AUTHENTICATE     1A key                -> AF challenge
//! AUTH_CONTINUE    AF response(32)       -> 00 confirmation
//! ```
//!
//! Encoders validate their arguments and fail before any frame exists, so a
//! precondition error guarantees nothing was transmitted. Decoders turn a
//! single-byte NAK into [`ProtocolError::Nak`].

use crate::{
    commands::{AUTH_CONTINUE, AUTH_OK, CommandCode},
    error::{ProtocolError, Result},
};
use wristpay_core::{
    BitVector, ChipFamily, Uid,
    constants::{ACK, CASCADE_TAG, NAK_MAX, PAGE_SIZE, READ_RESPONSE_LEN, UID_LEN},
};

/// Length in bytes of the host response sent with AUTH_CONTINUE.
pub const AUTH_RESPONSE_LEN: usize = 32;

/// Builds and parses frames for one chip family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandCodec {
    family: ChipFamily,
}

impl CommandCodec {
    pub fn new(family: ChipFamily) -> Self {
        Self { family }
    }

    #[inline]
    pub fn family(&self) -> ChipFamily {
        self.family
    }

    #[inline]
    pub fn page_count(&self) -> u8 {
        self.family.page_count()
    }

    /// Check that `page` exists on this family.
    pub fn check_page(&self, page: u8) -> Result<()> {
        if page >= self.page_count() {
            return Err(ProtocolError::InvalidPage {
                page,
                page_count: self.page_count(),
            });
        }
        Ok(())
    }

    pub fn encode_get_version(&self) -> BitVector {
        BitVector::from([CommandCode::GetVersion.code()])
    }

    pub fn decode_get_version(&self, response: &[u8]) -> Result<BitVector> {
        check_nak(response)?;
        if response.is_empty() {
            return Err(ProtocolError::UnexpectedResponseLength {
                expected: 8,
                actual: 0,
            });
        }
        Ok(BitVector::from_bytes(response))
    }

    /// Encode a READ of the four pages starting at `page`.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidPage`] if `page` is outside the page count.
    pub fn encode_read(&self, page: u8) -> Result<BitVector> {
        self.check_page(page)?;
        Ok(BitVector::from([CommandCode::Read.code(), page]))
    }

    /// Validate a READ response, returning the 16-byte block.
    pub fn decode_read(&self, response: &[u8]) -> Result<BitVector> {
        check_nak(response)?;
        if response.len() != READ_RESPONSE_LEN {
            return Err(ProtocolError::UnexpectedResponseLength {
                expected: READ_RESPONSE_LEN,
                actual: response.len(),
            });
        }
        Ok(BitVector::from_bytes(response))
    }

    /// Extract the requested page (the first of the four) from a READ block.
    pub fn requested_page(&self, block: &BitVector) -> Result<[u8; PAGE_SIZE]> {
        let bytes = block.slice_bytes(0, PAGE_SIZE)?.to_bytes()?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            ProtocolError::UnexpectedResponseLength {
                expected: PAGE_SIZE,
                actual: bytes.len(),
            }
        })
    }

    /// Encode a WRITE of exactly one page.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidPage`] for an out-of-range page and
    /// [`ProtocolError::InvalidPayloadLength`] unless `data` is 4 bytes.
    pub fn encode_write(&self, page: u8, data: &[u8]) -> Result<BitVector> {
        self.check_page(page)?;
        if data.len() != PAGE_SIZE {
            return Err(ProtocolError::InvalidPayloadLength {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }
        let header = BitVector::from([CommandCode::Write.code(), page]);
        Ok(header.concat(&BitVector::from_bytes(data)))
    }

    /// Validate a WRITE acknowledgement.
    pub fn decode_ack(&self, response: &[u8]) -> Result<()> {
        match response {
            [ACK] => Ok(()),
            [code] if *code <= NAK_MAX => Err(ProtocolError::Nak(*code)),
            [code] => Err(ProtocolError::UnexpectedStatus {
                expected: ACK,
                actual: *code,
            }),
            other => Err(ProtocolError::UnexpectedResponseLength {
                expected: 1,
                actual: other.len(),
            }),
        }
    }

    /// Encode the first authentication step for key number `key_type`.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidKeyType`] unless `key_type` is 0, 1 or 2.
    pub fn encode_authenticate1(&self, key_type: u8) -> Result<BitVector> {
        if key_type > 2 {
            return Err(ProtocolError::InvalidKeyType(key_type));
        }
        Ok(BitVector::from([CommandCode::Authenticate.code(), key_type]))
    }

    /// Validate the tag's challenge and return the encrypted random number.
    pub fn decode_authenticate1(&self, response: &[u8]) -> Result<BitVector> {
        self.decode_auth_step(response, AUTH_CONTINUE, self.family.challenge_len())
    }

    /// Encode the second authentication step.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidChallengeLength`] unless `response` is exactly
    /// 32 bytes long.
    pub fn encode_authenticate2(&self, response: &BitVector) -> Result<BitVector> {
        if response.len() != AUTH_RESPONSE_LEN * 8 {
            return Err(ProtocolError::InvalidChallengeLength {
                expected: AUTH_RESPONSE_LEN * 8,
                actual: response.len(),
            });
        }
        let header = BitVector::from([CommandCode::AuthenticateContinue.code()]);
        Ok(header.concat(response))
    }

    /// Validate the tag's confirmation and return its encrypted payload.
    pub fn decode_authenticate2(&self, response: &[u8]) -> Result<BitVector> {
        self.decode_auth_step(response, AUTH_OK, self.family.confirmation_len())
    }

    /// Parse the 7-byte UID from a READ of page 0, verifying both check bytes.
    pub fn decode_uid(&self, block: &[u8]) -> Result<Uid> {
        // UID0..2 BCC0 | UID3..6 | BCC1
        if block.len() < 9 {
            return Err(ProtocolError::UnexpectedResponseLength {
                expected: READ_RESPONSE_LEN,
                actual: block.len(),
            });
        }
        let bcc0 = CASCADE_TAG ^ block[0] ^ block[1] ^ block[2];
        let bcc1 = block[4] ^ block[5] ^ block[6] ^ block[7];
        if bcc0 != block[3] || bcc1 != block[8] {
            return Err(ProtocolError::InvalidData(
                "UID check bytes do not match".to_string(),
            ));
        }

        let mut uid = [0u8; UID_LEN];
        uid[..3].copy_from_slice(&block[..3]);
        uid[3..].copy_from_slice(&block[4..8]);
        Ok(Uid::from_bytes(&uid)?)
    }

    fn decode_auth_step(&self, response: &[u8], status: u8, len: usize) -> Result<BitVector> {
        check_nak(response)?;
        let Some((&first, payload)) = response.split_first() else {
            return Err(ProtocolError::UnexpectedResponseLength {
                expected: len + 1,
                actual: 0,
            });
        };
        if first != status {
            return Err(ProtocolError::UnexpectedStatus {
                expected: status,
                actual: first,
            });
        }
        if payload.len() != len {
            return Err(ProtocolError::UnexpectedResponseLength {
                expected: len + 1,
                actual: response.len(),
            });
        }
        Ok(BitVector::from_bytes(payload))
    }
}

/// A lone byte other than ACK in the 4-bit range is a NAK.
fn check_nak(response: &[u8]) -> Result<()> {
    match response {
        [code] if *code != ACK && *code <= NAK_MAX => Err(ProtocolError::Nak(*code)),
        _ => Ok(()),
    }
}

/// Compute the UID check bytes for pages 0 and 2.
pub fn uid_check_bytes(uid: &[u8; UID_LEN]) -> (u8, u8) {
    (
        CASCADE_TAG ^ uid[0] ^ uid[1] ^ uid[2],
        uid[3] ^ uid[4] ^ uid[5] ^ uid[6],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ultralight() -> CommandCodec {
        CommandCodec::new(ChipFamily::Ultralight)
    }

    fn aes() -> CommandCodec {
        CommandCodec::new(ChipFamily::UltralightAes)
    }

    #[test]
    fn test_get_version_frame() {
        let codec = ultralight();
        assert_eq!(codec.encode_get_version().to_bytes().unwrap(), vec![0x60]);

        let version = [0x00, 0x04, 0x03, 0x01, 0x01, 0x00, 0x0B, 0x03];
        let decoded = codec.decode_get_version(&version).unwrap();
        assert_eq!(decoded.to_bytes().unwrap(), version.to_vec());
        assert!(codec.decode_get_version(&[]).is_err());
    }

    #[rstest]
    #[case(ultralight(), 47, true)]
    #[case(ultralight(), 48, false)]
    #[case(aes(), 48, true)]
    #[case(aes(), 59, true)]
    #[case(aes(), 60, false)]
    #[case(ultralight(), 255, false)]
    fn test_read_page_range(#[case] codec: CommandCodec, #[case] page: u8, #[case] ok: bool) {
        assert_eq!(codec.encode_read(page).is_ok(), ok);
        assert_eq!(codec.encode_write(page, &[0; 4]).is_ok(), ok);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    #[case(100)]
    fn test_write_rejects_payload_length(#[case] len: usize) {
        let err = ultralight().encode_write(4, &vec![0xAA; len]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidPayloadLength {
                expected: 4,
                actual: len
            }
        );
        assert!(err.is_precondition());
    }

    #[test]
    fn test_write_frame() {
        let frame = ultralight().encode_write(5, &[1, 2, 3, 4]).unwrap();
        assert_eq!(frame.to_bytes().unwrap(), vec![0xA2, 0x05, 1, 2, 3, 4]);
    }

    #[test]
    fn test_read_response() {
        let codec = ultralight();
        let response: Vec<u8> = (0..16).collect();
        let block = codec.decode_read(&response).unwrap();
        assert_eq!(codec.requested_page(&block).unwrap(), [0, 1, 2, 3]);

        assert_eq!(codec.decode_read(&[0x00]), Err(ProtocolError::Nak(0x00)));
        assert!(matches!(
            codec.decode_read(&[0; 15]),
            Err(ProtocolError::UnexpectedResponseLength { .. })
        ));
    }

    #[rstest]
    #[case(&[0x0A], Ok(()))]
    #[case(&[0x00], Err(ProtocolError::Nak(0x00)))]
    #[case(&[0x05], Err(ProtocolError::Nak(0x05)))]
    #[case(&[0x42], Err(ProtocolError::UnexpectedStatus { expected: 0x0A, actual: 0x42 }))]
    #[case(&[], Err(ProtocolError::UnexpectedResponseLength { expected: 1, actual: 0 }))]
    fn test_decode_ack(#[case] response: &[u8], #[case] expected: Result<()>) {
        assert_eq!(ultralight().decode_ack(response), expected);
    }

    #[test]
    fn test_authenticate1() {
        let codec = ultralight();
        assert_eq!(
            codec.encode_authenticate1(0).unwrap().to_bytes().unwrap(),
            vec![0x1A, 0x00]
        );
        assert_eq!(
            codec.encode_authenticate1(3),
            Err(ProtocolError::InvalidKeyType(3))
        );

        let mut response = vec![0xAF];
        response.extend_from_slice(&[0x11; 8]);
        assert_eq!(codec.decode_authenticate1(&response).unwrap().len(), 64);

        // AES tags answer with a 16-byte challenge
        assert!(codec.decode_authenticate1(&[0xAF; 17]).is_err());
        let mut aes_response = vec![0xAF];
        aes_response.extend_from_slice(&[0x22; 16]);
        assert_eq!(aes().decode_authenticate1(&aes_response).unwrap().len(), 128);
    }

    #[test]
    fn test_authenticate1_wrong_status() {
        let mut response = vec![0x00];
        response.extend_from_slice(&[0x11; 8]);
        assert_eq!(
            ultralight().decode_authenticate1(&response),
            Err(ProtocolError::UnexpectedStatus {
                expected: 0xAF,
                actual: 0x00
            })
        );
    }

    #[test]
    fn test_authenticate2_length_precondition() {
        let codec = aes();
        let short = BitVector::zeros(31 * 8);
        let err = codec.encode_authenticate2(&short).unwrap_err();
        assert!(err.is_precondition());

        let frame = codec.encode_authenticate2(&BitVector::zeros(256)).unwrap();
        assert_eq!(frame.byte(0).unwrap(), 0xAF);
        assert_eq!(frame.len(), 33 * 8);
    }

    #[test]
    fn test_authenticate2_confirmation() {
        let mut response = vec![0x00];
        response.extend_from_slice(&[0x33; 24]);
        assert_eq!(ultralight().decode_authenticate2(&response).unwrap().len(), 192);
        assert!(aes().decode_authenticate2(&response).is_err());
    }

    #[test]
    fn test_decode_uid() {
        let uid = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let (bcc0, bcc1) = uid_check_bytes(&uid);
        let block = [
            0x04, 0x11, 0x22, bcc0, 0x33, 0x44, 0x55, 0x66, bcc1, 0x48, 0x00, 0x00, 0, 0, 0, 0,
        ];

        let decoded = ultralight().decode_uid(&block).unwrap();
        assert_eq!(decoded.as_u64(), 0x04112233445566);

        let mut corrupted = block;
        corrupted[8] ^= 0xFF;
        assert!(matches!(
            ultralight().decode_uid(&corrupted),
            Err(ProtocolError::InvalidData(_))
        ));
    }
}

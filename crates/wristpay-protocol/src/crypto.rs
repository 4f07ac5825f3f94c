//! Block cipher helpers for the authentication handshakes.
//!
//! Both families use CBC mode without padding: every handshake message is a
//! whole number of blocks. Ultralight-C uses 2-key 3DES (8-byte blocks),
//! Ultralight-AES uses AES-128 (16-byte blocks).

use crate::error::{ProtocolError, Result};
use aes::Aes128;
use cbc::cipher::{
    BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding,
};
use des::TdesEde2;
use sha2::{Digest, Sha256};
use wristpay_core::constants::{TDES_KEY_LEN, TDES_SECRET_LEN};

/// 3DES block size.
pub const TDES_BLOCK: usize = 8;

/// AES block size.
pub const AES_BLOCK: usize = 16;

/// Expand a 6-byte terminal secret into the 16-byte 2-key 3DES key stored on
/// the tag (first half of its SHA-256 digest).
pub fn derive_tdes_key(secret: &[u8; TDES_SECRET_LEN]) -> [u8; TDES_KEY_LEN] {
    let digest = Sha256::digest(secret);
    let mut key = [0u8; TDES_KEY_LEN];
    key.copy_from_slice(&digest[..TDES_KEY_LEN]);
    key
}

pub fn tdes_encrypt(key: &[u8; TDES_KEY_LEN], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    cbc_encrypt::<TdesEde2>(key, iv, data, TDES_BLOCK)
}

pub fn tdes_decrypt(key: &[u8; TDES_KEY_LEN], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    cbc_decrypt::<TdesEde2>(key, iv, data, TDES_BLOCK)
}

pub fn aes_encrypt(key: &[u8; 16], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    cbc_encrypt::<Aes128>(key, iv, data, AES_BLOCK)
}

pub fn aes_decrypt(key: &[u8; 16], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    cbc_decrypt::<Aes128>(key, iv, data, AES_BLOCK)
}

/// Rotate left by one byte: `[a, b, c]` becomes `[b, c, a]`.
pub fn rotate_left(data: &[u8]) -> Vec<u8> {
    let mut rotated = data.to_vec();
    if !rotated.is_empty() {
        rotated.rotate_left(1);
    }
    rotated
}

/// Last cipher block of `data`, the IV for the next message in a chain.
pub fn last_block(data: &[u8], block: usize) -> Vec<u8> {
    data[data.len().saturating_sub(block)..].to_vec()
}

fn check_blocks(data: &[u8], block: usize) -> Result<()> {
    if data.is_empty() || data.len() % block != 0 {
        return Err(ProtocolError::crypto(format!(
            "data length {} is not a multiple of the {block}-byte block",
            data.len()
        )));
    }
    Ok(())
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], data: &[u8], block: usize) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockEncryptMut,
    cbc::Encryptor<C>: KeyIvInit,
{
    check_blocks(data, block)?;
    let mut buf = data.to_vec();
    let len = buf.len();
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| ProtocolError::crypto(e.to_string()))?
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| ProtocolError::crypto("encryption failed"))?;
    Ok(buf)
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8], block: usize) -> Result<Vec<u8>>
where
    C: BlockCipher + BlockDecryptMut,
    cbc::Decryptor<C>: KeyIvInit,
{
    check_blocks(data, block)?;
    let mut buf = data.to_vec();
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| ProtocolError::crypto(e.to_string()))?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| ProtocolError::crypto("decryption failed"))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_left() {
        assert_eq!(rotate_left(&[1, 2, 3, 4]), vec![2, 3, 4, 1]);
        assert_eq!(rotate_left(&[]), Vec::<u8>::new());
    }

    #[test]
    fn test_derive_tdes_key_is_stable() {
        let secret = [0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6];
        let a = derive_tdes_key(&secret);
        let b = derive_tdes_key(&secret);
        assert_eq!(a, b);
        assert_ne!(a, derive_tdes_key(&[0; 6]));
    }

    #[test]
    fn test_aes_known_vector() {
        // FIPS-197 appendix C.1, single block with a zero IV
        let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let key: [u8; 16] = key.try_into().unwrap();
        let plain = hex::decode("00112233445566778899aabbccddeeff").unwrap();

        let cipher = aes_encrypt(&key, &[0; 16], &plain).unwrap();
        assert_eq!(hex::encode(&cipher), "69c4e0d86a7b0430d8cdb78070b4c55a");
        assert_eq!(aes_decrypt(&key, &[0; 16], &cipher).unwrap(), plain);
    }

    #[test]
    fn test_tdes_chaining() {
        let key = derive_tdes_key(&[1, 2, 3, 4, 5, 6]);
        let iv = [7u8; 8];
        let plain: Vec<u8> = (0..32).collect();

        let cipher = tdes_encrypt(&key, &iv, &plain).unwrap();
        assert_ne!(cipher, plain);
        assert_eq!(tdes_decrypt(&key, &iv, &cipher).unwrap(), plain);

        // decrypting the tail with the previous block as IV recovers the tail
        let tail = tdes_decrypt(&key, &cipher[16..24], &cipher[24..]).unwrap();
        assert_eq!(tail, plain[24..].to_vec());
    }

    #[test]
    fn test_rejects_partial_blocks() {
        let key = [0u8; 16];
        assert!(aes_encrypt(&key, &[0; 16], &[0; 15]).is_err());
        assert!(tdes_encrypt(&key, &[0; 8], &[]).is_err());
        assert!(aes_encrypt(&key, &[0; 8], &[0; 16]).is_err());
    }
}

//! CMAC protection for frames exchanged after an AES handshake.
//!
//! Once an Ultralight-AES tag and the host have authenticated with CMAC
//! enabled, every command and every response carries an 8-byte MAC. The MAC
//! is keyed with a session key derived from both random numbers of the
//! handshake and covers a 16-bit command counter, so a replayed or reordered
//! frame fails verification.
//!
//! ```text
//! command   frame ‖ MAC(ctr ‖ frame)
//! response  payload ‖ MAC(ctr + 1 ‖ payload)       then ctr += 1
//! ```
//!
//! The MAC is the odd-indexed half of the full 16-byte CMAC.

use crate::error::{ProtocolError, Result};
use aes::Aes128;
use cmac::{Cmac, Mac};
use subtle::ConstantTimeEq;

/// Length of the truncated MAC appended to every frame.
pub const MAC_LEN: usize = 8;

/// Session-vector prefix for the session MAC key.
const SV_PREFIX: [u8; 6] = [0x5A, 0xA5, 0x00, 0x01, 0x00, 0x80];

/// Session state for CMAC-protected traffic.
///
/// The host seals commands and opens responses; the tag (see the mock
/// hardware) opens commands and seals responses with the same state.
#[derive(Clone)]
pub struct SecureChannel {
    session_key: [u8; 16],
    counter: u16,
}

impl SecureChannel {
    /// Derive the session key from the authentication key and both random
    /// numbers of the handshake. The counter starts at zero.
    pub fn derive(key: &[u8; 16], rnd_a: &[u8; 16], rnd_b: &[u8; 16]) -> Result<Self> {
        let mut sv = [0u8; 32];
        sv[..6].copy_from_slice(&SV_PREFIX);
        sv[6..8].copy_from_slice(&rnd_a[..2]);
        for i in 0..6 {
            sv[8 + i] = rnd_a[2 + i] ^ rnd_b[i];
        }
        sv[14..24].copy_from_slice(&rnd_b[6..]);
        sv[24..].copy_from_slice(&rnd_a[8..]);

        let session_key = full_cmac(key, &sv)?;
        Ok(Self {
            session_key,
            counter: 0,
        })
    }

    /// Current command counter.
    #[inline]
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Append the command MAC to `frame`.
    pub fn seal_command(&self, frame: &[u8]) -> Result<Vec<u8>> {
        self.ensure_counter()?;
        let mac = self.mac(self.counter, frame)?;
        Ok([frame, &mac].concat())
    }

    /// Verify a response MAC, returning the payload and advancing the counter.
    ///
    /// # Errors
    /// [`ProtocolError::CmacMismatch`] if the MAC does not verify. The
    /// counter is left untouched in that case.
    pub fn open_response(&mut self, response: &[u8]) -> Result<Vec<u8>> {
        self.ensure_counter()?;
        let payload = self.verify(self.counter + 1, response)?;
        self.counter += 1;
        Ok(payload)
    }

    /// Tag side: verify a command MAC and return the bare frame.
    pub fn open_command(&self, frame: &[u8]) -> Result<Vec<u8>> {
        self.ensure_counter()?;
        self.verify(self.counter, frame)
    }

    /// Tag side: append the response MAC and advance the counter.
    pub fn seal_response(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.ensure_counter()?;
        let mac = self.mac(self.counter + 1, payload)?;
        self.counter += 1;
        Ok([payload, &mac].concat())
    }

    fn ensure_counter(&self) -> Result<()> {
        if self.counter == u16::MAX {
            return Err(ProtocolError::CounterExhausted);
        }
        Ok(())
    }

    fn verify(&self, counter: u16, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < MAC_LEN {
            return Err(ProtocolError::CmacMismatch);
        }
        let (payload, received) = data.split_at(data.len() - MAC_LEN);
        let expected = self.mac(counter, payload)?;
        if !bool::from(expected.ct_eq(received)) {
            return Err(ProtocolError::CmacMismatch);
        }
        Ok(payload.to_vec())
    }

    fn mac(&self, counter: u16, data: &[u8]) -> Result<[u8; MAC_LEN]> {
        let input = [&counter.to_le_bytes()[..], data].concat();
        let full = full_cmac(&self.session_key, &input)?;
        let mut mac = [0u8; MAC_LEN];
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = full[2 * i + 1];
        }
        Ok(mac)
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

fn full_cmac(key: &[u8], data: &[u8]) -> Result<[u8; 16]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .map_err(|e| ProtocolError::crypto(e.to_string()))?;
    mac.update(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

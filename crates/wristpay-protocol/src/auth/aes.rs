//! Ultralight-AES mutual authentication.
//!
//! Same shape as the 3DES handshake with AES-128 and 16-byte random
//! numbers, every message encrypted with a zero IV:
//!
//! ```text
//! 1A key                -> AF ek(RndB)
//! AF ek(RndA ‖ RndB')   -> 00 ek(RndA')
//! ```
//!
//! When CMAC is requested the authenticator derives a [`SecureChannel`]
//! from both random numbers on success. A failed handshake is final for the
//! session; there is no internal retry.

use crate::{
    codec::CommandCodec,
    commands::KeyType,
    crypto::{self, AES_BLOCK},
    error::{ProtocolError, Result},
    secure_channel::SecureChannel,
};
use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::debug;
use wristpay_core::BitVector;

const ZERO_IV: [u8; AES_BLOCK] = [0; AES_BLOCK];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesState {
    Idle,
    Authenticating,
    /// Handshake done. `cmac_counter` is the command counter when frames are
    /// CMAC protected.
    Authenticated { cmac_counter: Option<u16> },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Authenticating,
    Authenticated,
    Failed,
}

pub struct AesAuthenticator {
    codec: CommandCodec,
    key: [u8; 16],
    key_type: KeyType,
    cmac: bool,
    phase: Phase,
    rnd_a: [u8; 16],
    rnd_b: [u8; 16],
    channel: Option<SecureChannel>,
}

impl AesAuthenticator {
    pub fn new(codec: CommandCodec, key: [u8; 16], key_type: KeyType, cmac: bool) -> Self {
        Self {
            codec,
            key,
            key_type,
            cmac,
            phase: Phase::Idle,
            rnd_a: [0; 16],
            rnd_b: [0; 16],
            channel: None,
        }
    }

    pub fn state(&self) -> AesState {
        match self.phase {
            Phase::Idle => AesState::Idle,
            Phase::Authenticating => AesState::Authenticating,
            Phase::Authenticated => AesState::Authenticated {
                cmac_counter: self.channel.as_ref().map(SecureChannel::counter),
            },
            Phase::Failed => AesState::Failed,
        }
    }

    /// Secure channel of an authenticated CMAC session.
    pub fn channel_mut(&mut self) -> Option<&mut SecureChannel> {
        self.channel.as_mut()
    }

    pub fn begin(&mut self) -> Result<BitVector> {
        if self.phase != Phase::Idle {
            return Err(ProtocolError::invalid_state(format!(
                "cannot start AES authentication from {:?}",
                self.state()
            )));
        }
        let frame = self.codec.encode_authenticate1(self.key_type.code())?;
        self.phase = Phase::Authenticating;
        Ok(frame)
    }

    pub fn respond<R: RngCore + CryptoRng>(
        &mut self,
        challenge: &BitVector,
        rng: &mut R,
    ) -> Result<BitVector> {
        if self.phase != Phase::Authenticating {
            return Err(self.fail(ProtocolError::invalid_state("no challenge expected")));
        }
        match self.build_response(challenge, rng) {
            Ok(frame) => Ok(frame),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn confirm(&mut self, confirmation: &BitVector) -> Result<()> {
        if self.phase != Phase::Authenticating {
            return Err(self.fail(ProtocolError::invalid_state("no confirmation expected")));
        }
        let result = confirmation
            .to_bytes()
            .map_err(ProtocolError::from)
            .and_then(|bytes| crypto::aes_decrypt(&self.key, &ZERO_IV, &bytes));

        match result {
            Ok(plain) if bool::from(plain.ct_eq(&crypto::rotate_left(&self.rnd_a))) => {
                if self.cmac {
                    match SecureChannel::derive(&self.key, &self.rnd_a, &self.rnd_b) {
                        Ok(channel) => self.channel = Some(channel),
                        Err(e) => return Err(self.fail(e)),
                    }
                }
                debug!(
                    key_type = ?self.key_type,
                    cmac = self.cmac,
                    "AES mutual authentication complete"
                );
                self.phase = Phase::Authenticated;
                Ok(())
            }
            Ok(_) => Err(self.fail(ProtocolError::authentication_failed(
                "tag returned a wrong confirmation",
            ))),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Mark the handshake or the established session as failed.
    pub fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        debug!(error = %error, "AES authentication failed");
        self.phase = Phase::Failed;
        self.channel = None;
        error
    }

    fn build_response<R: RngCore + CryptoRng>(
        &mut self,
        challenge: &BitVector,
        rng: &mut R,
    ) -> Result<BitVector> {
        let ek_rnd_b = challenge.to_bytes()?;
        if ek_rnd_b.len() != AES_BLOCK {
            return Err(ProtocolError::authentication_failed("malformed AES challenge"));
        }
        let rnd_b = crypto::aes_decrypt(&self.key, &ZERO_IV, &ek_rnd_b)?;
        self.rnd_b.copy_from_slice(&rnd_b);

        rng.fill_bytes(&mut self.rnd_a);
        let plain = [&self.rnd_a[..], &crypto::rotate_left(&rnd_b)].concat();
        let message = crypto::aes_encrypt(&self.key, &ZERO_IV, &plain)?;

        self.codec.encode_authenticate2(&BitVector::from(message))
    }
}

impl std::fmt::Debug for AesAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesAuthenticator")
            .field("state", &self.state())
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

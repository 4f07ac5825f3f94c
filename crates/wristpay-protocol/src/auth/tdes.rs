//! Ultralight-C 3DES mutual authentication.
//!
//! ```text
//! host                                   tag
//! 1A 00                 ----------->
//!                       <-----------     AF ek(RndB)
//! AF ek(RndA ‖ RndB')   ----------->                      iv = ek(RndB)
//!                       <-----------     00 ek(RndA')     iv = last block
//! ```
//!
//! `X'` is `X` rotated left by one byte. The host proves key possession by
//! returning the tag's number rotated; the tag proves it by returning the
//! host's. Any deviation moves the authenticator to [`TdesState::Failed`],
//! from which only a fresh session can recover.

use crate::{
    codec::CommandCodec,
    commands::KeyType,
    crypto::{self, TDES_BLOCK},
    error::{ProtocolError, Result},
};
use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::debug;
use wristpay_core::{BitVector, constants::TDES_KEY_LEN};

/// Length of the host random number.
pub const TDES_RND_A_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdesState {
    Idle,
    Challenge1Sent,
    MutualAuthComplete,
    Failed,
}

pub struct TdesAuthenticator {
    codec: CommandCodec,
    key: [u8; TDES_KEY_LEN],
    state: TdesState,
    rnd_a: [u8; TDES_RND_A_LEN],
    /// IV for decrypting the confirmation.
    confirm_iv: Vec<u8>,
}

impl TdesAuthenticator {
    /// Create an authenticator for the derived 16-byte 3DES key.
    pub fn new(codec: CommandCodec, key: [u8; TDES_KEY_LEN]) -> Self {
        Self {
            codec,
            key,
            state: TdesState::Idle,
            rnd_a: [0; TDES_RND_A_LEN],
            confirm_iv: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> TdesState {
        self.state
    }

    /// Build the first authentication frame. Ultralight-C has a single key.
    pub fn begin(&mut self) -> Result<BitVector> {
        if self.state != TdesState::Idle {
            return Err(ProtocolError::invalid_state(format!(
                "cannot start 3DES authentication from {:?}",
                self.state
            )));
        }
        let frame = self.codec.encode_authenticate1(KeyType::DataProtKey.code())?;
        self.state = TdesState::Challenge1Sent;
        Ok(frame)
    }

    /// Answer the tag's challenge (the decoded `ek(RndB)`).
    pub fn respond<R: RngCore + CryptoRng>(
        &mut self,
        challenge: &BitVector,
        rng: &mut R,
    ) -> Result<BitVector> {
        if self.state != TdesState::Challenge1Sent {
            return Err(self.fail(ProtocolError::invalid_state(format!(
                "no challenge expected in {:?}",
                self.state
            ))));
        }
        match self.build_response(challenge, rng) {
            Ok(frame) => Ok(frame),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Check the tag's confirmation (the decoded `ek(RndA')`).
    pub fn confirm(&mut self, confirmation: &BitVector) -> Result<()> {
        if self.state != TdesState::Challenge1Sent || self.confirm_iv.is_empty() {
            return Err(self.fail(ProtocolError::invalid_state(format!(
                "no confirmation expected in {:?}",
                self.state
            ))));
        }
        let result = confirmation
            .to_bytes()
            .map_err(ProtocolError::from)
            .and_then(|bytes| crypto::tdes_decrypt(&self.key, &self.confirm_iv, &bytes));

        match result {
            Ok(plain) if bool::from(plain.ct_eq(&crypto::rotate_left(&self.rnd_a))) => {
                debug!("3DES mutual authentication complete");
                self.state = TdesState::MutualAuthComplete;
                Ok(())
            }
            Ok(_) => Err(self.fail(ProtocolError::authentication_failed(
                "tag returned a wrong confirmation",
            ))),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn build_response<R: RngCore + CryptoRng>(
        &mut self,
        challenge: &BitVector,
        rng: &mut R,
    ) -> Result<BitVector> {
        let ek_rnd_b = challenge.to_bytes()?;
        if ek_rnd_b.len() != TDES_BLOCK {
            return Err(ProtocolError::authentication_failed(
                "malformed 3DES challenge",
            ));
        }
        let rnd_b = crypto::tdes_decrypt(&self.key, &[0; TDES_BLOCK], &ek_rnd_b)?;

        rng.fill_bytes(&mut self.rnd_a);
        let plain = [&self.rnd_a[..], &crypto::rotate_left(&rnd_b)].concat();
        let message = crypto::tdes_encrypt(&self.key, &ek_rnd_b, &plain)?;
        self.confirm_iv = crypto::last_block(&message, TDES_BLOCK);

        self.codec.encode_authenticate2(&BitVector::from(message))
    }

    /// Mark the handshake or the established session as failed.
    pub fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        debug!(error = %error, "3DES authentication failed");
        self.state = TdesState::Failed;
        self.confirm_iv.clear();
        error
    }
}

impl std::fmt::Debug for TdesAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdesAuthenticator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

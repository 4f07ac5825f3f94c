//! Challenge-response authentication for both chip families.
//!
//! [`AuthEngine`] is a tagged variant over the two family-specific state
//! machines. Callers drive it with the same three steps regardless of the
//! family:
//!
//! 1. [`begin`](AuthEngine::begin) produces the first frame,
//! 2. [`respond`](AuthEngine::respond) answers the decoded challenge,
//! 3. [`confirm`](AuthEngine::confirm) checks the decoded confirmation.
//!
//! Exactly one engine exists per tag session. Once it has failed it stays
//! failed; a new handshake needs a new session.

pub mod aes;
pub mod tdes;

pub use aes::{AesAuthenticator, AesState};
pub use tdes::{TdesAuthenticator, TdesState};

use crate::{
    codec::CommandCodec,
    commands::KeyType,
    crypto,
    error::{ProtocolError, Result},
    secure_channel::SecureChannel,
};
use rand::{CryptoRng, RngCore};
use tracing::debug;
use wristpay_core::{AuthKey, BitVector, ChipFamily};

#[derive(Debug)]
pub enum AuthEngine {
    Tdes(TdesAuthenticator),
    Aes(AesAuthenticator),
}

impl AuthEngine {
    /// Create the engine matching the codec's family.
    ///
    /// # Errors
    /// [`ProtocolError::KeyFamilyMismatch`] if `key` belongs to the other
    /// family, and [`ProtocolError::InvalidKeyType`] for a key slot other than
    /// the data protection key on Ultralight-C.
    pub fn new(codec: CommandCodec, key: &AuthKey, key_type: KeyType, cmac: bool) -> Result<Self> {
        match (codec.family(), key) {
            (ChipFamily::Ultralight, AuthKey::Tdes(secret)) => {
                if key_type != KeyType::DataProtKey {
                    return Err(ProtocolError::InvalidKeyType(key_type.code()));
                }
                if cmac {
                    debug!("CMAC is not available on Ultralight-C, ignoring");
                }
                let key = crypto::derive_tdes_key(secret);
                Ok(AuthEngine::Tdes(TdesAuthenticator::new(codec, key)))
            }
            (ChipFamily::UltralightAes, AuthKey::Aes(key)) => Ok(AuthEngine::Aes(
                AesAuthenticator::new(codec, *key, key_type, cmac),
            )),
            (family, key) => Err(ProtocolError::KeyFamilyMismatch {
                family,
                key: key.family(),
            }),
        }
    }

    pub fn begin(&mut self) -> Result<BitVector> {
        match self {
            AuthEngine::Tdes(auth) => auth.begin(),
            AuthEngine::Aes(auth) => auth.begin(),
        }
    }

    pub fn respond<R: RngCore + CryptoRng>(
        &mut self,
        challenge: &BitVector,
        rng: &mut R,
    ) -> Result<BitVector> {
        match self {
            AuthEngine::Tdes(auth) => auth.respond(challenge, rng),
            AuthEngine::Aes(auth) => auth.respond(challenge, rng),
        }
    }

    pub fn confirm(&mut self, confirmation: &BitVector) -> Result<()> {
        match self {
            AuthEngine::Tdes(auth) => auth.confirm(confirmation),
            AuthEngine::Aes(auth) => auth.confirm(confirmation),
        }
    }

    /// Returns `true` once the handshake reached its terminal success state.
    pub fn is_authenticated(&self) -> bool {
        match self {
            AuthEngine::Tdes(auth) => auth.state() == TdesState::MutualAuthComplete,
            AuthEngine::Aes(auth) => matches!(auth.state(), AesState::Authenticated { .. }),
        }
    }

    pub fn is_failed(&self) -> bool {
        match self {
            AuthEngine::Tdes(auth) => auth.state() == TdesState::Failed,
            AuthEngine::Aes(auth) => auth.state() == AesState::Failed,
        }
    }

    /// Secure channel, present only for an authenticated AES session with CMAC.
    pub fn channel_mut(&mut self) -> Option<&mut SecureChannel> {
        match self {
            AuthEngine::Tdes(_) => None,
            AuthEngine::Aes(auth) => auth.channel_mut(),
        }
    }

    /// Abandon the session after a frame failed its integrity check.
    pub fn invalidate(&mut self, error: ProtocolError) -> ProtocolError {
        match self {
            AuthEngine::Tdes(auth) => auth.fail(error),
            AuthEngine::Aes(auth) => auth.fail(error),
        }
    }

    pub fn state_name(&self) -> String {
        match self {
            AuthEngine::Tdes(auth) => format!("{:?}", auth.state()),
            AuthEngine::Aes(auth) => format!("{:?}", auth.state()),
        }
    }
}

//! Simulated MIFARE Ultralight family tag.
//!
//! [`MockTag`] answers raw frames the way a real tag does: it keeps a page
//! memory, enforces AUTH0 protection, runs the tag side of the 3DES and AES
//! handshakes and, when the CMAC flag is set in CFG0, verifies and produces
//! CMACs on every frame after authentication.
//!
//! Protection model: when not authenticated, READ of a user page at or above
//! AUTH0 and WRITE of any page at or above AUTH0 answer NAK. Configuration
//! pages stay readable; key pages always read as zeros.
//!
//! Faults can be injected through the builder: the tag can leave the field
//! after a number of frames, stop answering without leaving it, corrupt the
//! MAC of a chosen protected response, or refuse every authentication.

use crate::{
    error::{HardwareError, Result},
    traits::NfcTag,
    types::Technology,
};
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use std::sync::Arc;
use tracing::trace;
use wristpay_core::{
    ChipFamily,
    constants::{
        ACK, AES_CFG0_PAGE, AES_CMAC_FLAG, AES_DATA_PROT_KEY_PAGE, AES_ORIGINALITY_KEY_PAGE,
        AES_UID_RETR_KEY_PAGE, PAGE_SIZE, READ_RESPONSE_LEN, TDES_SECRET_LEN,
        ULC_KEY_PAGE, UID_LEN, USER_MEMORY_END, USER_MEMORY_START,
    },
};
use wristpay_protocol::{SecureChannel, codec::uid_check_bytes, crypto};

/// NAK for invalid arguments and refused access.
const NAK_INVALID: u8 = 0x00;

/// NAK for a frame that failed its integrity check.
const NAK_CRC: u8 = 0x01;

/// Reported when a silent tag lets a transceive expire.
const TRANSCEIVE_TIMEOUT_MS: u64 = 300;

const VERSION_AES: [u8; 8] = [0x00, 0x04, 0x03, 0x01, 0x04, 0x00, 0x0F, 0x03];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chip {
    /// No authentication support.
    Ultralight,
    UltralightC,
    UltralightAes,
}

impl Chip {
    fn family(self) -> ChipFamily {
        match self {
            Chip::Ultralight | Chip::UltralightC => ChipFamily::Ultralight,
            Chip::UltralightAes => ChipFamily::UltralightAes,
        }
    }
}

enum AuthState {
    None,
    TdesChallenge { key: [u8; 16], rnd_b: [u8; 8], ek_rnd_b: Vec<u8> },
    AesChallenge { key: [u8; 16], rnd_b: [u8; 16] },
    Authenticated { channel: Option<SecureChannel> },
}

enum Reply {
    Data(Vec<u8>),
    Nak(u8),
}

struct TagState {
    chip: Chip,
    memory: Vec<u8>,
    connected: bool,
    lost: bool,
    auth: AuthState,
    rng: StdRng,

    frames: Vec<Vec<u8>>,
    connect_count: usize,
    close_count: usize,
    protected_responses: usize,

    lose_after: Option<usize>,
    time_out_after: Option<usize>,
    corrupt_mac_on: Option<usize>,
    reject_auth: bool,
}

impl TagState {
    fn page_count(&self) -> u8 {
        self.chip.family().page_count()
    }

    fn page(&self, page: u8) -> [u8; PAGE_SIZE] {
        let start = page as usize * PAGE_SIZE;
        let mut out = [0u8; PAGE_SIZE];
        out.copy_from_slice(&self.memory[start..start + PAGE_SIZE]);
        out
    }

    fn set_page(&mut self, page: u8, data: &[u8]) {
        let start = page as usize * PAGE_SIZE;
        self.memory[start..start + PAGE_SIZE].copy_from_slice(data);
    }

    fn auth0(&self) -> u8 {
        let (page, byte) = self.chip.family().auth0_location();
        self.page(page)[byte]
    }

    fn cmac_enabled(&self) -> bool {
        self.chip == Chip::UltralightAes && self.page(AES_CFG0_PAGE)[0] & AES_CMAC_FLAG != 0
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.auth, AuthState::Authenticated { .. })
    }

    fn is_key_page(&self, page: u8) -> bool {
        match self.chip {
            Chip::Ultralight | Chip::UltralightC => (ULC_KEY_PAGE..ULC_KEY_PAGE + 4).contains(&page),
            Chip::UltralightAes => (AES_DATA_PROT_KEY_PAGE..AES_ORIGINALITY_KEY_PAGE + 4).contains(&page),
        }
    }

    fn key_at(&self, page: u8) -> [u8; 16] {
        let start = page as usize * PAGE_SIZE;
        let mut key = [0u8; 16];
        key.copy_from_slice(&self.memory[start..start + 16]);
        key
    }

    fn process(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if self.lost {
            return Err(HardwareError::tag_lost("tag left the field"));
        }
        if !self.connected {
            return Err(HardwareError::NotConnected);
        }
        self.frames.push(frame.to_vec());
        if self.lose_after.is_some_and(|n| self.frames.len() > n) {
            self.lost = true;
            self.connected = false;
            return Err(HardwareError::tag_lost("tag left the field"));
        }
        if self.time_out_after.is_some_and(|n| self.frames.len() > n) {
            return Err(HardwareError::timeout(TRANSCEIVE_TIMEOUT_MS));
        }

        let secure = matches!(
            self.auth,
            AuthState::Authenticated { channel: Some(_) }
        );
        let command = if let AuthState::Authenticated {
            channel: Some(channel),
        } = &self.auth
        {
            match channel.open_command(frame) {
                Ok(command) => command,
                Err(_) => {
                    trace!("command MAC rejected");
                    self.auth = AuthState::None;
                    return Ok(vec![NAK_CRC]);
                }
            }
        } else {
            frame.to_vec()
        };

        match self.execute(&command) {
            Reply::Nak(code) => {
                // a NAK returns the tag to its unauthenticated state
                self.auth = AuthState::None;
                Ok(vec![code])
            }
            // the handshake confirmation goes out before the channel is in use
            Reply::Data(payload) if secure => self.seal(payload),
            Reply::Data(payload) => Ok(payload),
        }
    }

    fn seal(&mut self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let AuthState::Authenticated {
            channel: Some(channel),
        } = &mut self.auth
        else {
            return Ok(payload);
        };
        let mut sealed = channel
            .seal_response(&payload)
            .map_err(|e| HardwareError::other(e.to_string()))?;

        self.protected_responses += 1;
        if self.corrupt_mac_on == Some(self.protected_responses)
            && let Some(last) = sealed.last_mut()
        {
            *last ^= 0xFF;
        }
        Ok(sealed)
    }

    fn execute(&mut self, command: &[u8]) -> Reply {
        match command {
            [0x60] => match self.chip {
                Chip::UltralightAes => Reply::Data(VERSION_AES.to_vec()),
                _ => Reply::Nak(NAK_INVALID),
            },
            [0x30, page] => self.read(*page),
            [0xA2, page, data @ ..] if data.len() == PAGE_SIZE => self.write(*page, data),
            [0x1A, key_no] => self.authenticate1(*key_no),
            [0xAF, message @ ..] if message.len() == 32 => self.authenticate2(message),
            _ => Reply::Nak(NAK_INVALID),
        }
    }

    fn read(&self, page: u8) -> Reply {
        if page >= self.page_count() {
            return Reply::Nak(NAK_INVALID);
        }
        if !self.is_authenticated() && page >= self.auth0() && page < USER_MEMORY_END {
            return Reply::Nak(NAK_INVALID);
        }
        let mut block = Vec::with_capacity(READ_RESPONSE_LEN);
        for i in 0..4u8 {
            let p = (page + i) % self.page_count();
            if self.is_key_page(p) {
                block.extend_from_slice(&[0; PAGE_SIZE]);
            } else {
                block.extend_from_slice(&self.page(p));
            }
        }
        Reply::Data(block)
    }

    fn write(&mut self, page: u8, data: &[u8]) -> Reply {
        if page < USER_MEMORY_START || page >= self.page_count() {
            return Reply::Nak(NAK_INVALID);
        }
        if !self.is_authenticated() && page >= self.auth0() {
            return Reply::Nak(NAK_INVALID);
        }
        self.set_page(page, data);
        Reply::Data(vec![ACK])
    }

    fn authenticate1(&mut self, key_no: u8) -> Reply {
        self.auth = AuthState::None;
        match (self.chip, key_no) {
            (Chip::UltralightC, 0) => {
                let key = self.key_at(ULC_KEY_PAGE);
                let mut rnd_b = [0u8; 8];
                self.rng.fill_bytes(&mut rnd_b);
                let Ok(ek_rnd_b) = crypto::tdes_encrypt(&key, &[0; 8], &rnd_b) else {
                    return Reply::Nak(NAK_INVALID);
                };
                let reply = framed(0xAF, &ek_rnd_b);
                self.auth = AuthState::TdesChallenge {
                    key,
                    rnd_b,
                    ek_rnd_b,
                };
                Reply::Data(reply)
            }
            (Chip::UltralightAes, 0..=2) => {
                let key = self.key_at(AES_DATA_PROT_KEY_PAGE + key_no * 4);
                let mut rnd_b = [0u8; 16];
                self.rng.fill_bytes(&mut rnd_b);
                let Ok(ek_rnd_b) = crypto::aes_encrypt(&key, &[0; 16], &rnd_b) else {
                    return Reply::Nak(NAK_INVALID);
                };
                self.auth = AuthState::AesChallenge { key, rnd_b };
                Reply::Data(framed(0xAF, &ek_rnd_b))
            }
            _ => Reply::Nak(NAK_INVALID),
        }
    }

    fn authenticate2(&mut self, message: &[u8]) -> Reply {
        let pending = std::mem::replace(&mut self.auth, AuthState::None);
        if self.reject_auth {
            return Reply::Nak(NAK_INVALID);
        }
        match pending {
            AuthState::TdesChallenge {
                key,
                rnd_b,
                ek_rnd_b,
            } => {
                let Ok(plain) = crypto::tdes_decrypt(&key, &ek_rnd_b, message) else {
                    return Reply::Nak(NAK_INVALID);
                };
                if plain[24..] != crypto::rotate_left(&rnd_b)[..] {
                    return Reply::Nak(NAK_INVALID);
                }
                let iv = crypto::last_block(message, 8);
                let Ok(confirmation) =
                    crypto::tdes_encrypt(&key, &iv, &crypto::rotate_left(&plain[..24]))
                else {
                    return Reply::Nak(NAK_INVALID);
                };
                self.auth = AuthState::Authenticated { channel: None };
                Reply::Data(framed(0x00, &confirmation))
            }
            AuthState::AesChallenge { key, rnd_b } => {
                let Ok(plain) = crypto::aes_decrypt(&key, &[0; 16], message) else {
                    return Reply::Nak(NAK_INVALID);
                };
                if plain[16..] != crypto::rotate_left(&rnd_b)[..] {
                    return Reply::Nak(NAK_INVALID);
                }
                let mut rnd_a = [0u8; 16];
                rnd_a.copy_from_slice(&plain[..16]);
                let Ok(confirmation) =
                    crypto::aes_encrypt(&key, &[0; 16], &crypto::rotate_left(&rnd_a))
                else {
                    return Reply::Nak(NAK_INVALID);
                };
                let channel = if self.cmac_enabled() {
                    SecureChannel::derive(&key, &rnd_a, &rnd_b).ok()
                } else {
                    None
                };
                self.auth = AuthState::Authenticated { channel };
                Reply::Data(framed(0x00, &confirmation))
            }
            _ => Reply::Nak(NAK_INVALID),
        }
    }
}

fn framed(status: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(status);
    frame.extend_from_slice(body);
    frame
}

/// Simulated tag handle, as delivered by [`MockNfcAdapter`](super::MockNfcAdapter).
///
/// # Examples
///
/// ```
/// use wristpay_hardware::mock::MockTag;
/// use wristpay_hardware::traits::NfcTag;
///
/// #[tokio::main]
/// async fn main() -> wristpay_hardware::Result<()> {
///     let (mut tag, spy) = MockTag::ultralight_aes(&[0x04, 0x01, 0x02, 0x03], [0x11; 16])
///         .cmac(true)
///         .build();
///
///     tag.connect().await?;
///     let response = tag.transceive(&[0x1A, 0x00]).await?;
///     assert_eq!(response[0], 0xAF);
///     assert_eq!(response.len(), 17);
///     tag.close().await?;
///
///     assert_eq!(spy.connect_count(), 1);
///     assert_eq!(spy.close_count(), 1);
///     Ok(())
/// }
/// ```
pub struct MockTag {
    id: Vec<u8>,
    technologies: Vec<Technology>,
    state: Arc<Mutex<TagState>>,
}

impl MockTag {
    /// Plain MIFARE Ultralight without authentication.
    pub fn ultralight(id: &[u8]) -> MockTagBuilder {
        MockTagBuilder::new(Chip::Ultralight, id)
    }

    /// MIFARE Ultralight-C protected by the 3DES key derived from `secret`.
    pub fn ultralight_c(id: &[u8], secret: &[u8; TDES_SECRET_LEN]) -> MockTagBuilder {
        let mut builder = MockTagBuilder::new(Chip::UltralightC, id);
        let key = crypto::derive_tdes_key(secret);
        builder.write(ULC_KEY_PAGE, &key);
        builder
    }

    /// MIFARE Ultralight-AES with `data_key` as data protection key.
    ///
    /// The UID retrieval key defaults to the same value.
    pub fn ultralight_aes(id: &[u8], data_key: [u8; 16]) -> MockTagBuilder {
        let mut builder = MockTagBuilder::new(Chip::UltralightAes, id);
        builder.write(AES_DATA_PROT_KEY_PAGE, &data_key);
        builder.write(AES_UID_RETR_KEY_PAGE, &data_key);
        builder.write(AES_ORIGINALITY_KEY_PAGE, &[0xA5; 16]);
        builder
    }
}

impl NfcTag for MockTag {
    fn id(&self) -> &[u8] {
        &self.id
    }

    fn technologies(&self) -> &[Technology] {
        &self.technologies
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(HardwareError::tag_lost("tag left the field"));
        }
        state.connected = true;
        state.auth = AuthState::None;
        state.connect_count += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.auth = AuthState::None;
        state.close_count += 1;
        Ok(())
    }

    async fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        self.state.lock().process(frame)
    }
}

impl std::fmt::Debug for MockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTag")
            .field("id", &self.id)
            .field("technologies", &self.technologies)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MockTag`].
pub struct MockTagBuilder {
    chip: Chip,
    id: Vec<u8>,
    technologies: Vec<Technology>,
    memory: Vec<u8>,
    lose_after: Option<usize>,
    time_out_after: Option<usize>,
    corrupt_mac_on: Option<usize>,
    reject_auth: bool,
    seed: u64,
}

impl MockTagBuilder {
    fn new(chip: Chip, id: &[u8]) -> Self {
        let family = chip.family();
        let mut memory = vec![0u8; family.page_count() as usize * PAGE_SIZE];

        let mut uid = [0u8; UID_LEN];
        let len = id.len().min(UID_LEN);
        uid[..len].copy_from_slice(&id[..len]);
        let (bcc0, bcc1) = uid_check_bytes(&uid);
        memory[..12].copy_from_slice(&[
            uid[0], uid[1], uid[2], bcc0, uid[3], uid[4], uid[5], uid[6], bcc1, 0x48, 0x00, 0x00,
        ]);

        let (page, byte) = family.auth0_location();
        memory[page as usize * PAGE_SIZE + byte] = family.auth0_disabled();

        let mut technologies = vec![Technology::NfcA, Technology::MifareUltralight];
        if chip == Chip::UltralightAes {
            technologies.push(Technology::MifareUltralightAes);
        }

        Self {
            chip,
            id: id.to_vec(),
            technologies,
            memory,
            lose_after: None,
            time_out_after: None,
            corrupt_mac_on: None,
            reject_auth: false,
            seed: 0x5EED,
        }
    }

    fn write(&mut self, page: u8, data: &[u8]) {
        let start = page as usize * PAGE_SIZE;
        self.memory[start..start + data.len()].copy_from_slice(data);
    }

    /// Replace the advertised technology list.
    pub fn technologies(mut self, technologies: Vec<Technology>) -> Self {
        self.technologies = technologies;
        self
    }

    /// Store `data` in memory starting at `page`.
    pub fn user_data(mut self, page: u8, data: &[u8]) -> Self {
        self.write(page, data);
        self
    }

    /// Set AUTH0, the first protected page.
    pub fn auth0(mut self, auth0: u8) -> Self {
        let (page, byte) = self.chip.family().auth0_location();
        self.memory[page as usize * PAGE_SIZE + byte] = auth0;
        self
    }

    /// Require CMAC secure messaging after authentication (Ultralight-AES).
    pub fn cmac(mut self, enable: bool) -> Self {
        let index = AES_CFG0_PAGE as usize * PAGE_SIZE;
        if self.chip == Chip::UltralightAes {
            if enable {
                self.memory[index] |= AES_CMAC_FLAG;
            } else {
                self.memory[index] &= !AES_CMAC_FLAG;
            }
        }
        self
    }

    /// Set the UID retrieval key (Ultralight-AES).
    pub fn uid_key(mut self, key: [u8; 16]) -> Self {
        if self.chip == Chip::UltralightAes {
            self.write(AES_UID_RETR_KEY_PAGE, &key);
        }
        self
    }

    /// Leave the field after answering `frames` frames.
    pub fn lose_after(mut self, frames: usize) -> Self {
        self.lose_after = Some(frames);
        self
    }

    /// Stay in the field but leave every frame after the first `frames`
    /// unanswered.
    pub fn time_out_after(mut self, frames: usize) -> Self {
        self.time_out_after = Some(frames);
        self
    }

    /// Corrupt the MAC of the `n`-th CMAC-protected response (1-based).
    pub fn corrupt_mac_on(mut self, n: usize) -> Self {
        self.corrupt_mac_on = Some(n);
        self
    }

    /// Answer NAK to every second authentication step.
    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    /// Seed for the tag's random numbers.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> (MockTag, MockTagHandle) {
        let state = Arc::new(Mutex::new(TagState {
            chip: self.chip,
            memory: self.memory,
            connected: false,
            lost: false,
            auth: AuthState::None,
            rng: StdRng::seed_from_u64(self.seed),
            frames: Vec::new(),
            connect_count: 0,
            close_count: 0,
            protected_responses: 0,
            lose_after: self.lose_after,
            time_out_after: self.time_out_after,
            corrupt_mac_on: self.corrupt_mac_on,
            reject_auth: self.reject_auth,
        }));

        let tag = MockTag {
            id: self.id,
            technologies: self.technologies,
            state: Arc::clone(&state),
        };
        (tag, MockTagHandle { state })
    }
}

/// Spy on a [`MockTag`]: every frame it received, connection counts and
/// its memory.
#[derive(Clone)]
pub struct MockTagHandle {
    state: Arc<Mutex<TagState>>,
}

impl MockTagHandle {
    /// Every frame received, in order, including frames answered with NAK.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().is_authenticated()
    }

    /// Current content of `page`.
    pub fn page(&self, page: u8) -> [u8; PAGE_SIZE] {
        self.state.lock().page(page)
    }

    /// `len` bytes of memory starting at `page`.
    pub fn memory(&self, page: u8, len: usize) -> Vec<u8> {
        let start = page as usize * PAGE_SIZE;
        self.state.lock().memory[start..start + len].to_vec()
    }

    pub fn auth0(&self) -> u8 {
        self.state.lock().auth0()
    }

    pub fn cmac_enabled(&self) -> bool {
        self.state.lock().cmac_enabled()
    }

    /// Take the tag out of the field.
    pub fn remove(&self) {
        let mut state = self.state.lock();
        state.lost = true;
        state.connected = false;
    }
}

impl std::fmt::Debug for MockTagHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTagHandle")
            .field("frames", &state.frames.len())
            .field("connect_count", &state.connect_count)
            .field("close_count", &state.close_count)
            .finish()
    }
}

//! One tag presence: connection, authentication state and memory access.
//!
//! A [`TagSession`] exclusively owns the platform tag handle from
//! [`open`](TagSession::open) to [`close`](TagSession::close). It holds the
//! only [`AuthEngine`] for the presence, so "what is authenticated" is a
//! property of the session and nothing else.
//!
//! Every page access goes through an access check before a frame is built:
//!
//! - with an engine, the engine must be in its authenticated state;
//! - without one, READ of user pages at or above AUTH0 and WRITE of any
//!   page at or above AUTH0 are refused.
//!
//! Precondition errors (page range, payload length) are raised before the
//! access check, and neither sends a byte to the tag.

use crate::error::{Result, TagError};
use rand::rngs::OsRng;
use tracing::{debug, info, trace, warn};
use wristpay_core::{
    AuthKey, BitVector, ChipFamily, Uid,
    constants::{
        ACK, AES_CFG0_PAGE, AES_CMAC_FLAG, AES_DATA_PROT_KEY_PAGE, AES_UID_RETR_KEY_PAGE, PAGE_SIZE,
        ULC_KEY_PAGE, USER_MEMORY_END, USER_MEMORY_START,
    },
};
use wristpay_hardware::NfcTag;
use wristpay_protocol::{AuthEngine, CommandCodec, KeyType, ProtocolError, crypto};

/// Check that `len` bytes starting at `page` fit in user memory.
///
/// Returns the number of pages the data occupies once zero-padded.
pub fn user_range(page: u8, len: usize) -> std::result::Result<u8, wristpay_core::Error> {
    let pages = len.div_ceil(PAGE_SIZE);
    let end = page as usize + pages;
    if page < USER_MEMORY_START || end > USER_MEMORY_END as usize {
        return Err(wristpay_core::Error::InvalidPageRange(format!(
            "{len} bytes from page {page:#04x} do not fit in user memory \
             {USER_MEMORY_START:#04x}..{USER_MEMORY_END:#04x}"
        )));
    }
    Ok(pages as u8)
}

/// Connection to one physical tag for the duration of one operation.
pub struct TagSession<T: NfcTag> {
    tag: T,
    codec: CommandCodec,
    engine: Option<AuthEngine>,
    /// AUTH0 as last read or written.
    auth0: Option<u8>,
    closed: bool,
}

impl<T: NfcTag> TagSession<T> {
    /// Connect to `tag`. If the connection cannot be opened the tag is
    /// closed before the error is returned.
    pub async fn open(mut tag: T, family: ChipFamily) -> Result<Self> {
        if let Err(e) = tag.connect().await {
            debug!(error = %e, "Connect failed");
            if let Err(close) = tag.close().await {
                trace!(error = %close, "Close after failed connect");
            }
            return Err(e.into());
        }
        debug!(id = %hex::encode_upper(tag.id()), family = %family, "Session opened");
        Ok(Self {
            tag,
            codec: CommandCodec::new(family),
            engine: None,
            auth0: None,
            closed: false,
        })
    }

    /// Close the connection. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine = None;
        self.tag.close().await?;
        debug!("Session closed");
        Ok(())
    }

    /// Drop the connection and the authentication state and connect again,
    /// so a fresh handshake can run.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.engine = None;
        self.auth0 = None;
        self.tag.close().await?;
        self.tag.connect().await?;
        trace!("Session reconnected");
        Ok(())
    }

    #[inline]
    pub fn family(&self) -> ChipFamily {
        self.codec.family()
    }

    /// Anti-collision identifier reported by the platform.
    pub fn tag_id(&self) -> &[u8] {
        self.tag.id()
    }

    pub fn is_authenticated(&self) -> bool {
        self.engine.as_ref().is_some_and(AuthEngine::is_authenticated)
    }

    /// Run the mutual authentication handshake with `key`.
    ///
    /// A session runs at most one handshake; use
    /// [`reconnect`](Self::reconnect) before trying another key.
    ///
    /// # Errors
    /// - [`TagError::Incompatible`] if the key does not fit the chip family
    ///   or key slot; nothing is transmitted.
    /// - a hardware error if the tag was lost during the handshake.
    /// - [`TagError::Auth`] for every other handshake failure.
    pub async fn authenticate(&mut self, key: &AuthKey, key_type: KeyType, cmac: bool) -> Result<()> {
        if self.engine.is_some() {
            return Err(TagError::auth("session already ran its handshake"));
        }
        let mut engine = AuthEngine::new(self.codec, key, key_type, cmac)
            .map_err(|e| TagError::incompatible(e.to_string()))?;

        let outcome = self.handshake(&mut engine).await;
        if outcome.is_err() && !engine.is_failed() {
            engine.invalidate(ProtocolError::authentication_failed("handshake interrupted"));
        }
        let state = engine.state_name();
        self.engine = Some(engine);

        match outcome {
            Ok(()) => {
                info!(family = %self.family(), key_type = ?key_type, "Tag authenticated");
                Ok(())
            }
            Err(e) if e.is_lost() => Err(e),
            Err(e) => {
                warn!(error = %e, %state, "Authentication failed");
                Err(TagError::auth(e.to_string()))
            }
        }
    }

    async fn handshake(&mut self, engine: &mut AuthEngine) -> Result<()> {
        let first = engine.begin()?;
        let response = self.exchange(&first).await?;
        let challenge = self.codec.decode_authenticate1(&response)?;

        let second = engine.respond(&challenge, &mut OsRng)?;
        let response = self.exchange(&second).await?;
        let confirmation = self.codec.decode_authenticate2(&response)?;

        engine.confirm(&confirmation)?;
        Ok(())
    }

    /// Raw GET_VERSION answer.
    pub async fn get_version(&mut self) -> Result<Vec<u8>> {
        let frame = self.codec.encode_get_version();
        let response = self.exchange(&frame).await?;
        Ok(self.codec.decode_get_version(&response)?.to_bytes()?)
    }

    /// Read one page.
    pub async fn read_page(&mut self, page: u8) -> Result<[u8; PAGE_SIZE]> {
        let frame = self.codec.encode_read(page)?;
        self.ensure_access(page, false).await?;
        let block = self.read_block(frame).await?;
        Ok(self.codec.requested_page(&block)?)
    }

    /// Write one page.
    pub async fn write_page(&mut self, page: u8, data: &[u8]) -> Result<()> {
        let frame = self.codec.encode_write(page, data)?;
        self.ensure_access(page, true).await?;
        let response = self.exchange(&frame).await?;
        self.codec.decode_ack(&response)?;
        trace!(page, "Page written");
        Ok(())
    }

    /// Read the 7-byte UID from pages 0 to 2, verifying its check bytes.
    pub async fn read_uid(&mut self) -> Result<Uid> {
        let frame = self.codec.encode_read(0)?;
        let block = self.read_block(frame).await?.to_bytes()?;
        Ok(self.codec.decode_uid(&block)?)
    }

    /// First protected page. Equal to the page count when protection is off.
    pub async fn auth0(&mut self) -> Result<u8> {
        if let Some(auth0) = self.auth0 {
            return Ok(auth0);
        }
        let (page, byte) = self.family().auth0_location();
        let frame = self.codec.encode_read(page)?;
        let block = self.read_block(frame).await?;
        let auth0 = self.codec.requested_page(&block)?[byte];
        self.auth0 = Some(auth0);
        Ok(auth0)
    }

    pub async fn set_auth0(&mut self, auth0: u8) -> Result<()> {
        let (page, byte) = self.family().auth0_location();
        let mut config = self.read_page(page).await?;
        config[byte] = auth0;
        self.write_page(page, &config).await?;
        self.auth0 = Some(auth0);
        debug!(auth0, "AUTH0 updated");
        Ok(())
    }

    /// Returns `true` if AUTH0 protects part of the memory.
    pub async fn is_protected(&mut self) -> Result<bool> {
        let page_count = self.codec.page_count();
        Ok(self.auth0().await? < page_count)
    }

    /// Whether the tag requires CMAC secure messaging (Ultralight-AES).
    pub async fn cmac_required(&mut self) -> Result<bool> {
        self.require_aes("CMAC configuration")?;
        let config = self.read_page(AES_CFG0_PAGE).await?;
        Ok(config[0] & AES_CMAC_FLAG != 0)
    }

    pub async fn set_cmac(&mut self, enable: bool) -> Result<()> {
        self.require_aes("CMAC configuration")?;
        let mut config = self.read_page(AES_CFG0_PAGE).await?;
        if enable {
            config[0] |= AES_CMAC_FLAG;
        } else {
            config[0] &= !AES_CMAC_FLAG;
        }
        self.write_page(AES_CFG0_PAGE, &config).await?;
        debug!(enable, "CMAC requirement updated");
        Ok(())
    }

    /// Read user memory from `from` to its end.
    ///
    /// Without authentication the read stops at AUTH0, so only the public
    /// part of the user memory is returned.
    pub async fn read_user_memory(&mut self, from: u8) -> Result<Vec<u8>> {
        user_range(from, PAGE_SIZE)?;
        let limit = if self.is_authenticated() {
            USER_MEMORY_END
        } else {
            self.auth0().await?.min(USER_MEMORY_END)
        };
        if from >= limit {
            return Err(TagError::not_authenticated(format!("READ {from:#04x}")));
        }

        let mut content = Vec::with_capacity((limit - from) as usize * PAGE_SIZE);
        let mut page = from;
        while page < limit {
            let frame = self.codec.encode_read(page)?;
            self.ensure_access(page, false).await?;
            let block = self.read_block(frame).await?.to_bytes()?;
            let pages = (limit - page).min(4);
            content.extend_from_slice(&block[..pages as usize * PAGE_SIZE]);
            page += pages;
        }
        Ok(content)
    }

    /// Write `data`, zero-padded to whole pages, starting at user page `page`.
    pub async fn write_user_memory(&mut self, page: u8, data: &[u8]) -> Result<()> {
        user_range(page, data.len())?;
        for (offset, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            let mut buf = [0u8; PAGE_SIZE];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.write_page(page + offset as u8, &buf).await?;
        }
        Ok(())
    }

    /// Store `new_key` in the tag's key pages.
    ///
    /// Ultralight-C gets the expanded 3DES key; Ultralight-AES gets the key
    /// as data protection and as UID retrieval key.
    pub async fn write_key(&mut self, new_key: &AuthKey) -> Result<()> {
        match (self.family(), new_key) {
            (ChipFamily::Ultralight, AuthKey::Tdes(secret)) => {
                let key = crypto::derive_tdes_key(secret);
                self.write_pages(ULC_KEY_PAGE, &key).await?;
            }
            (ChipFamily::UltralightAes, AuthKey::Aes(key)) => {
                self.write_pages(AES_DATA_PROT_KEY_PAGE, key).await?;
                self.write_pages(AES_UID_RETR_KEY_PAGE, key).await?;
            }
            (family, key) => {
                return Err(TagError::incompatible(format!(
                    "cannot store a {} key on a {family} tag",
                    key.family()
                )));
            }
        }
        info!(family = %self.family(), "Tag key replaced");
        Ok(())
    }

    async fn write_pages(&mut self, first: u8, data: &[u8]) -> Result<()> {
        for (offset, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            self.write_page(first + offset as u8, chunk).await?;
        }
        Ok(())
    }

    fn require_aes(&self, what: &str) -> Result<()> {
        if self.family() != ChipFamily::UltralightAes {
            return Err(TagError::incompatible(format!(
                "{what} needs an Ultralight-AES tag"
            )));
        }
        Ok(())
    }

    async fn ensure_access(&mut self, page: u8, write: bool) -> Result<()> {
        let operation = || {
            let op = if write { "WRITE" } else { "READ" };
            format!("{op} {page:#04x}")
        };
        if let Some(engine) = &self.engine {
            if engine.is_authenticated() {
                return Ok(());
            }
            return Err(TagError::not_authenticated(operation()));
        }

        let auth0 = self.auth0().await?;
        let protected = if write {
            page >= auth0
        } else {
            page >= auth0 && page < USER_MEMORY_END
        };
        if protected {
            return Err(TagError::not_authenticated(operation()));
        }
        Ok(())
    }

    async fn read_block(&mut self, frame: BitVector) -> Result<BitVector> {
        let response = self.exchange(&frame).await?;
        Ok(self.codec.decode_read(&response)?)
    }

    /// Send one frame, applying CMAC secure messaging when it is active.
    ///
    /// A NAK after a completed handshake ends the authenticated session and
    /// is reported as an authentication error.
    async fn exchange(&mut self, frame: &BitVector) -> Result<Vec<u8>> {
        let command = frame.to_bytes()?;
        let Some(channel) = self.engine.as_mut().and_then(AuthEngine::channel_mut) else {
            let response = self.tag.transceive(&command).await?;
            if self.is_authenticated()
                && let [status] = response[..]
                && status != ACK
            {
                warn!(status, "Tag refused a frame after authentication");
                return Err(self.end_authentication(status));
            }
            return Ok(response);
        };

        let sealed = channel.seal_command(&command)?;
        let response = self.tag.transceive(&sealed).await?;
        if let [status] = response[..] {
            warn!(status, "Tag answered outside the secure session");
            return Err(self.end_authentication(status));
        }
        match channel.open_response(&response) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                warn!(error = %e, "Response failed CMAC verification, session discarded");
                Err(self.drop_authentication(e).into())
            }
        }
    }

    fn end_authentication(&mut self, status: u8) -> TagError {
        self.drop_authentication(ProtocolError::Nak(status));
        TagError::auth(format!(
            "tag ended the authenticated session with NAK {status:#04x}"
        ))
    }

    fn drop_authentication(&mut self, error: ProtocolError) -> ProtocolError {
        match self.engine.as_mut() {
            Some(engine) => engine.invalidate(error),
            None => error,
        }
    }
}

impl<T: NfcTag> Drop for TagSession<T> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Tag session dropped without close");
        }
    }
}

impl<T: NfcTag> std::fmt::Debug for TagSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagSession")
            .field("family", &self.family())
            .field("engine", &self.engine)
            .field("auth0", &self.auth0)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use wristpay_core::ScanFailure;
    use wristpay_hardware::mock::MockTag;

    const SECRET: [u8; 6] = [0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6];

    #[rstest]
    #[case(4, 0, Ok(0))]
    #[case(4, 144, Ok(36))]
    #[case(0x27, 4, Ok(1))]
    #[case(0x27, 5, Err(()))]
    #[case(3, 4, Err(()))]
    #[case(4, 145, Err(()))]
    fn test_user_range(#[case] page: u8, #[case] len: usize, #[case] expected: std::result::Result<u8, ()>) {
        assert_eq!(user_range(page, len).map_err(|_| ()), expected);
    }

    #[tokio::test]
    async fn test_open_and_close_are_paired() {
        let (tag, spy) = MockTag::ultralight(&[1, 2, 3, 4]).build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(spy.connect_count(), 1);
        assert_eq!(spy.close_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_still_closes() {
        let (tag, spy) = MockTag::ultralight(&[1, 2, 3, 4]).build();
        spy.remove();
        let err = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap_err();
        assert!(err.is_lost());
        assert_eq!(spy.close_count(), 1);
    }

    #[tokio::test]
    async fn test_protected_read_refused_without_frame() {
        let (tag, spy) = MockTag::ultralight_c(&[1, 2, 3, 4], &SECRET).auth0(0x10).build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();

        let err = session.read_page(0x12).await.unwrap_err();
        assert!(matches!(err, TagError::NotAuthenticated { .. }));
        // only the AUTH0 lookup went out
        assert_eq!(spy.frames(), vec![vec![0x30, 0x2A]]);

        assert!(session.write_page(0x20, &[1, 2, 3, 4]).await.is_err());
        assert_eq!(spy.frames().len(), 1);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_precondition_checked_before_access() {
        let (tag, spy) = MockTag::ultralight(&[1, 2, 3, 4]).build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();

        let err = session.write_page(4, &[1, 2, 3]).await.unwrap_err();
        assert!(err.is_precondition());
        let err = session.read_page(48).await.unwrap_err();
        assert!(err.is_precondition());
        assert!(spy.frames().is_empty());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tdes_authentication_unlocks_memory() {
        let (tag, spy) = MockTag::ultralight_c(&[1, 2, 3, 4], &SECRET)
            .auth0(0x10)
            .user_data(0x10, b"secret")
            .build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();

        let key = AuthKey::tdes(&SECRET).unwrap();
        session.authenticate(&key, KeyType::DataProtKey, false).await.unwrap();
        assert!(session.is_authenticated());
        assert!(spy.is_authenticated());
        assert_eq!(&session.read_page(0x10).await.unwrap(), b"secr");

        session.write_user_memory(0x20, b"hello").await.unwrap();
        assert_eq!(spy.memory(0x20, 8), b"hello\0\0\0".to_vec());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_key_fails_and_locks_session() {
        let (tag, _spy) = MockTag::ultralight_c(&[1, 2, 3, 4], &SECRET).build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();

        let key = AuthKey::tdes(&[0; 6]).unwrap();
        let err = session
            .authenticate(&key, KeyType::DataProtKey, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TagError::Auth(_)));

        // a failed engine refuses even public pages
        assert!(matches!(
            session.read_page(4).await,
            Err(TagError::NotAuthenticated { .. })
        ));
        assert!(session.authenticate(&key, KeyType::DataProtKey, false).await.is_err());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_key_family_mismatch_is_incompatible() {
        let (tag, spy) = MockTag::ultralight_c(&[1, 2, 3, 4], &SECRET).build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();

        let key = AuthKey::aes(&[0x11; 16]).unwrap();
        let err = session
            .authenticate(&key, KeyType::DataProtKey, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TagError::Incompatible(_)));
        assert!(spy.frames().is_empty());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_aes_cmac_session() {
        let key = [0x3C; 16];
        let (tag, spy) = MockTag::ultralight_aes(&[1, 2, 3, 4, 5, 6, 7], key)
            .cmac(true)
            .user_data(0x04, b"wristband")
            .build();
        let mut session = TagSession::open(tag, ChipFamily::UltralightAes).await.unwrap();
        session
            .authenticate(&AuthKey::Aes(key), KeyType::DataProtKey, true)
            .await
            .unwrap();

        assert_eq!(
            session.read_uid().await.unwrap(),
            Uid::new(0x01020304050607)
        );
        assert!(session.cmac_required().await.unwrap());
        assert_eq!(&session.read_page(4).await.unwrap(), b"wris");

        // read frames carry the 8-byte MAC
        let frames = spy.frames();
        assert_eq!(frames.last().unwrap().len(), 2 + 8);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupted_mac_discards_session() {
        let key = [0x3C; 16];
        let (tag, _spy) = MockTag::ultralight_aes(&[1, 2, 3, 4], key)
            .cmac(true)
            .corrupt_mac_on(1)
            .build();
        let mut session = TagSession::open(tag, ChipFamily::UltralightAes).await.unwrap();
        session
            .authenticate(&AuthKey::Aes(key), KeyType::DataProtKey, true)
            .await
            .unwrap();

        let err = session.read_page(4).await.unwrap_err();
        assert!(matches!(err, TagError::Protocol(ProtocolError::CmacMismatch)));
        assert!(!session.is_authenticated());
        assert!(matches!(
            session.read_page(4).await,
            Err(TagError::NotAuthenticated { .. })
        ));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sealed_frames_to_plain_tag_fail_authentication() {
        let key = [0x3C; 16];
        let (tag, spy) = MockTag::ultralight_aes(&[1, 2, 3, 4], key).build();
        let mut session = TagSession::open(tag, ChipFamily::UltralightAes).await.unwrap();
        session
            .authenticate(&AuthKey::Aes(key), KeyType::DataProtKey, true)
            .await
            .unwrap();

        let err = session.read_uid().await.unwrap_err();
        assert!(matches!(err, TagError::Auth(_)), "unexpected error {err:?}");
        assert!(!session.is_authenticated());
        assert!(!spy.is_authenticated());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_plain_frames_to_cmac_tag_fail_authentication() {
        let key = [0x3C; 16];
        let (tag, spy) = MockTag::ultralight_aes(&[1, 2, 3, 4], key).cmac(true).build();
        let mut session = TagSession::open(tag, ChipFamily::UltralightAes).await.unwrap();
        session
            .authenticate(&AuthKey::Aes(key), KeyType::DataProtKey, false)
            .await
            .unwrap();

        let err = session.read_uid().await.unwrap_err();
        assert!(matches!(err.into_failure(), ScanFailure::Auth(_)));
        assert!(!session.is_authenticated());
        assert!(!spy.is_authenticated());
        assert_eq!(spy.frames().last().unwrap(), &vec![0x30, 0x00]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_public_read_stops_at_auth0() {
        let (tag, _) = MockTag::ultralight_c(&[1, 2, 3, 4], &SECRET)
            .auth0(0x0A)
            .user_data(0x04, &[0x55; 24])
            .build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();

        let content = session.read_user_memory(4).await.unwrap();
        assert_eq!(content, vec![0x55; 24]);
        assert!(session.is_protected().await.unwrap());
        assert!(matches!(
            session.read_user_memory(0x0A).await,
            Err(TagError::NotAuthenticated { .. })
        ));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tag_lost_during_handshake_is_lost() {
        let (tag, _) = MockTag::ultralight_c(&[1, 2, 3, 4], &SECRET).lose_after(1).build();
        let mut session = TagSession::open(tag, ChipFamily::Ultralight).await.unwrap();
        let err = session
            .authenticate(&AuthKey::tdes(&SECRET).unwrap(), KeyType::DataProtKey, false)
            .await
            .unwrap_err();
        assert!(err.is_lost());
        session.close().await.unwrap();
    }
}

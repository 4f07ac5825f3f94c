//! Execution of a [`ScanRequest`] against an open [`TagSession`].
//!
//! One function per request variant. Request parameters are validated
//! before the first frame goes out; authentication, when the request
//! carries a key, runs before any memory access.

use crate::{
    error::{Result, TagError},
    session::{TagSession, user_range},
};
use tracing::{debug, info};
use wristpay_core::{
    AuthKey, ChipFamily, ScanRequest, ScanResult, Uid,
    constants::{AUTH0_PROTECT_USER_MEMORY, PAGE_SIZE},
};
use wristpay_hardware::NfcTag;
use wristpay_protocol::KeyType;

/// Run `request` on `session` and build its result.
///
/// Errors are returned unclassified; the caller maps them to a
/// [`ScanFailure`](wristpay_core::ScanFailure).
pub async fn execute<T: NfcTag>(
    session: &mut TagSession<T>,
    request: &ScanRequest,
) -> Result<ScanResult> {
    debug!(request = %request, family = %session.family(), "Executing request");
    match request {
        ScanRequest::FastRead => Ok(ScanResult::FastRead(Uid::from_bytes(session.tag_id())?)),
        ScanRequest::Read { page, key, cmac } => {
            user_range(*page, PAGE_SIZE)?;
            authenticate_with(session, key.as_ref(), *cmac).await?;
            read(session, *page).await
        }
        ScanRequest::ReadMultiKey { page, keys, cmac } => {
            read_multi_key(session, *page, keys, *cmac).await
        }
        ScanRequest::Write {
            page,
            data,
            key,
            cmac,
        } => {
            user_range(*page, data.len())?;
            authenticate_with(session, key.as_ref(), *cmac).await?;
            session.write_user_memory(*page, data).await?;
            info!(page, len = data.len(), "User memory written");
            Ok(ScanResult::Write)
        }
        ScanRequest::WriteKey { key, new_key, cmac } => {
            if new_key.family() != session.family() {
                return Err(TagError::incompatible(format!(
                    "a {} key cannot be stored on a {} tag",
                    new_key.family(),
                    session.family()
                )));
            }
            authenticate_with(session, key.as_ref(), *cmac).await?;
            session.write_key(new_key).await?;
            Ok(ScanResult::Write)
        }
        ScanRequest::WriteProtect { key, enable, cmac } => {
            authenticate_with(session, key.as_ref(), *cmac).await?;
            let auth0 = if *enable {
                AUTH0_PROTECT_USER_MEMORY
            } else {
                session.family().auth0_disabled()
            };
            session.set_auth0(auth0).await?;
            Ok(ScanResult::Write)
        }
        ScanRequest::WriteCmac { key, enable, cmac } => {
            if session.family() != ChipFamily::UltralightAes {
                return Err(TagError::incompatible(
                    "CMAC configuration needs an Ultralight-AES tag",
                ));
            }
            authenticate_with(session, key.as_ref(), *cmac).await?;
            session.set_cmac(*enable).await?;
            Ok(ScanResult::Write)
        }
        ScanRequest::Test { key0, key1 } => diagnose(session, key0, key1).await,
    }
}

async fn authenticate_with<T: NfcTag>(
    session: &mut TagSession<T>,
    key: Option<&AuthKey>,
    cmac: bool,
) -> Result<()> {
    match key {
        Some(key) => session.authenticate(key, KeyType::DataProtKey, cmac).await,
        None => Ok(()),
    }
}

async fn read<T: NfcTag>(session: &mut TagSession<T>, page: u8) -> Result<ScanResult> {
    let uid = session.read_uid().await?;
    let protected = session.is_protected().await?;
    let content = session.read_user_memory(page).await?;
    debug!(%uid, protected, len = content.len(), "User memory read");
    Ok(ScanResult::Read {
        protected,
        uid,
        content,
    })
}

/// Try each key in turn. Every attempt after the first starts on a fresh
/// connection, since a failed handshake leaves the tag unauthenticated.
async fn read_multi_key<T: NfcTag>(
    session: &mut TagSession<T>,
    page: u8,
    keys: &[AuthKey],
    cmac: bool,
) -> Result<ScanResult> {
    user_range(page, PAGE_SIZE)?;
    for (index, key) in keys.iter().enumerate() {
        if index > 0 {
            session.reconnect().await?;
        }
        match session.authenticate(key, KeyType::DataProtKey, cmac).await {
            Ok(()) => {
                debug!(index, "Key accepted");
                return read(session, page).await;
            }
            Err(e @ (TagError::Auth(_) | TagError::Incompatible(_))) => {
                debug!(index, error = %e, "Key rejected");
            }
            Err(e) => return Err(e),
        }
    }
    Err(TagError::auth("none of the keys worked"))
}

/// Diagnostic run. Every step is logged into the returned text; only a lost
/// tag aborts the run.
async fn diagnose<T: NfcTag>(
    session: &mut TagSession<T>,
    key0: &AuthKey,
    key1: &AuthKey,
) -> Result<ScanResult> {
    let family = session.family();
    let mut log = vec![
        format!("id: {}", hex::encode_upper(session.tag_id())),
        format!("family: {family}"),
    ];

    match session.get_version().await {
        Ok(version) => log.push(format!("version: {}", hex::encode_upper(version))),
        Err(e) if e.is_lost() => return Err(e),
        Err(e) => log.push(format!("version: unavailable ({e})")),
    }

    for (slot, key) in [key0, key1].into_iter().enumerate() {
        if slot > 0 {
            session.reconnect().await?;
        }
        let key_type = match (family, slot) {
            (ChipFamily::UltralightAes, 1) => KeyType::UidRetrKey,
            _ => KeyType::DataProtKey,
        };
        match session.authenticate(key, key_type, false).await {
            Ok(()) => log.push(format!("key{slot}: ok")),
            Err(e) if e.is_lost() => return Err(e),
            Err(e) => {
                log.push(format!("key{slot}: {e}"));
                continue;
            }
        }

        match session.auth0().await {
            Ok(auth0) => log.push(format!("auth0: {auth0:#04x}")),
            Err(e) if e.is_lost() => return Err(e),
            Err(e) => log.push(format!("auth0: {e}")),
        }
        if family == ChipFamily::UltralightAes {
            match session.cmac_required().await {
                Ok(required) => log.push(format!("cmac: {required}")),
                Err(e) if e.is_lost() => return Err(e),
                Err(e) => log.push(format!("cmac: {e}")),
            }
        }
        match session.read_uid().await {
            Ok(uid) => log.push(format!("uid: {uid}")),
            Err(e) if e.is_lost() => return Err(e),
            Err(e) => log.push(format!("uid: {e}")),
        }
    }

    Ok(ScanResult::Test(log.join("\n")))
}

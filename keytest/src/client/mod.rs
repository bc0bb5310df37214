//! CTAP2 client for test setup and teardown
//!
//! Covers what integration tests need to put a key into a known state:
//! - **Core**: getInfo, reset, selection
//! - **ClientPin**: retries, set/change PIN, PIN/UV auth tokens
//! - **Credential management**: metadata, RP and credential enumeration, deletion
//! - **Bio enrollment**: template enumeration, enrollment, naming, removal
//! - **Large blobs**: read and rewrite the serialized large-blob array
//!
//! Each operation is a method on [`Fido2Client`], which owns one
//! [`CtapConnection`].

mod bio;
mod credential_mgmt;
mod large_blob;
mod pin;

pub use pin::{PinToken, pad_pin, permissions};

use crate::ctap::{self, CtapCommand, CtapConnection, DEFAULT_TIMEOUT, USER_ACTION_TIMEOUT};
use crate::error::{Error, Result};
use crate::info::AuthenticatorInfo;

/// Client bound to one authenticator connection
pub struct Fido2Client<C> {
    conn: C,
    info: Option<AuthenticatorInfo>,
}

impl<C: CtapConnection> Fido2Client<C> {
    pub fn new(conn: C) -> Self {
        Self { conn, info: None }
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Query getInfo, refreshing the cached copy
    pub fn get_info(&mut self) -> Result<AuthenticatorInfo> {
        let body = ctap::send(&mut self.conn, CtapCommand::GetInfo, None, DEFAULT_TIMEOUT)?
            .ok_or_else(|| Error::InvalidResponse("empty getInfo response".to_string()))?;
        let info = AuthenticatorInfo::from_value(&body)?;
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Cached getInfo, fetched on first use
    pub(crate) fn info(&mut self) -> Result<&AuthenticatorInfo> {
        if self.info.is_none() {
            self.get_info()?;
        }
        self.info
            .as_ref()
            .ok_or_else(|| Error::InvalidResponse("getInfo unavailable".to_string()))
    }

    /// authenticatorReset
    ///
    /// Only accepted within a few seconds of power-up and after a touch; the
    /// device answers `NotAllowed` otherwise.
    pub fn reset(&mut self) -> Result<()> {
        log::info!("sending authenticatorReset");
        ctap::send(&mut self.conn, CtapCommand::Reset, None, USER_ACTION_TIMEOUT)?;
        self.info = None;
        Ok(())
    }

    /// authenticatorSelection, completes on touch
    pub fn selection(&mut self) -> Result<()> {
        ctap::send(&mut self.conn, CtapCommand::Selection, None, USER_ACTION_TIMEOUT)?;
        Ok(())
    }
}

//! authenticatorCredentialManagement (0x0A)

use super::{Fido2Client, PinToken};

use crate::cbor::{self, MapBuilder, MapView, Value, bytes, int, text, text_map};
use crate::ctap::{self, CtapCommand, CtapConnection, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use crate::response::{CredentialUserInfo, CredentialsMetadata, RpInfo};
use crate::status::StatusCode;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubCommand {
    GetCredsMetadata = 0x01,
    EnumerateRpsBegin = 0x02,
    EnumerateRpsGetNextRp = 0x03,
    EnumerateCredentialsBegin = 0x04,
    EnumerateCredentialsGetNextCredential = 0x05,
    DeleteCredential = 0x06,
}

mod req_keys {
    pub const SUBCOMMAND: i32 = 0x01;
    pub const SUBCOMMAND_PARAMS: i32 = 0x02;
    pub const PIN_UV_AUTH_PROTOCOL: i32 = 0x03;
    pub const PIN_UV_AUTH_PARAM: i32 = 0x04;
}

mod subparam_keys {
    pub const RP_ID_HASH: i32 = 0x01;
    pub const CREDENTIAL_ID: i32 = 0x02;
}

mod resp_keys {
    pub const TOTAL_RPS: i128 = 0x05;
    pub const TOTAL_CREDENTIALS: i128 = 0x09;
}

impl<C: CtapConnection> Fido2Client<C> {
    /// Send an authenticated subcommand
    ///
    /// `next` subcommands carry no auth; the authenticator keeps the
    /// enumeration state from the matching `begin`.
    fn cred_mgmt(
        &mut self,
        sub: SubCommand,
        params: Option<Value>,
        token: Option<&PinToken>,
    ) -> Result<Option<Value>> {
        let mut request = MapBuilder::new().insert(req_keys::SUBCOMMAND, int(sub as u8));

        if let Some(token) = token {
            let mut message = vec![sub as u8];
            if let Some(params) = &params {
                message.extend_from_slice(&cbor::encode(params)?);
            }
            request = request
                .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(token.protocol().as_u8()))
                .insert(req_keys::PIN_UV_AUTH_PARAM, bytes(&token.authenticate(&message)));
        }
        request = request.insert_opt(req_keys::SUBCOMMAND_PARAMS, params);

        ctap::send(
            &mut self.conn,
            CtapCommand::CredentialManagement,
            Some(&request.build()),
            DEFAULT_TIMEOUT,
        )
    }

    pub fn credentials_metadata(&mut self, token: &PinToken) -> Result<CredentialsMetadata> {
        let body = self
            .cred_mgmt(SubCommand::GetCredsMetadata, None, Some(token))?
            .ok_or_else(|| Error::InvalidResponse("empty getCredsMetadata response".to_string()))?;
        CredentialsMetadata::from_view(MapView::new(&body)?)
    }

    /// All RPs with discoverable credentials, empty when the key has none
    pub fn enumerate_rps(&mut self, token: &PinToken) -> Result<Vec<RpInfo>> {
        let first = match self.cred_mgmt(SubCommand::EnumerateRpsBegin, None, Some(token)) {
            Ok(Some(body)) => body,
            Ok(None) | Err(Error::Ctap(StatusCode::NoCredentials)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let view = MapView::new(&first)?;
        let total = view.int(resp_keys::TOTAL_RPS).unwrap_or(1).max(0) as usize;
        let mut rps = Vec::with_capacity(total);
        rps.push(RpInfo::from_view(view)?);

        for _ in 1..total {
            let body = self
                .cred_mgmt(SubCommand::EnumerateRpsGetNextRp, None, None)?
                .ok_or_else(|| Error::InvalidResponse("empty getNextRP response".to_string()))?;
            rps.push(RpInfo::from_view(MapView::new(&body)?)?);
        }
        log::debug!("enumerated {} relying parties", rps.len());
        Ok(rps)
    }

    /// Discoverable credentials stored for one RP
    pub fn enumerate_credentials(
        &mut self,
        token: &PinToken,
        rp_id_hash: &[u8; 32],
    ) -> Result<Vec<CredentialUserInfo>> {
        let params = MapBuilder::new()
            .insert(subparam_keys::RP_ID_HASH, bytes(rp_id_hash))
            .build();
        let result =
            self.cred_mgmt(SubCommand::EnumerateCredentialsBegin, Some(params), Some(token));
        let first = match result {
            Ok(Some(body)) => body,
            Ok(None) | Err(Error::Ctap(StatusCode::NoCredentials)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let view = MapView::new(&first)?;
        let total = view.int(resp_keys::TOTAL_CREDENTIALS).unwrap_or(1).max(0) as usize;
        let mut credentials = Vec::with_capacity(total);
        credentials.push(CredentialUserInfo::from_view(view)?);

        for _ in 1..total {
            let body = self
                .cred_mgmt(SubCommand::EnumerateCredentialsGetNextCredential, None, None)?
                .ok_or_else(|| {
                    Error::InvalidResponse("empty getNextCredential response".to_string())
                })?;
            credentials.push(CredentialUserInfo::from_view(MapView::new(&body)?)?);
        }
        Ok(credentials)
    }

    pub fn delete_credential(&mut self, token: &PinToken, credential_id: &[u8]) -> Result<()> {
        let descriptor = text_map([("id", bytes(credential_id)), ("type", text("public-key"))]);
        let params = MapBuilder::new()
            .insert(subparam_keys::CREDENTIAL_ID, descriptor)
            .build();
        self.cred_mgmt(SubCommand::DeleteCredential, Some(params), Some(token))?;
        log::info!("deleted credential {}", hex::encode(credential_id));
        Ok(())
    }
}

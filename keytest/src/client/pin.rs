//! authenticatorClientPIN (0x06)

use super::Fido2Client;

use crate::cbor::{MapBuilder, MapView, Value, bytes, int, text};
use crate::collector::{KeyCollector, KeyEntryData, KeyEntryRequest, KeyEntryResponse};
use crate::ctap::{self, CtapCommand, CtapConnection, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use crate::status::StatusCode;

use keytest_crypto::{PinProtocol, SharedSecret, ecdh::KeyPair};

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubCommand {
    GetPinRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
    GetPinUvAuthTokenUsingPinWithPermissions = 0x09,
}

mod req_keys {
    pub const PIN_UV_AUTH_PROTOCOL: i32 = 0x01;
    pub const SUBCOMMAND: i32 = 0x02;
    pub const KEY_AGREEMENT: i32 = 0x03;
    pub const PIN_UV_AUTH_PARAM: i32 = 0x04;
    pub const NEW_PIN_ENC: i32 = 0x05;
    pub const PIN_HASH_ENC: i32 = 0x06;
    pub const PERMISSIONS: i32 = 0x09;
    pub const RP_ID: i32 = 0x0A;
}

mod resp_keys {
    pub const KEY_AGREEMENT: i128 = 0x01;
    pub const PIN_UV_AUTH_TOKEN: i128 = 0x02;
    pub const PIN_RETRIES: i128 = 0x03;
}

/// pinUvAuthToken permission bits
pub mod permissions {
    pub const MAKE_CREDENTIAL: u8 = 0x01;
    pub const GET_ASSERTION: u8 = 0x02;
    pub const CREDENTIAL_MANAGEMENT: u8 = 0x04;
    pub const BIO_ENROLLMENT: u8 = 0x08;
    pub const LARGE_BLOB_WRITE: u8 = 0x10;
    pub const AUTHENTICATOR_CONFIG: u8 = 0x20;
}

const PADDED_PIN_LEN: usize = 64;

/// UTF-8 PIN zero-padded to 64 bytes
///
/// Rejects PINs under 4 code points or over 63 bytes.
pub fn pad_pin(pin: &str) -> Result<Zeroizing<[u8; PADDED_PIN_LEN]>> {
    if pin.chars().count() < 4 {
        return Err(Error::InvalidPin("shorter than 4 characters"));
    }
    if pin.len() >= PADDED_PIN_LEN {
        return Err(Error::InvalidPin("longer than 63 bytes"));
    }
    let mut padded = Zeroizing::new([0u8; PADDED_PIN_LEN]);
    padded[..pin.len()].copy_from_slice(pin.as_bytes());
    Ok(padded)
}

/// Decrypted pinUvAuthToken with its protocol
pub struct PinToken {
    protocol: PinProtocol,
    token: Zeroizing<Vec<u8>>,
    permissions: u8,
}

impl PinToken {
    pub fn protocol(&self) -> PinProtocol {
        self.protocol
    }

    pub fn permissions(&self) -> u8 {
        self.permissions
    }

    /// pinUvAuthParam over `message`
    pub fn authenticate(&self, message: &[u8]) -> Vec<u8> {
        self.protocol.authenticate(&self.token, message)
    }
}

impl std::fmt::Debug for PinToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinToken")
            .field("protocol", &self.protocol)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

fn cose_key(platform: &KeyPair) -> Value {
    let (x, y) = platform.public_key_cose();
    MapBuilder::new()
        .insert(1, int(2)) // kty: EC2
        .insert(3, int(-25)) // alg: ECDH-ES+HKDF-256
        .insert(-1, int(1)) // crv: P-256
        .insert(-2, bytes(&x))
        .insert(-3, bytes(&y))
        .build()
}

fn pin_hash_enc(secret: &SharedSecret, pin: &str) -> Result<Vec<u8>> {
    let digest = Zeroizing::new(Sha256::digest(pin.as_bytes()));
    Ok(secret.encrypt(&digest[..16])?)
}

impl<C: CtapConnection> Fido2Client<C> {
    fn client_pin(&mut self, params: MapBuilder) -> Result<Option<Value>> {
        ctap::send(
            &mut self.conn,
            CtapCommand::ClientPin,
            Some(&params.build()),
            DEFAULT_TIMEOUT,
        )
    }

    fn pin_protocol(&mut self) -> Result<PinProtocol> {
        Ok(self.info()?.preferred_pin_protocol())
    }

    /// Remaining PIN attempts before the PIN blocks
    pub fn get_pin_retries(&mut self) -> Result<u32> {
        let protocol = self.pin_protocol()?;
        let body = self
            .client_pin(
                MapBuilder::new()
                    .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(protocol.as_u8()))
                    .insert(req_keys::SUBCOMMAND, int(SubCommand::GetPinRetries as u8)),
            )?
            .ok_or_else(|| Error::InvalidResponse("empty getPINRetries response".to_string()))?;
        Ok(MapView::new(&body)?.require_int(resp_keys::PIN_RETRIES, "pinRetries")? as u32)
    }

    /// Authenticator's key-agreement public key as COSE (x, y)
    pub fn get_key_agreement(&mut self, protocol: PinProtocol) -> Result<(Vec<u8>, Vec<u8>)> {
        let body = self
            .client_pin(
                MapBuilder::new()
                    .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(protocol.as_u8()))
                    .insert(req_keys::SUBCOMMAND, int(SubCommand::GetKeyAgreement as u8)),
            )?
            .ok_or_else(|| Error::InvalidResponse("empty getKeyAgreement response".to_string()))?;
        let view = MapView::new(&body)?;
        let key = view.require_map(resp_keys::KEY_AGREEMENT, "keyAgreement")?;
        let x = key.require_bytes(-2, "x coordinate")?;
        let y = key.require_bytes(-3, "y coordinate")?;
        Ok((x.to_vec(), y.to_vec()))
    }

    fn agree(&mut self, protocol: PinProtocol) -> Result<(KeyPair, SharedSecret)> {
        let (x, y) = self.get_key_agreement(protocol)?;
        Ok(protocol.encapsulate(&x, &y)?)
    }

    /// Set the first PIN on a key without one
    pub fn set_pin(&mut self, new_pin: &str) -> Result<()> {
        let padded = pad_pin(new_pin)?;
        let protocol = self.pin_protocol()?;
        let (platform, secret) = self.agree(protocol)?;

        let new_pin_enc = secret.encrypt(&padded[..])?;
        let param = secret.authenticate(&new_pin_enc);

        self.client_pin(
            MapBuilder::new()
                .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(protocol.as_u8()))
                .insert(req_keys::SUBCOMMAND, int(SubCommand::SetPin as u8))
                .insert(req_keys::KEY_AGREEMENT, cose_key(&platform))
                .insert(req_keys::PIN_UV_AUTH_PARAM, bytes(&param))
                .insert(req_keys::NEW_PIN_ENC, bytes(&new_pin_enc)),
        )?;
        log::info!("PIN set using protocol {}", protocol.as_u8());
        self.info = None;
        Ok(())
    }

    pub fn change_pin(&mut self, current_pin: &str, new_pin: &str) -> Result<()> {
        let padded = pad_pin(new_pin)?;
        let protocol = self.pin_protocol()?;
        let (platform, secret) = self.agree(protocol)?;

        let new_pin_enc = secret.encrypt(&padded[..])?;
        let pin_hash_enc = pin_hash_enc(&secret, current_pin)?;
        let mut message = new_pin_enc.clone();
        message.extend_from_slice(&pin_hash_enc);
        let param = secret.authenticate(&message);

        self.client_pin(
            MapBuilder::new()
                .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(protocol.as_u8()))
                .insert(req_keys::SUBCOMMAND, int(SubCommand::ChangePin as u8))
                .insert(req_keys::KEY_AGREEMENT, cose_key(&platform))
                .insert(req_keys::PIN_UV_AUTH_PARAM, bytes(&param))
                .insert(req_keys::NEW_PIN_ENC, bytes(&new_pin_enc))
                .insert(req_keys::PIN_HASH_ENC, bytes(&pin_hash_enc)),
        )?;
        self.info = None;
        Ok(())
    }

    /// Obtain a pinUvAuthToken
    ///
    /// Uses getPinUvAuthTokenUsingPinWithPermissions when the key advertises
    /// `pinUvAuthToken`, otherwise the legacy getPinToken, which ignores
    /// `permissions` and `rp_id`.
    pub fn get_pin_token(
        &mut self,
        pin: &str,
        permissions: u8,
        rp_id: Option<&str>,
    ) -> Result<PinToken> {
        let with_permissions = self.info()?.supports_permissions();
        let protocol = self.pin_protocol()?;
        let (platform, secret) = self.agree(protocol)?;
        let pin_hash_enc = pin_hash_enc(&secret, pin)?;

        let mut params = MapBuilder::new()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, int(protocol.as_u8()))
            .insert(req_keys::KEY_AGREEMENT, cose_key(&platform))
            .insert(req_keys::PIN_HASH_ENC, bytes(&pin_hash_enc));
        params = if with_permissions {
            params
                .insert(
                    req_keys::SUBCOMMAND,
                    int(SubCommand::GetPinUvAuthTokenUsingPinWithPermissions as u8),
                )
                .insert(req_keys::PERMISSIONS, int(permissions))
                .insert_opt(req_keys::RP_ID, rp_id.map(text))
        } else {
            params.insert(req_keys::SUBCOMMAND, int(SubCommand::GetPinToken as u8))
        };

        let body = self
            .client_pin(params)?
            .ok_or_else(|| Error::InvalidResponse("empty pinUvAuthToken response".to_string()))?;
        let encrypted =
            MapView::new(&body)?.require_bytes(resp_keys::PIN_UV_AUTH_TOKEN, "pinUvAuthToken")?;
        let token = Zeroizing::new(secret.decrypt(encrypted)?);

        Ok(PinToken {
            protocol,
            token,
            permissions,
        })
    }

    /// Obtain a token with a PIN supplied by `collector`
    ///
    /// A wrong PIN is reported back to the collector as a retry with the
    /// remaining attempt count; the collector decides whether to try again.
    pub fn get_pin_token_with<K: KeyCollector + ?Sized>(
        &mut self,
        collector: &K,
        permissions: u8,
        rp_id: Option<&str>,
    ) -> Result<PinToken> {
        let mut entry = KeyEntryData::new(KeyEntryRequest::VerifyFido2Pin);
        loop {
            let pin = match collector.collect(&entry) {
                KeyEntryResponse::Submit(pin) => pin,
                KeyEntryResponse::Continue | KeyEntryResponse::Cancel => {
                    collector.collect(&KeyEntryData::new(KeyEntryRequest::Release));
                    return Err(Error::Cancelled);
                }
            };
            match self.get_pin_token(&pin, permissions, rp_id) {
                Err(Error::Ctap(StatusCode::PinInvalid)) => {
                    entry.is_retry = true;
                    entry.retries_remaining = self.get_pin_retries().ok();
                    log::warn!("wrong PIN, {:?} retries left", entry.retries_remaining);
                }
                result => {
                    collector.collect(&KeyEntryData::new(KeyEntryRequest::Release));
                    return result;
                }
            }
        }
    }
}

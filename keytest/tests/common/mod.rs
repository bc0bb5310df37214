//! Common test utilities for keytest integration tests
//!
//! [`MockAuthenticator`] answers CTAP2 commands in memory with real PIN/UV
//! auth protocol crypto, so client, reset and fixture flows can run without
//! a key attached.

#![allow(dead_code)]

use keytest::cbor::{self, MapBuilder, MapView, Value, bytes, int, text, text_map};
use keytest::{CtapConnection, Result, StatusCode};
use keytest_crypto::PinProtocol;
use keytest_crypto::ecdh::KeyPair;

use sha2::{Digest, Sha256};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const MAX_RETRIES: u32 = 8;
pub const ENROLL_SAMPLES: u32 = 3;

/// Empty CBOR array followed by the first 16 bytes of its SHA-256
pub const EMPTY_LARGE_BLOB_ARRAY: [u8; 17] = [
    0x80, 0x76, 0xbe, 0x8b, 0x52, 0x8d, 0x00, 0x75, 0xf7, 0xaa, 0xe9, 0x8d, 0x6f, 0xa5, 0x7a, 0x6d,
    0x3c,
];

/// Discoverable credential held by the mock
#[derive(Debug, Clone)]
pub struct MockCredential {
    pub rp_id: String,
    pub user_id: Vec<u8>,
    pub user_name: String,
    pub credential_id: Vec<u8>,
}

impl MockCredential {
    pub fn new(rp_id: &str, user_name: &str, credential_id: &[u8]) -> Self {
        Self {
            rp_id: rp_id.to_string(),
            user_id: user_name.as_bytes().to_vec(),
            user_name: user_name.to_string(),
            credential_id: credential_id.to_vec(),
        }
    }
}

pub struct MockState {
    key_agreement: KeyPair,
    pin_token: [u8; 32],
    pub pin_hash: Option<[u8; 16]>,
    pub retries: u32,
    pub protocols: Vec<u8>,
    pub supports_permissions: bool,
    pub bio: bool,
    pub templates: Vec<(Vec<u8>, Option<String>)>,
    enrolling: Option<(Vec<u8>, u32)>,
    next_template: u8,
    pub credentials: Vec<MockCredential>,
    pending: Vec<Value>,
    /// Permissions of the last token handed out
    pub last_permissions: Option<u8>,
    /// Status byte Reset answers with
    pub reset_status: StatusCode,
    pub reset_count: u32,
    /// Command bytes in arrival order
    pub commands: Vec<u8>,
    pub device_config: Option<Vec<u8>>,
    pub device_version: Option<(u8, u8, u8)>,
    /// Serialized large-blob array, trailer included
    pub large_blobs: Vec<u8>,
    /// Announced length and bytes of a large-blob write in progress
    pub large_blob_write: Option<(usize, Vec<u8>)>,
    pub max_msg_size: u32,
}

/// In-memory authenticator; clones share state
#[derive(Clone)]
pub struct MockAuthenticator {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthenticator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                key_agreement: KeyPair::generate(),
                pin_token: rand::random(),
                pin_hash: None,
                retries: MAX_RETRIES,
                protocols: vec![2, 1],
                supports_permissions: true,
                bio: false,
                templates: Vec::new(),
                enrolling: None,
                next_template: 1,
                credentials: Vec::new(),
                pending: Vec::new(),
                last_permissions: None,
                reset_status: StatusCode::Success,
                reset_count: 0,
                commands: Vec::new(),
                device_config: None,
                device_version: Some((5, 4, 3)),
                large_blobs: EMPTY_LARGE_BLOB_ARRAY.to_vec(),
                large_blob_write: None,
                max_msg_size: 1024,
            })),
        }
    }

    pub fn bio() -> Self {
        let mock = Self::new();
        mock.state().bio = true;
        mock
    }

    pub fn with_pin(self, pin: &str) -> Self {
        self.state().pin_hash = Some(pin_hash(pin));
        self
    }

    pub fn with_protocols(self, protocols: &[u8]) -> Self {
        self.state().protocols = protocols.to_vec();
        self
    }

    pub fn with_credential(self, credential: MockCredential) -> Self {
        self.state().credentials.push(credential);
        self
    }

    /// Answer the device-info query as a 5.4.3 USB-C keychain with `serial`
    pub fn with_serial(self, serial: u32) -> Self {
        self.state().device_config = Some(device_config(serial, 0x03, (5, 4, 3)));
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pin_matches(&self, pin: &str) -> bool {
        self.state().pin_hash == Some(pin_hash(pin))
    }
}

/// Device-info page as a YubiKey answers it
pub fn device_config(serial: u32, form_factor: u8, version: (u8, u8, u8)) -> Vec<u8> {
    let mut tlv = vec![0x02, 0x04];
    tlv.extend_from_slice(&serial.to_be_bytes());
    tlv.extend_from_slice(&[0x04, 0x01, form_factor]);
    tlv.extend_from_slice(&[0x05, 0x03, version.0, version.1, version.2]);
    let mut page = vec![tlv.len() as u8];
    page.extend_from_slice(&tlv);
    page
}

pub fn pin_hash(pin: &str) -> [u8; 16] {
    Sha256::digest(pin.as_bytes())[..16]
        .try_into()
        .expect("16 bytes")
}

type Reply = std::result::Result<Option<Value>, StatusCode>;

fn cose(key: &KeyPair) -> Value {
    let (x, y) = key.public_key_cose();
    MapBuilder::new()
        .insert(1, int(2))
        .insert(3, int(-25))
        .insert(-1, int(1))
        .insert(-2, bytes(&x))
        .insert(-3, bytes(&y))
        .build()
}

impl MockState {
    fn get_info(&self) -> Reply {
        let mut options = vec![
            ("rk", Value::Bool(true)),
            ("up", Value::Bool(true)),
            ("credMgmt", Value::Bool(true)),
            ("clientPin", Value::Bool(self.pin_hash.is_some())),
            ("pinUvAuthToken", Value::Bool(self.supports_permissions)),
            ("largeBlobs", Value::Bool(true)),
        ];
        if self.bio {
            options.push(("bioEnroll", Value::Bool(!self.templates.is_empty())));
        }
        Ok(Some(
            MapBuilder::new()
                .insert(1, Value::Array(vec![text("FIDO_2_0"), text("FIDO_2_1")]))
                .insert(3, bytes(&[0x4b; 16]))
                .insert(4, text_map(options))
                .insert(5, int(self.max_msg_size))
                .insert(
                    6,
                    Value::Array(self.protocols.iter().map(|p| int(*p)).collect()),
                )
                .build(),
        ))
    }

    fn shared_secret(
        &self,
        view: &MapView<'_>,
        protocol: PinProtocol,
    ) -> std::result::Result<keytest_crypto::SharedSecret, StatusCode> {
        let platform = view.map(3).ok_or(StatusCode::MissingParameter)?;
        let x = platform.bytes(-2).ok_or(StatusCode::MissingParameter)?;
        let y = platform.bytes(-3).ok_or(StatusCode::MissingParameter)?;
        let z = self
            .key_agreement
            .shared_secret_cose(x, y)
            .map_err(|_| StatusCode::InvalidParameter)?;
        Ok(protocol.kdf(&z))
    }

    fn check_pin_hash(
        &mut self,
        secret: &keytest_crypto::SharedSecret,
        pin_hash_enc: &[u8],
    ) -> std::result::Result<(), StatusCode> {
        let expected = self.pin_hash.ok_or(StatusCode::PinNotSet)?;
        if self.retries == 0 {
            return Err(StatusCode::PinBlocked);
        }
        let hash = secret.decrypt(pin_hash_enc).map_err(|_| StatusCode::InvalidParameter)?;
        if hash != expected {
            self.retries -= 1;
            self.key_agreement = KeyPair::generate();
            return Err(StatusCode::PinInvalid);
        }
        self.retries = MAX_RETRIES;
        Ok(())
    }

    fn store_new_pin(
        &mut self,
        secret: &keytest_crypto::SharedSecret,
        new_pin_enc: &[u8],
    ) -> std::result::Result<(), StatusCode> {
        let padded = secret.decrypt(new_pin_enc).map_err(|_| StatusCode::InvalidParameter)?;
        if padded.len() != 64 {
            return Err(StatusCode::InvalidParameter);
        }
        let end = padded.iter().position(|b| *b == 0).unwrap_or(padded.len());
        let pin = std::str::from_utf8(&padded[..end]).map_err(|_| StatusCode::PinPolicyViolation)?;
        if pin.chars().count() < 4 {
            return Err(StatusCode::PinPolicyViolation);
        }
        self.pin_hash = Some(pin_hash(pin));
        self.retries = MAX_RETRIES;
        Ok(())
    }

    fn client_pin(&mut self, params: &Value) -> Reply {
        let view = MapView::new(params).map_err(|_| StatusCode::InvalidCbor)?;
        let protocol = view
            .int(1)
            .and_then(|p| PinProtocol::from_u8(p as u8).ok())
            .ok_or(StatusCode::MissingParameter)?;

        match view.int(2).ok_or(StatusCode::MissingParameter)? {
            0x01 => Ok(Some(MapBuilder::new().insert(3, int(self.retries)).build())),
            0x02 => Ok(Some(MapBuilder::new().insert(1, cose(&self.key_agreement)).build())),
            0x03 => {
                if self.pin_hash.is_some() {
                    return Err(StatusCode::NotAllowed);
                }
                let secret = self.shared_secret(&view, protocol)?;
                let new_pin_enc = view.bytes(5).ok_or(StatusCode::MissingParameter)?;
                let param = view.bytes(4).ok_or(StatusCode::MissingParameter)?;
                if !protocol.verify(secret.hmac_key(), new_pin_enc, param) {
                    return Err(StatusCode::PinAuthInvalid);
                }
                self.store_new_pin(&secret, new_pin_enc)?;
                Ok(None)
            }
            0x04 => {
                let secret = self.shared_secret(&view, protocol)?;
                let new_pin_enc = view.bytes(5).ok_or(StatusCode::MissingParameter)?;
                let pin_hash_enc = view.bytes(6).ok_or(StatusCode::MissingParameter)?;
                let param = view.bytes(4).ok_or(StatusCode::MissingParameter)?;
                let message = [new_pin_enc, pin_hash_enc].concat();
                if !protocol.verify(secret.hmac_key(), &message, param) {
                    return Err(StatusCode::PinAuthInvalid);
                }
                self.check_pin_hash(&secret, pin_hash_enc)?;
                self.store_new_pin(&secret, new_pin_enc)?;
                Ok(None)
            }
            sub @ (0x05 | 0x09) => {
                let secret = self.shared_secret(&view, protocol)?;
                let pin_hash_enc = view.bytes(6).ok_or(StatusCode::MissingParameter)?;
                self.check_pin_hash(&secret, pin_hash_enc)?;
                self.last_permissions = match sub {
                    0x09 => Some(view.int(9).ok_or(StatusCode::MissingParameter)? as u8),
                    _ => None,
                };
                let token = secret.encrypt(&self.pin_token).map_err(|_| StatusCode::Other)?;
                Ok(Some(MapBuilder::new().insert(2, bytes(&token)).build()))
            }
            _ => Err(StatusCode::InvalidSubcommand),
        }
    }

    fn verify_token(
        &self,
        view: &MapView<'_>,
        protocol_key: i128,
        param_key: i128,
        message: &[u8],
    ) -> std::result::Result<(), StatusCode> {
        let protocol = view
            .int(protocol_key)
            .and_then(|p| PinProtocol::from_u8(p as u8).ok())
            .ok_or(StatusCode::MissingParameter)?;
        let param = view.bytes(param_key).ok_or(StatusCode::PuatRequired)?;
        if protocol.verify(&self.pin_token, message, param) {
            Ok(())
        } else {
            Err(StatusCode::PinAuthInvalid)
        }
    }

    fn credential_entry(&self, credential: &MockCredential, total: Option<usize>) -> Value {
        let key = KeyPair::generate();
        MapBuilder::new()
            .insert(
                6,
                text_map([
                    ("id", bytes(&credential.user_id)),
                    ("name", text(&credential.user_name)),
                ]),
            )
            .insert(
                7,
                text_map([
                    ("id", bytes(&credential.credential_id)),
                    ("type", text("public-key")),
                ]),
            )
            .insert(8, cose(&key))
            .insert(10, int(2))
            .insert_opt(9, total.map(|t| int(t as u64)))
            .build()
    }

    fn credential_management(&mut self, params: &Value) -> Reply {
        let view = MapView::new(params).map_err(|_| StatusCode::InvalidCbor)?;
        let sub = view.int(1).ok_or(StatusCode::MissingParameter)? as u8;
        let sub_params = view.get(2);

        if matches!(sub, 0x01 | 0x02 | 0x04 | 0x06) {
            let mut message = vec![sub];
            if let Some(p) = sub_params {
                message.extend_from_slice(&cbor::encode(p).map_err(|_| StatusCode::InvalidCbor)?);
            }
            self.verify_token(&view, 3, 4, &message)?;
        }

        match sub {
            0x01 => {
                let count = self.credentials.len() as u64;
                Ok(Some(
                    MapBuilder::new()
                        .insert(1, int(count))
                        .insert(2, int(25 - count))
                        .build(),
                ))
            }
            0x02 => {
                let mut rp_ids: Vec<&str> =
                    self.credentials.iter().map(|c| c.rp_id.as_str()).collect();
                rp_ids.sort_unstable();
                rp_ids.dedup();
                if rp_ids.is_empty() {
                    return Err(StatusCode::NoCredentials);
                }
                let total = rp_ids.len();
                let mut entries: Vec<Value> = rp_ids
                    .iter()
                    .map(|id| {
                        MapBuilder::new()
                            .insert(3, text_map([("id", text(id))]))
                            .insert(4, bytes(&Sha256::digest(id.as_bytes())))
                            .build()
                    })
                    .collect();
                let first = entries.remove(0);
                entries.reverse();
                self.pending = entries;
                let Value::Map(mut first) = first else {
                    return Err(StatusCode::Other);
                };
                first.push((int(5), int(total as u64)));
                Ok(Some(Value::Map(first)))
            }
            0x03 | 0x05 => self.pending.pop().map(Some).ok_or(StatusCode::NotAllowed),
            0x04 => {
                let hash = sub_params
                    .and_then(|p| MapView::new(p).ok())
                    .and_then(|p| p.bytes(1).map(<[u8]>::to_vec))
                    .ok_or(StatusCode::MissingParameter)?;
                let matching: Vec<MockCredential> = self
                    .credentials
                    .iter()
                    .filter(|c| Sha256::digest(c.rp_id.as_bytes()).as_slice() == hash.as_slice())
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    return Err(StatusCode::NoCredentials);
                }
                let first = self.credential_entry(&matching[0], Some(matching.len()));
                let mut rest: Vec<Value> = matching[1..]
                    .iter()
                    .map(|c| self.credential_entry(c, None))
                    .collect();
                rest.reverse();
                self.pending = rest;
                Ok(Some(first))
            }
            0x06 => {
                let id = sub_params
                    .and_then(|p| MapView::new(p).ok())
                    .and_then(|p| p.map(2))
                    .and_then(|d| d.bytes_value("id").map(<[u8]>::to_vec))
                    .ok_or(StatusCode::MissingParameter)?;
                let before = self.credentials.len();
                self.credentials.retain(|c| c.credential_id != id);
                if self.credentials.len() == before {
                    return Err(StatusCode::NoCredentials);
                }
                Ok(None)
            }
            _ => Err(StatusCode::InvalidSubcommand),
        }
    }

    fn bio_enrollment(&mut self, params: &Value) -> Reply {
        if !self.bio {
            return Err(StatusCode::InvalidCommand);
        }
        let view = MapView::new(params).map_err(|_| StatusCode::InvalidCbor)?;
        let sub = view.int(2).ok_or(StatusCode::MissingParameter)? as u8;
        let sub_params = view.get(3);
        let template_id = sub_params
            .and_then(|p| MapView::new(p).ok())
            .and_then(|p| p.bytes(1).map(<[u8]>::to_vec));

        if sub != 0x03 {
            let mut message = vec![0x01, sub];
            if let Some(p) = sub_params {
                message.extend_from_slice(&cbor::encode(p).map_err(|_| StatusCode::InvalidCbor)?);
            }
            self.verify_token(&view, 4, 5, &message)?;
        }

        match sub {
            0x01 => {
                let id = vec![0xB0, self.next_template];
                self.next_template += 1;
                let remaining = ENROLL_SAMPLES - 1;
                self.enrolling = Some((id.clone(), remaining));
                Ok(Some(
                    MapBuilder::new()
                        .insert(4, bytes(&id))
                        .insert(5, int(0))
                        .insert(6, int(remaining))
                        .build(),
                ))
            }
            0x02 => {
                let (id, remaining) = self.enrolling.take().ok_or(StatusCode::InvalidParameter)?;
                if template_id.as_ref() != Some(&id) {
                    return Err(StatusCode::InvalidParameter);
                }
                let remaining = remaining - 1;
                if remaining == 0 {
                    self.templates.push((id, None));
                } else {
                    self.enrolling = Some((id, remaining));
                }
                Ok(Some(
                    MapBuilder::new()
                        .insert(5, int(0))
                        .insert(6, int(remaining))
                        .build(),
                ))
            }
            0x03 => {
                self.enrolling = None;
                Ok(None)
            }
            0x04 => {
                if self.templates.is_empty() {
                    return Err(StatusCode::InvalidOption);
                }
                let infos = self
                    .templates
                    .iter()
                    .map(|(id, name)| {
                        MapBuilder::new()
                            .insert(1, bytes(id))
                            .insert_opt(2, name.as_deref().map(text))
                            .build()
                    })
                    .collect();
                Ok(Some(MapBuilder::new().insert(7, Value::Array(infos)).build()))
            }
            0x05 => {
                let name = sub_params
                    .and_then(|p| MapView::new(p).ok())
                    .and_then(|p| p.text(2).map(str::to_string))
                    .ok_or(StatusCode::MissingParameter)?;
                let entry = self
                    .templates
                    .iter_mut()
                    .find(|entry| template_id.as_deref() == Some(entry.0.as_slice()))
                    .ok_or(StatusCode::InvalidOption)?;
                entry.1 = Some(name);
                Ok(None)
            }
            0x06 => {
                let before = self.templates.len();
                self.templates.retain(|(id, _)| template_id.as_deref() != Some(id.as_slice()));
                if self.templates.len() == before {
                    return Err(StatusCode::InvalidOption);
                }
                Ok(None)
            }
            _ => Err(StatusCode::InvalidSubcommand),
        }
    }

    fn large_blobs(&mut self, params: &Value) -> Reply {
        let view = MapView::new(params).map_err(|_| StatusCode::InvalidCbor)?;
        let offset = view.int(3).ok_or(StatusCode::MissingParameter)? as usize;

        if let Some(count) = view.int(1) {
            if offset > self.large_blobs.len() {
                return Err(StatusCode::InvalidParameter);
            }
            let end = (offset + count as usize).min(self.large_blobs.len());
            let config = bytes(&self.large_blobs[offset..end]);
            return Ok(Some(MapBuilder::new().insert(1, config).build()));
        }

        let fragment = view.bytes(2).ok_or(StatusCode::InvalidParameter)?;
        let mut message = vec![0xff; 32];
        message.extend_from_slice(&[0x0c, 0x00]);
        message.extend_from_slice(&(offset as u32).to_le_bytes());
        message.extend_from_slice(&Sha256::digest(fragment));
        self.verify_token(&view, 6, 5, &message)?;
        if self.supports_permissions && self.last_permissions.unwrap_or(0) & 0x10 == 0 {
            return Err(StatusCode::UnauthorizedPermission);
        }

        if offset == 0 {
            let total = view.int(4).ok_or(StatusCode::InvalidParameter)? as usize;
            self.large_blob_write = Some((total, Vec::new()));
        }
        let (total, buffer) = self.large_blob_write.as_mut().ok_or(StatusCode::InvalidSeq)?;
        if offset != buffer.len() || buffer.len() + fragment.len() > *total {
            return Err(StatusCode::InvalidSeq);
        }
        buffer.extend_from_slice(fragment);
        if buffer.len() < *total {
            return Ok(None);
        }

        let complete = self.large_blob_write.take().map(|(_, b)| b).unwrap_or_default();
        let (array, trailer) = complete.split_at(complete.len().saturating_sub(16));
        if array.is_empty() || Sha256::digest(array)[..16] != *trailer {
            return Err(StatusCode::IntegrityFailure);
        }
        self.large_blobs = complete;
        Ok(None)
    }

    fn reset(&mut self) -> Reply {
        if self.reset_status != StatusCode::Success {
            return Err(self.reset_status);
        }
        self.reset_count += 1;
        self.pin_hash = None;
        self.retries = MAX_RETRIES;
        self.credentials.clear();
        self.templates.clear();
        self.large_blobs = EMPTY_LARGE_BLOB_ARRAY.to_vec();
        self.pin_token = rand::random();
        self.key_agreement = KeyPair::generate();
        Ok(None)
    }

    fn handle(&mut self, request: &[u8]) -> Reply {
        let (&command, body) = request.split_first().ok_or(StatusCode::InvalidLength)?;
        self.commands.push(command);
        let decoded = if body.is_empty() {
            None
        } else {
            Some(cbor::decode(body).map_err(|_| StatusCode::InvalidCbor)?)
        };
        let params = || decoded.as_ref().ok_or(StatusCode::MissingParameter);

        match command {
            0x04 => self.get_info(),
            0x06 => self.client_pin(params()?),
            0x07 => self.reset(),
            0x09 => self.bio_enrollment(params()?),
            0x0a => self.credential_management(params()?),
            0x0b => Ok(None),
            0x0c => self.large_blobs(params()?),
            _ => Err(StatusCode::InvalidCommand),
        }
    }
}

impl CtapConnection for MockAuthenticator {
    fn transmit(&mut self, request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        match self.state().handle(request) {
            Ok(None) => Ok(vec![0x00]),
            Ok(Some(value)) => {
                let mut response = vec![0x00];
                response.extend_from_slice(&cbor::encode(&value)?);
                Ok(response)
            }
            Err(code) => Ok(vec![code.to_u8()]),
        }
    }

    fn read_config(&mut self) -> Result<Vec<u8>> {
        self.state()
            .device_config
            .clone()
            .ok_or(keytest::Error::NotSupported("vendor device config"))
    }

    fn device_version(&self) -> Option<(u8, u8, u8)> {
        self.state().device_version
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

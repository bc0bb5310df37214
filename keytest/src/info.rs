//! authenticatorGetInfo response

use crate::cbor::{MapView, Value};
use crate::error::Result;

use keytest_crypto::PinProtocol;

use std::collections::BTreeMap;

/// Decoded getInfo (0x04) response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatorInfo {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: Vec<u8>,
    pub options: BTreeMap<String, bool>,
    pub max_msg_size: Option<u32>,
    /// In the authenticator's order of preference
    pub pin_uv_auth_protocols: Vec<u8>,
    pub min_pin_length: Option<u32>,
    pub firmware_version: Option<u32>,
    pub remaining_discoverable_credentials: Option<u32>,
}

fn texts(values: Option<&[Value]>) -> Vec<String> {
    values
        .unwrap_or_default()
        .iter()
        .filter_map(|v| match v {
            Value::Text(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

impl AuthenticatorInfo {
    pub fn from_value(value: &Value) -> Result<Self> {
        let view = MapView::new(value)?;

        let mut options = BTreeMap::new();
        if let Some(map) = view.map(0x04) {
            for (k, v) in map.iter() {
                if let (Value::Text(name), Value::Bool(enabled)) = (k, v) {
                    options.insert(name.clone(), *enabled);
                }
            }
        }

        let pin_uv_auth_protocols = view
            .array(0x06)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| match v {
                Value::Integer(i) => u8::try_from(*i).ok(),
                _ => None,
            })
            .collect();

        let small = |key| view.int(key).and_then(|i| u32::try_from(i).ok());

        Ok(Self {
            versions: texts(view.array(0x01)),
            extensions: texts(view.array(0x02)),
            aaguid: view.bytes(0x03).map(<[u8]>::to_vec).unwrap_or_default(),
            options,
            max_msg_size: small(0x05),
            pin_uv_auth_protocols,
            min_pin_length: small(0x0D),
            firmware_version: small(0x0E),
            remaining_discoverable_credentials: small(0x14),
        })
    }

    /// `Some(value)` when the option is present, `None` when absent
    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }

    /// `clientPin` present and true
    pub fn pin_is_set(&self) -> bool {
        self.option("clientPin") == Some(true)
    }

    pub fn supports_client_pin(&self) -> bool {
        self.option("clientPin").is_some()
    }

    /// bioEnroll (or the 2.1 preview option) present, enrolled or not
    pub fn supports_bio_enrollment(&self) -> bool {
        self.option("bioEnroll").is_some() || self.option("userVerificationMgmtPreview").is_some()
    }

    pub fn supports_credential_management(&self) -> bool {
        self.option("credMgmt") == Some(true)
    }

    pub fn supports_large_blobs(&self) -> bool {
        self.option("largeBlobs") == Some(true)
    }

    /// Largest large-blob fragment one request may carry
    pub fn max_fragment_length(&self) -> usize {
        (self.max_msg_size.unwrap_or(1024) as usize).saturating_sub(64).max(1)
    }

    /// Whether getPinUvAuthTokenUsingPinWithPermissions is available
    pub fn supports_permissions(&self) -> bool {
        self.option("pinUvAuthToken") == Some(true)
    }

    /// First listed protocol the host implements, protocol one when none listed
    pub fn preferred_pin_protocol(&self) -> PinProtocol {
        self.pin_uv_auth_protocols
            .iter()
            .find_map(|p| PinProtocol::from_u8(*p).ok())
            .unwrap_or(PinProtocol::V1)
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::{bytes, int, text, text_map};

    fn yubikey_bio_info() -> Value {
        Value::Map(vec![
            (
                int(1),
                Value::Array(vec![text("U2F_V2"), text("FIDO_2_0"), text("FIDO_2_1")]),
            ),
            (int(2), Value::Array(vec![text("credProtect"), text("hmac-secret")])),
            (int(3), bytes(&[0xd8; 16])),
            (
                int(4),
                text_map([
                    ("rk", Value::Bool(true)),
                    ("up", Value::Bool(true)),
                    ("uv", Value::Bool(false)),
                    ("credMgmt", Value::Bool(true)),
                    ("bioEnroll", Value::Bool(false)),
                    ("clientPin", Value::Bool(false)),
                    ("pinUvAuthToken", Value::Bool(true)),
                ]),
            ),
            (int(5), int(1200)),
            (int(6), Value::Array(vec![int(2), int(1)])),
            (int(13), int(4)),
            (int(14), int(328966)),
            (int(20), int(25)),
        ])
    }

    #[test]
    fn test_parse_bio_info() {
        let info = AuthenticatorInfo::from_value(&yubikey_bio_info()).unwrap();
        assert!(info.supports_version("FIDO_2_1"));
        assert_eq!(info.extensions.len(), 2);
        assert_eq!(info.aaguid.len(), 16);
        assert_eq!(info.max_msg_size, Some(1200));
        assert_eq!(info.pin_uv_auth_protocols, vec![2, 1]);
        assert_eq!(info.preferred_pin_protocol(), PinProtocol::V2);
        assert_eq!(info.firmware_version, Some(328966));
        assert_eq!(info.remaining_discoverable_credentials, Some(25));

        assert!(info.supports_bio_enrollment());
        assert!(info.supports_client_pin());
        assert!(!info.pin_is_set());
        assert!(info.supports_credential_management());
        assert!(info.supports_permissions());
    }

    #[test]
    fn test_defaults_without_optional_fields() {
        let value = Value::Map(vec![(int(1), Value::Array(vec![text("FIDO_2_0")]))]);
        let info = AuthenticatorInfo::from_value(&value).unwrap();
        assert_eq!(info.preferred_pin_protocol(), PinProtocol::V1);
        assert!(!info.supports_client_pin());
        assert!(!info.supports_bio_enrollment());
        assert_eq!(info.option("rk"), None);
    }
}

//! Records decoded from authenticator responses
//!
//! Tests read these back after credential management and bio enrollment
//! calls to assert on what the key holds.

use crate::cbor::{MapView, Value};
use crate::error::{Error, Result};

use sha2::{Digest, Sha256};

/// getCredsMetadata (0x01)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialsMetadata {
    pub existing_count: u32,
    pub remaining_count: u32,
}

impl CredentialsMetadata {
    pub fn from_view(view: MapView<'_>) -> Result<Self> {
        Ok(Self {
            existing_count: view.require_int(0x01, "existingResidentCredentialsCount")? as u32,
            remaining_count: view.require_int(0x02, "maxPossibleRemainingResidentCredentialsCount")?
                as u32,
        })
    }
}

/// Relying party with discoverable credentials on the key
///
/// The RP ID may come back truncated to 32 bytes with a U+2026 ellipsis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpInfo {
    pub id: String,
    pub name: Option<String>,
    /// SHA-256 of the full RP ID
    pub rp_id_hash: [u8; 32],
}

impl RpInfo {
    /// Build from an RP ID, computing its hash
    pub fn new(id: &str, name: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            name: name.map(str::to_string),
            rp_id_hash: Sha256::digest(id.as_bytes()).into(),
        }
    }

    /// Decode the `rp` entity (key 0x03) and `rpIDHash` (key 0x04) of an RP enumeration response
    pub fn from_view(view: MapView<'_>) -> Result<Self> {
        let rp = view.require_map(0x03, "rp")?;
        let id = rp
            .text_value("id")
            .ok_or_else(|| Error::InvalidResponse("rp entity without id".to_string()))?;
        let hash = view.require_bytes(0x04, "rpIDHash")?;
        Ok(Self {
            id: id.to_string(),
            name: rp.text_value("name").map(str::to_string),
            rp_id_hash: hash
                .try_into()
                .map_err(|_| Error::InvalidResponse(format!("rpIDHash of {} bytes", hash.len())))?,
        })
    }
}

/// PublicKeyCredentialUserEntity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    pub id: Vec<u8>,
    pub name: Option<String>,
    pub display_name: Option<String>,
}

impl UserEntity {
    pub fn from_view(view: MapView<'_>) -> Result<Self> {
        let id = view
            .bytes_value("id")
            .ok_or_else(|| Error::InvalidResponse("user entity without id".to_string()))?;
        Ok(Self {
            id: id.to_vec(),
            name: view.text_value("name").map(str::to_string),
            display_name: view.text_value("displayName").map(str::to_string),
        })
    }
}

/// One discoverable credential as reported by enumerateCredentials
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialUserInfo {
    pub user: UserEntity,
    pub credential_id: Vec<u8>,
    /// COSE_Key of the credential
    pub public_key: Value,
    pub cred_protect: Option<u8>,
    pub large_blob_key: Option<Vec<u8>>,
}

impl CredentialUserInfo {
    pub fn from_view(view: MapView<'_>) -> Result<Self> {
        let user = UserEntity::from_view(view.require_map(0x06, "user")?)?;
        let descriptor = view.require_map(0x07, "credentialID")?;
        let credential_id = descriptor
            .bytes_value("id")
            .ok_or_else(|| Error::InvalidResponse("credential descriptor without id".to_string()))?;
        let public_key = view
            .get(0x08)
            .cloned()
            .ok_or_else(|| Error::InvalidResponse("missing publicKey (key 8)".to_string()))?;

        Ok(Self {
            user,
            credential_id: credential_id.to_vec(),
            public_key,
            cred_protect: view.int(0x0A).map(|p| p as u8),
            large_blob_key: view.bytes(0x0B).map(<[u8]>::to_vec),
        })
    }
}

/// A fingerprint template enrolled on a bio key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInfo {
    pub template_id: Vec<u8>,
    pub friendly_name: Option<String>,
}

impl TemplateInfo {
    pub fn from_value(value: &Value) -> Result<Self> {
        let view = MapView::new(value)?;
        Ok(Self {
            template_id: view.require_bytes(0x01, "templateId")?.to_vec(),
            friendly_name: view.text(0x02).map(str::to_string),
        })
    }
}

/// Progress after one enrollment sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollSample {
    pub template_id: Vec<u8>,
    /// lastEnrollSampleStatus, 0x00 means good
    pub last_sample_status: u8,
    pub remaining_samples: u32,
}

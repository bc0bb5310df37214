//! Large-blob array and its encrypted entries
//!
//! The serialized array is a CBOR array of entries followed by the first 16
//! bytes of its SHA-256. Each entry holds a payload sealed under the owning
//! credential's `largeBlobKey` with AES-256-GCM.
//!
//! Payload compression is left to the caller: `orig_size` is whatever the
//! caller says the uncompressed size is, and it is bound into the tag.

use crate::cbor::{self, MapBuilder, MapView, Value, bytes, int};
use crate::error::{Error, Result};

use keytest_crypto::gcm;

use sha2::{Digest, Sha256};

/// Trailing truncated SHA-256 of a serialized array
pub const TRAILER_LEN: usize = 16;

mod keys {
    pub const CIPHERTEXT: i32 = 0x01;
    pub const NONCE: i32 = 0x02;
    pub const ORIG_SIZE: i32 = 0x03;
}

/// One sealed large-blob entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeBlobEntry {
    /// AES-256-GCM ciphertext with its 16-byte tag appended
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; gcm::NONCE_LEN],
    pub orig_size: u64,
}

impl LargeBlobEntry {
    /// Seal `data` under `key` with a fresh random nonce
    pub fn seal(key: &[u8], data: &[u8], orig_size: u64) -> Result<Self> {
        Self::seal_with_nonce(key, data, orig_size, rand::random())
    }

    pub fn seal_with_nonce(
        key: &[u8],
        data: &[u8],
        orig_size: u64,
        nonce: [u8; gcm::NONCE_LEN],
    ) -> Result<Self> {
        let aad = gcm::large_blob_associated_data(orig_size);
        let ciphertext = gcm::seal(key, &nonce, data, &aad)?;
        Ok(Self {
            ciphertext,
            nonce,
            orig_size,
        })
    }

    /// Decrypt with `key`; fails when the entry belongs to another credential
    pub fn open(&self, key: &[u8]) -> Result<Vec<u8>> {
        let aad = gcm::large_blob_associated_data(self.orig_size);
        Ok(gcm::open(key, &self.nonce, &self.ciphertext, &aad)?)
    }

    pub fn to_value(&self) -> Value {
        MapBuilder::new()
            .insert(keys::CIPHERTEXT, bytes(&self.ciphertext))
            .insert(keys::NONCE, bytes(&self.nonce))
            .insert(keys::ORIG_SIZE, int(self.orig_size))
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let view = MapView::new(value)?;
        let ciphertext = view.require_bytes(keys::CIPHERTEXT as i128, "ciphertext")?;
        if ciphertext.len() < gcm::TAG_LEN {
            return Err(Error::InvalidResponse("large-blob ciphertext shorter than its tag".into()));
        }
        let nonce = view
            .require_bytes(keys::NONCE as i128, "nonce")?
            .try_into()
            .map_err(|_| Error::InvalidResponse("large-blob nonce is not 12 bytes".into()))?;
        let orig_size = u64::try_from(view.require_int(keys::ORIG_SIZE as i128, "origSize")?)
            .map_err(|_| Error::InvalidResponse("negative large-blob origSize".into()))?;
        Ok(Self {
            ciphertext: ciphertext.to_vec(),
            nonce,
            orig_size,
        })
    }
}

/// Contents of the authenticator's large-blob store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LargeBlobArray {
    pub entries: Vec<LargeBlobEntry>,
}

impl LargeBlobArray {
    /// Array bytes followed by the truncated SHA-256 trailer
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let array = Value::Array(self.entries.iter().map(LargeBlobEntry::to_value).collect());
        let mut out = cbor::encode(&array)?;
        let digest = Sha256::digest(&out);
        out.extend_from_slice(&digest[..TRAILER_LEN]);
        Ok(out)
    }

    /// Check the trailer and decode the entries
    pub fn parse(serialized: &[u8]) -> Result<Self> {
        if serialized.len() < TRAILER_LEN + 1 {
            return Err(Error::InvalidResponse("large-blob array too short".into()));
        }
        let (array, trailer) = serialized.split_at(serialized.len() - TRAILER_LEN);
        if Sha256::digest(array)[..TRAILER_LEN] != *trailer {
            return Err(Error::InvalidResponse("large-blob array checksum mismatch".into()));
        }
        let Value::Array(items) = cbor::decode(array)? else {
            return Err(Error::InvalidResponse("large-blob store is not an array".into()));
        };
        let entries = items
            .iter()
            .map(LargeBlobEntry::from_value)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Plaintext of the first entry `key` opens
    pub fn find(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.iter().find_map(|entry| entry.open(key).ok())
    }

    /// Drop every entry `key` opens, returning how many went
    pub fn remove(&mut self, key: &[u8]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.open(key).is_err());
        before - self.entries.len()
    }
}

//! AES-256-GCM
//!
//! Large-blob array entries are sealed with the credential's `largeBlobKey`,
//! a 12-byte nonce and the associated data `"blob" || origSize` (u64 LE).
//! Output is `ciphertext || tag` with a 16-byte tag.

use crate::error::{CryptoError, Result};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    })
}

fn check_nonce(nonce: &[u8]) -> Result<()> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_LEN,
            actual: nonce.len(),
        });
    }
    Ok(())
}

/// Encrypt and authenticate `plaintext`, returning `ciphertext || tag`
pub fn seal(key: &[u8], nonce: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    check_nonce(nonce)?;
    cipher(key)?
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Verify the tag and decrypt `ciphertext || tag`
pub fn open(key: &[u8], nonce: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    check_nonce(nonce)?;
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    cipher(key)?
        .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Associated data for a large-blob entry whose uncompressed size is `orig_size`
pub fn large_blob_associated_data(orig_size: u64) -> [u8; 12] {
    let mut aad = [0u8; 12];
    aad[..4].copy_from_slice(b"blob");
    aad[4..].copy_from_slice(&orig_size.to_le_bytes());
    aad
}

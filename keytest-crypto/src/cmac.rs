//! AES-CMAC (NIST SP 800-38B)
//!
//! The streaming [`Cmac`] mirrors the init / update / final lifecycle used by
//! secure-channel key derivation; [`compute`] is the one-shot form.

use crate::error::{CryptoError, Result};

use aes::{Aes128, Aes192, Aes256};
use cmac::Mac;

/// Block cipher behind the MAC, selected by key size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmacAlgorithm {
    Aes128,
    Aes192,
    Aes256,
}

impl CmacAlgorithm {
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Pick the algorithm matching a key length
    pub fn for_key(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Ok(Self::Aes128),
            24 => Ok(Self::Aes192),
            32 => Ok(Self::Aes256),
            actual => Err(CryptoError::InvalidKeyLength {
                expected: 16,
                actual,
            }),
        }
    }
}

enum Inner {
    Aes128(cmac::Cmac<Aes128>),
    Aes192(cmac::Cmac<Aes192>),
    Aes256(cmac::Cmac<Aes256>),
}

/// Incremental AES-CMAC
pub struct Cmac {
    inner: Inner,
}

impl Cmac {
    pub fn new(algorithm: CmacAlgorithm, key: &[u8]) -> Result<Self> {
        let bad_len = || CryptoError::InvalidKeyLength {
            expected: algorithm.key_len(),
            actual: key.len(),
        };
        let inner = match algorithm {
            CmacAlgorithm::Aes128 => Inner::Aes128(
                <cmac::Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| bad_len())?,
            ),
            CmacAlgorithm::Aes192 => Inner::Aes192(
                <cmac::Cmac<Aes192> as Mac>::new_from_slice(key).map_err(|_| bad_len())?,
            ),
            CmacAlgorithm::Aes256 => Inner::Aes256(
                <cmac::Cmac<Aes256> as Mac>::new_from_slice(key).map_err(|_| bad_len())?,
            ),
        };
        Ok(Self { inner })
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Inner::Aes128(mac) => mac.update(data),
            Inner::Aes192(mac) => mac.update(data),
            Inner::Aes256(mac) => mac.update(data),
        }
    }

    pub fn finalize(self) -> [u8; 16] {
        let tag = match self.inner {
            Inner::Aes128(mac) => mac.finalize().into_bytes(),
            Inner::Aes192(mac) => mac.finalize().into_bytes(),
            Inner::Aes256(mac) => mac.finalize().into_bytes(),
        };
        tag.into()
    }
}

/// One-shot AES-CMAC with the algorithm implied by the key length
pub fn compute(key: &[u8], data: &[u8]) -> Result<[u8; 16]> {
    let mut mac = Cmac::new(CmacAlgorithm::for_key(key)?, key)?;
    mac.update(data);
    Ok(mac.finalize())
}

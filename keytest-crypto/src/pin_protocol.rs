//! PIN/UV auth protocols one and two, platform side
//!
//! CTAP 2.2: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#pinProto1>
//!
//! | | protocol one | protocol two |
//! |---|---|---|
//! | KDF | SHA-256(Z) for both keys | HKDF-SHA-256, separate HMAC and AES keys |
//! | encrypt | AES-256-CBC, zero IV | AES-256-CBC, random IV prepended |
//! | authenticate | HMAC-SHA-256 truncated to 16 bytes | full 32-byte HMAC-SHA-256 |
//!
//! Neither protocol pads: every plaintext is a whole number of AES blocks.

use crate::ecdh::KeyPair;
use crate::error::{CryptoError, Result};

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK: usize = 16;

/// PIN/UV auth protocol selector as sent in `pinUvAuthProtocol`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinProtocol {
    V1,
    V2,
}

impl PinProtocol {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(CryptoError::UnsupportedProtocol(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Turn an ECDH `Z` into the protocol's shared secret
    pub fn kdf(self, z: &[u8; 32]) -> SharedSecret {
        match self {
            Self::V1 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&Sha256::digest(z));
                SharedSecret {
                    protocol: self,
                    hmac_key: key,
                    aes_key: key,
                }
            }
            Self::V2 => SharedSecret {
                protocol: self,
                hmac_key: hkdf_sha256(z, b"CTAP2 HMAC key"),
                aes_key: hkdf_sha256(z, b"CTAP2 AES key"),
            },
        }
    }

    /// Run the platform half of key agreement against the authenticator's COSE key
    ///
    /// Returns the ephemeral platform key pair, whose public half goes into the
    /// `keyAgreement` parameter, and the derived shared secret.
    ///
    /// # Examples
    ///
    /// ```
    /// use keytest_crypto::{PinProtocol, ecdh::KeyPair};
    ///
    /// let authenticator = KeyPair::generate();
    /// let (x, y) = authenticator.public_key_cose();
    ///
    /// let (platform, secret) = PinProtocol::V2.encapsulate(&x, &y).unwrap();
    /// let z = authenticator.shared_secret(&platform.public_key_bytes()).unwrap();
    /// assert_eq!(PinProtocol::V2.kdf(&z).aes_key(), secret.aes_key());
    /// ```
    pub fn encapsulate(self, peer_x: &[u8], peer_y: &[u8]) -> Result<(KeyPair, SharedSecret)> {
        let platform = KeyPair::generate();
        let mut z = platform.shared_secret_cose(peer_x, peer_y)?;
        let secret = self.kdf(&z);
        z.zeroize();
        Ok((platform, secret))
    }

    /// Compute a `pinUvAuthParam` over `message` with `key`
    ///
    /// `key` is either the HMAC half of a shared secret or a decrypted
    /// pinUvAuthToken, which may be 16 or 32 bytes under protocol one.
    pub fn authenticate(self, key: &[u8], message: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length, so this cannot fail
        let mut mac = match HmacSha256::new_from_slice(key) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };
        mac.update(message);
        let tag = mac.finalize().into_bytes();
        match self {
            Self::V1 => tag[..16].to_vec(),
            Self::V2 => tag.to_vec(),
        }
    }

    /// Constant-time check of a `pinUvAuthParam`
    pub fn verify(self, key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let expected = self.authenticate(key, message);
        expected.len() == signature.len() && bool::from(expected.ct_eq(signature))
    }
}

/// Keys agreed with the authenticator for one PIN/UV exchange
///
/// Both keys are wiped on drop.
pub struct SharedSecret {
    protocol: PinProtocol,
    hmac_key: [u8; 32],
    aes_key: [u8; 32],
}

impl SharedSecret {
    pub fn protocol(&self) -> PinProtocol {
        self.protocol
    }

    pub fn hmac_key(&self) -> &[u8; 32] {
        &self.hmac_key
    }

    pub fn aes_key(&self) -> &[u8; 32] {
        &self.aes_key
    }

    /// Encrypt a block-aligned plaintext
    ///
    /// # Arguments
    ///
    /// * `plaintext` - Data to encrypt, a whole number of 16-byte blocks
    ///
    /// # Returns
    ///
    /// AES-256-CBC ciphertext; protocol two prepends its random IV
    ///
    /// # Examples
    ///
    /// ```
    /// use keytest_crypto::PinProtocol;
    ///
    /// let secret = PinProtocol::V2.kdf(&[0x42u8; 32]);
    /// let ciphertext = secret.encrypt(&[0x31u8; 64]).unwrap();
    ///
    /// assert_eq!(ciphertext.len(), 16 + 64);
    /// assert!(secret.encrypt(b"not aligned").is_err());
    /// ```
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() % BLOCK != 0 {
            return Err(CryptoError::UnalignedInput(plaintext.len()));
        }
        match self.protocol {
            PinProtocol::V1 => cbc_encrypt(&self.aes_key, &[0u8; BLOCK], plaintext),
            PinProtocol::V2 => {
                let mut iv = [0u8; BLOCK];
                rand::thread_rng().fill_bytes(&mut iv);
                let mut out = iv.to_vec();
                out.extend_from_slice(&cbc_encrypt(&self.aes_key, &iv, plaintext)?);
                Ok(out)
            }
        }
    }

    /// Decrypt a ciphertext produced by the authenticator
    ///
    /// # Arguments
    ///
    /// * `ciphertext` - Encrypted data, with the IV in front under protocol two
    ///
    /// # Returns
    ///
    /// Decrypted plaintext, still block-aligned
    ///
    /// # Examples
    ///
    /// ```
    /// use keytest_crypto::PinProtocol;
    ///
    /// let secret = PinProtocol::V1.kdf(&[0x42u8; 32]);
    /// let plaintext = [0x07u8; 32];
    ///
    /// let ciphertext = secret.encrypt(&plaintext).unwrap();
    /// assert_eq!(secret.decrypt(&ciphertext).unwrap(), plaintext);
    /// ```
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.protocol {
            PinProtocol::V1 => cbc_decrypt(&self.aes_key, &[0u8; BLOCK], ciphertext),
            PinProtocol::V2 => {
                if ciphertext.len() < BLOCK {
                    return Err(CryptoError::DecryptionFailed);
                }
                let (iv, body) = ciphertext.split_at(BLOCK);
                let mut iv_block = [0u8; BLOCK];
                iv_block.copy_from_slice(iv);
                cbc_decrypt(&self.aes_key, &iv_block, body)
            }
        }
    }

    /// `pinUvAuthParam` keyed with the HMAC half of this secret
    pub fn authenticate(&self, message: &[u8]) -> Vec<u8> {
        self.protocol.authenticate(&self.hmac_key, message)
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.hmac_key.zeroize();
        self.aes_key.zeroize();
    }
}

impl core::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

fn hkdf_sha256(z: &[u8; 32], info: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; 32]), z);
    let mut key = [0u8; 32];
    // 32 bytes is always a valid HKDF-SHA-256 output length
    let _ = hkdf.expand(info, &mut key);
    key
}

fn cbc_encrypt(key: &[u8; 32], iv: &[u8; BLOCK], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = plaintext.to_vec();
    let len = buffer.len();
    Aes256CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(buffer)
}

fn cbc_decrypt(key: &[u8; 32], iv: &[u8; BLOCK], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() % BLOCK != 0 {
        return Err(CryptoError::DecryptionFailed);
    }
    let mut buffer = ciphertext.to_vec();
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agreed(protocol: PinProtocol) -> (SharedSecret, SharedSecret) {
        let authenticator = KeyPair::generate();
        let (x, y) = authenticator.public_key_cose();
        let (platform, platform_secret) = protocol.encapsulate(&x, &y).unwrap();
        let z = authenticator
            .shared_secret(&platform.public_key_bytes())
            .unwrap();
        (platform_secret, protocol.kdf(&z))
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(PinProtocol::from_u8(1).unwrap(), PinProtocol::V1);
        assert_eq!(PinProtocol::from_u8(2).unwrap().as_u8(), 2);
        assert_eq!(
            PinProtocol::from_u8(3).unwrap_err(),
            CryptoError::UnsupportedProtocol(3)
        );
    }

    #[test]
    fn test_v1_keys_are_sha256_of_z() {
        let z = [0x55u8; 32];
        let secret = PinProtocol::V1.kdf(&z);
        let digest = Sha256::digest(z);
        assert_eq!(secret.aes_key().as_slice(), digest.as_slice());
        assert_eq!(secret.hmac_key(), secret.aes_key());
    }

    #[test]
    fn test_v2_keys_differ() {
        let secret = PinProtocol::V2.kdf(&[0x55u8; 32]);
        assert_ne!(secret.hmac_key(), secret.aes_key());
    }

    #[test]
    fn test_v1_zero_iv_is_deterministic_and_unpadded() {
        let (platform, authenticator) = agreed(PinProtocol::V1);
        let pin = [0x31u8; 64];

        let c1 = platform.encrypt(&pin).unwrap();
        let c2 = platform.encrypt(&pin).unwrap();
        assert_eq!(c1.len(), 64);
        assert_eq!(c1, c2);
        assert_eq!(authenticator.decrypt(&c1).unwrap(), pin);
    }

    #[test]
    fn test_v2_prepends_random_iv() {
        let (platform, authenticator) = agreed(PinProtocol::V2);
        let token = [0xA5u8; 32];

        let c1 = platform.encrypt(&token).unwrap();
        let c2 = platform.encrypt(&token).unwrap();
        assert_eq!(c1.len(), 16 + 32);
        assert_ne!(c1[..16], c2[..16]);
        assert_eq!(authenticator.decrypt(&c2).unwrap(), token);
    }

    #[test]
    fn test_unaligned_plaintext_rejected() {
        let secret = PinProtocol::V1.kdf(&[1u8; 32]);
        assert_eq!(
            secret.encrypt(b"1234").unwrap_err(),
            CryptoError::UnalignedInput(4)
        );
        assert!(secret.decrypt(&[0u8; 15]).is_err());
        assert!(PinProtocol::V2.kdf(&[1u8; 32]).decrypt(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_authenticate_lengths() {
        let key = [0x42u8; 32];
        let v1 = PinProtocol::V1.authenticate(&key, b"client_data_hash");
        let v2 = PinProtocol::V2.authenticate(&key, b"client_data_hash");
        assert_eq!(v1.len(), 16);
        assert_eq!(v2.len(), 32);
        assert_eq!(v1, v2[..16]);
    }

    #[test]
    fn test_verify() {
        let (platform, authenticator) = agreed(PinProtocol::V2);
        let param = platform.authenticate(b"message");
        assert!(PinProtocol::V2.verify(authenticator.hmac_key(), b"message", &param));
        assert!(!PinProtocol::V2.verify(authenticator.hmac_key(), b"other", &param));
        assert!(!PinProtocol::V2.verify(authenticator.hmac_key(), b"message", &param[..16]));
    }
}

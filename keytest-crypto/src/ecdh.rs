//! P-256 ECDH for CTAP PIN/UV auth key agreement
//!
//! The platform generates an ephemeral key pair per `getKeyAgreement`
//! exchange. The authenticator's half arrives as a COSE_Key (kty 2,
//! alg -25, crv 1) and the agreed value is the x-coordinate of the ECDH
//! point.

use crate::error::{CryptoError, Result};

use p256::{
    EncodedPoint, PublicKey, SecretKey,
    elliptic_curve::sec1::{Coordinates, ToEncodedPoint},
};
use rand::rngs::OsRng;

/// Ephemeral P-256 key pair
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG
    ///
    /// # Examples
    ///
    /// ```
    /// use keytest_crypto::ecdh::KeyPair;
    ///
    /// let keypair = KeyPair::generate();
    /// assert_eq!(keypair.public_key_bytes().len(), 65);
    /// ```
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Rebuild a key pair from a 32-byte big-endian scalar
    pub fn from_bytes(secret_bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(secret_bytes.into())
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Public key as the (x, y) pair carried in COSE labels -2 and -3
    pub fn public_key_cose(&self) -> ([u8; 32], [u8; 32]) {
        point_coordinates(&self.public.to_encoded_point(false))
    }

    /// Public key as an uncompressed SEC1 point (0x04 || x || y)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// ECDH with a peer given as a SEC1 point
    ///
    /// Returns the raw x-coordinate `Z`; callers feed it through a PIN
    /// protocol KDF before use.
    pub fn shared_secret(&self, peer_public_key: &[u8]) -> Result<[u8; 32]> {
        let peer = PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut z = [0u8; 32];
        z.copy_from_slice(shared.raw_secret_bytes());
        Ok(z)
    }

    /// ECDH with a peer given as COSE coordinates
    ///
    /// # Examples
    ///
    /// ```
    /// use keytest_crypto::ecdh::KeyPair;
    ///
    /// let platform = KeyPair::generate();
    /// let authenticator = KeyPair::generate();
    /// let (x, y) = authenticator.public_key_cose();
    ///
    /// let z1 = platform.shared_secret_cose(&x, &y).unwrap();
    /// let z2 = authenticator.shared_secret(&platform.public_key_bytes()).unwrap();
    /// assert_eq!(z1, z2);
    /// ```
    pub fn shared_secret_cose(&self, x: &[u8], y: &[u8]) -> Result<[u8; 32]> {
        if x.len() != 32 || y.len() != 32 {
            return Err(CryptoError::InvalidPublicKey);
        }
        let point = EncodedPoint::from_affine_coordinates(x.into(), y.into(), false);
        self.shared_secret(point.as_bytes())
    }
}

fn point_coordinates(point: &EncodedPoint) -> ([u8; 32], [u8; 32]) {
    let mut x_bytes = [0u8; 32];
    let mut y_bytes = [0u8; 32];
    if let Coordinates::Uncompressed { x, y } = point.coordinates() {
        x_bytes.copy_from_slice(x);
        y_bytes.copy_from_slice(y);
    }
    (x_bytes, y_bytes)
}

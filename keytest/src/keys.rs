//! Test keys and conversions between their encodings
//!
//! Keys move between four shapes during a test:
//! - PEM text, as stored in the fixture directory
//! - DER (PKCS#8 for private keys, SubjectPublicKeyInfo for public keys)
//! - PIV objects (the 0x7F49 public key template and private key import TLVs)
//! - native RustCrypto keys, for signing and verifying in assertions
//!
//! [`KeyConverter`] holds the stateless conversions; [`TestKey`] is a loaded
//! fixture that offers them as methods.

use crate::error::{Error, Result};
use crate::piv::{self, tags};

use p256::elliptic_curve::sec1::ToEncodedPoint;
use pem_rfc7468::LineEnding;
use pkcs8::{DecodePrivateKey, EncodePublicKey, ObjectIdentifier, PrivateKeyInfo};
use spki::{AlgorithmIdentifierRef, SubjectPublicKeyInfoRef};
use zeroize::Zeroizing;

use std::fmt;
use std::path::Path;

pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";
pub const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Key algorithms the fixtures cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    EccP256,
    EccP384,
    Ed25519,
}

impl KeyAlgorithm {
    pub const ALL: [KeyAlgorithm; 3] = [Self::EccP256, Self::EccP384, Self::Ed25519];

    /// Fixture file prefix
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::EccP256 => "p256",
            Self::EccP384 => "p384",
            Self::Ed25519 => "ed25519",
        }
    }

    /// Length of the public key as carried in PIV tag 0x86
    pub fn public_point_len(self) -> usize {
        match self {
            Self::EccP256 => 65,
            Self::EccP384 => 97,
            Self::Ed25519 => 32,
        }
    }

    pub fn private_scalar_len(self) -> usize {
        match self {
            Self::EccP256 | Self::Ed25519 => 32,
            Self::EccP384 => 48,
        }
    }

    fn from_identifier(alg: &AlgorithmIdentifierRef<'_>) -> Result<Self> {
        if alg.oid == OID_ED25519 {
            return Ok(Self::Ed25519);
        }
        if alg.oid == OID_RSA_ENCRYPTION {
            return Err(Error::UnsupportedAlgorithm("RSA".to_string()));
        }
        if alg.oid != OID_EC_PUBLIC_KEY {
            return Err(Error::UnsupportedAlgorithm(alg.oid.to_string()));
        }
        match alg.parameters_oid() {
            Ok(curve) if curve == OID_SECP256R1 => Ok(Self::EccP256),
            Ok(curve) if curve == OID_SECP384R1 => Ok(Self::EccP384),
            Ok(curve) => Err(Error::UnsupportedAlgorithm(format!("EC curve {}", curve))),
            Err(e) => Err(Error::InvalidDer(format!("EC key without named curve: {}", e))),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EccP256 => "ECC P-256",
            Self::EccP384 => "ECC P-384",
            Self::Ed25519 => "Ed25519",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Private,
    Public,
}

impl KeyKind {
    fn file_suffix(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Private => PRIVATE_KEY_LABEL,
            Self::Public => PUBLIC_KEY_LABEL,
        }
    }
}

fn der_error(e: impl fmt::Display) -> Error {
    Error::InvalidDer(e.to_string())
}

fn point_length(algorithm: KeyAlgorithm, point: &[u8]) -> Result<()> {
    if point.len() != algorithm.public_point_len() {
        return Err(Error::InvalidPiv(format!(
            "{} public key of {} bytes, expected {}",
            algorithm,
            point.len(),
            algorithm.public_point_len()
        )));
    }
    Ok(())
}

/// Stateless conversions between key encodings
pub struct KeyConverter;

impl KeyConverter {
    /// Decode PEM, requiring `expected_label`
    pub fn pem_to_der(pem: &str, expected_label: &str) -> Result<Vec<u8>> {
        let (label, der) = pem_rfc7468::decode_vec(pem.trim().as_bytes())
            .map_err(|e| Error::InvalidPem(e.to_string()))?;
        if label != expected_label {
            return Err(Error::InvalidPem(format!(
                "expected {:?}, found {:?}",
                expected_label, label
            )));
        }
        Ok(der)
    }

    pub fn der_to_pem(label: &str, der: &[u8]) -> Result<String> {
        pem_rfc7468::encode_string(label, LineEnding::LF, der)
            .map_err(|e| Error::InvalidPem(e.to_string()))
    }

    pub fn algorithm_of_private_der(der: &[u8]) -> Result<KeyAlgorithm> {
        let info = PrivateKeyInfo::try_from(der).map_err(der_error)?;
        KeyAlgorithm::from_identifier(&info.algorithm)
    }

    pub fn algorithm_of_public_der(der: &[u8]) -> Result<KeyAlgorithm> {
        let info = SubjectPublicKeyInfoRef::try_from(der).map_err(der_error)?;
        KeyAlgorithm::from_identifier(&info.algorithm)
    }

    /// Raw public key from SubjectPublicKeyInfo
    ///
    /// An uncompressed SEC1 point for ECC, the 32 key bytes for Ed25519.
    pub fn public_point_from_spki(der: &[u8]) -> Result<(KeyAlgorithm, Vec<u8>)> {
        let info = SubjectPublicKeyInfoRef::try_from(der).map_err(der_error)?;
        let algorithm = KeyAlgorithm::from_identifier(&info.algorithm)?;
        let point = info
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| Error::InvalidDer("public key bit string has unused bits".to_string()))?;
        point_length(algorithm, point)?;
        Ok((algorithm, point.to_vec()))
    }

    /// SubjectPublicKeyInfo for a raw public key, validating the point
    pub fn spki_from_public_point(algorithm: KeyAlgorithm, point: &[u8]) -> Result<Vec<u8>> {
        let document = match algorithm {
            KeyAlgorithm::EccP256 => p256::PublicKey::from_sec1_bytes(point)
                .map_err(der_error)?
                .to_public_key_der(),
            KeyAlgorithm::EccP384 => p384::PublicKey::from_sec1_bytes(point)
                .map_err(der_error)?
                .to_public_key_der(),
            KeyAlgorithm::Ed25519 => {
                let bytes: &[u8; 32] = point.try_into().map_err(|_| {
                    Error::InvalidDer(format!("Ed25519 key of {} bytes", point.len()))
                })?;
                ed25519_dalek::VerifyingKey::from_bytes(bytes)
                    .map_err(der_error)?
                    .to_public_key_der()
            }
        }
        .map_err(der_error)?;
        Ok(document.into_vec())
    }

    /// Algorithm and raw public key derived from a PKCS#8 private key
    pub fn public_point_from_private(der: &[u8]) -> Result<(KeyAlgorithm, Vec<u8>)> {
        let algorithm = Self::algorithm_of_private_der(der)?;
        let point = match algorithm {
            KeyAlgorithm::EccP256 => p256::SecretKey::from_pkcs8_der(der)
                .map_err(der_error)?
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            KeyAlgorithm::EccP384 => p384::SecretKey::from_pkcs8_der(der)
                .map_err(der_error)?
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            KeyAlgorithm::Ed25519 => ed25519_dalek::SigningKey::from_pkcs8_der(der)
                .map_err(der_error)?
                .verifying_key()
                .to_bytes()
                .to_vec(),
        };
        Ok((algorithm, point))
    }

    /// PIV public key template: `7F49 { 86 point }`
    pub fn piv_public_key(algorithm: KeyAlgorithm, point: &[u8]) -> Result<Vec<u8>> {
        point_length(algorithm, point)?;
        Ok(piv::encode_tlv(
            tags::PUBLIC_KEY_TEMPLATE,
            &piv::encode_tlv(tags::EC_POINT, point),
        ))
    }

    /// Raw public key out of a PIV public key template
    pub fn public_key_from_piv(algorithm: KeyAlgorithm, encoded: &[u8]) -> Result<Vec<u8>> {
        let (tag, template, rest) = piv::parse_tlv(encoded)?;
        if tag != tags::PUBLIC_KEY_TEMPLATE || !rest.is_empty() {
            return Err(Error::InvalidPiv(format!(
                "expected a lone 0x7F49 template, found 0x{:X}",
                tag
            )));
        }
        if piv::find(template, tags::RSA_MODULUS)?.is_some() {
            return Err(Error::UnsupportedAlgorithm("RSA".to_string()));
        }
        let point = piv::find(template, tags::EC_POINT)?
            .ok_or_else(|| Error::InvalidPiv("public key template without tag 0x86".to_string()))?;
        point_length(algorithm, point)?;
        Ok(point.to_vec())
    }

    /// PIV private key import TLV: tag 0x06 (ECC) or 0x07 (Ed25519) around the scalar
    pub fn piv_private_key(private_der: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let algorithm = Self::algorithm_of_private_der(private_der)?;
        let (tag, scalar) = match algorithm {
            KeyAlgorithm::EccP256 => (
                tags::ECC_PRIVATE,
                Zeroizing::new(
                    p256::SecretKey::from_pkcs8_der(private_der)
                        .map_err(der_error)?
                        .to_bytes()
                        .to_vec(),
                ),
            ),
            KeyAlgorithm::EccP384 => (
                tags::ECC_PRIVATE,
                Zeroizing::new(
                    p384::SecretKey::from_pkcs8_der(private_der)
                        .map_err(der_error)?
                        .to_bytes()
                        .to_vec(),
                ),
            ),
            KeyAlgorithm::Ed25519 => (
                tags::ED25519_PRIVATE,
                Zeroizing::new(
                    ed25519_dalek::SigningKey::from_pkcs8_der(private_der)
                        .map_err(der_error)?
                        .to_bytes()
                        .to_vec(),
                ),
            ),
        };
        Ok(Zeroizing::new(piv::encode_tlv(tag, &scalar)))
    }
}

/// A key loaded from the fixture directory
#[derive(Clone, PartialEq, Eq)]
pub struct TestKey {
    algorithm: KeyAlgorithm,
    kind: KeyKind,
    pem: String,
    der: Vec<u8>,
}

impl fmt::Debug for TestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestKey")
            .field("algorithm", &self.algorithm)
            .field("kind", &self.kind)
            .field("der_len", &self.der.len())
            .finish()
    }
}

impl TestKey {
    /// Load `{p256,p384,ed25519}_{private,public}.pem` from `dir`
    pub fn load(dir: &Path, algorithm: KeyAlgorithm, kind: KeyKind) -> Result<Self> {
        let path = dir.join(format!("{}_{}.pem", algorithm.file_stem(), kind.file_suffix()));
        let pem = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let key = Self::from_pem(&pem)?;
        if key.algorithm != algorithm || key.kind != kind {
            return Err(Error::InvalidPem(format!(
                "{} holds a {:?} {} key",
                path.display(),
                key.kind,
                key.algorithm
            )));
        }
        Ok(key)
    }

    /// Parse a `PRIVATE KEY` (PKCS#8) or `PUBLIC KEY` (SPKI) PEM block
    pub fn from_pem(pem: &str) -> Result<Self> {
        let (label, _) = pem_rfc7468::decode_vec(pem.trim().as_bytes())
            .map_err(|e| Error::InvalidPem(e.to_string()))?;
        let kind = match label {
            PRIVATE_KEY_LABEL => KeyKind::Private,
            PUBLIC_KEY_LABEL => KeyKind::Public,
            other => return Err(Error::InvalidPem(format!("unexpected label {:?}", other))),
        };
        let der = KeyConverter::pem_to_der(pem, kind.label())?;
        Self::from_der(kind, der)
    }

    pub fn from_der(kind: KeyKind, der: Vec<u8>) -> Result<Self> {
        let algorithm = match kind {
            KeyKind::Private => KeyConverter::algorithm_of_private_der(&der)?,
            KeyKind::Public => KeyConverter::algorithm_of_public_der(&der)?,
        };
        let pem = KeyConverter::der_to_pem(kind.label(), &der)?;
        Ok(Self {
            algorithm,
            kind,
            pem,
            der,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn is_private(&self) -> bool {
        self.kind == KeyKind::Private
    }

    pub fn as_pem(&self) -> &str {
        &self.pem
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Raw public key: SEC1 uncompressed point or Ed25519 bytes
    pub fn public_point(&self) -> Result<Vec<u8>> {
        let (_, point) = match self.kind {
            KeyKind::Private => KeyConverter::public_point_from_private(&self.der)?,
            KeyKind::Public => KeyConverter::public_point_from_spki(&self.der)?,
        };
        Ok(point)
    }

    /// Public half as its own key; a public key returns a copy of itself
    pub fn public_key(&self) -> Result<TestKey> {
        match self.kind {
            KeyKind::Public => Ok(self.clone()),
            KeyKind::Private => {
                let point = self.public_point()?;
                let spki = KeyConverter::spki_from_public_point(self.algorithm, &point)?;
                Self::from_der(KeyKind::Public, spki)
            }
        }
    }

    /// Build a public key from a PIV public key template
    pub fn from_piv_public_key(algorithm: KeyAlgorithm, encoded: &[u8]) -> Result<Self> {
        let point = KeyConverter::public_key_from_piv(algorithm, encoded)?;
        Self::from_der(KeyKind::Public, KeyConverter::spki_from_public_point(algorithm, &point)?)
    }

    pub fn piv_public_key(&self) -> Result<Vec<u8>> {
        KeyConverter::piv_public_key(self.algorithm, &self.public_point()?)
    }

    pub fn piv_private_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.require_private()?;
        KeyConverter::piv_private_key(&self.der)
    }

    fn require_private(&self) -> Result<()> {
        match self.kind {
            KeyKind::Private => Ok(()),
            KeyKind::Public => Err(Error::InvalidDer(format!(
                "{} public key has no private part",
                self.algorithm
            ))),
        }
    }

    fn require(&self, algorithm: KeyAlgorithm) -> Result<()> {
        if self.algorithm != algorithm {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{} key used as {}",
                self.algorithm, algorithm
            )));
        }
        Ok(())
    }

    pub fn p256_signing_key(&self) -> Result<p256::ecdsa::SigningKey> {
        self.require(KeyAlgorithm::EccP256)?;
        self.require_private()?;
        p256::ecdsa::SigningKey::from_pkcs8_der(&self.der).map_err(der_error)
    }

    pub fn p384_signing_key(&self) -> Result<p384::ecdsa::SigningKey> {
        self.require(KeyAlgorithm::EccP384)?;
        self.require_private()?;
        p384::ecdsa::SigningKey::from_pkcs8_der(&self.der).map_err(der_error)
    }

    pub fn ed25519_signing_key(&self) -> Result<ed25519_dalek::SigningKey> {
        self.require(KeyAlgorithm::Ed25519)?;
        self.require_private()?;
        ed25519_dalek::SigningKey::from_pkcs8_der(&self.der).map_err(der_error)
    }

    /// Sign `message`: DER ECDSA over SHA-256/SHA-384, or a raw Ed25519 signature
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        use p256::ecdsa::signature::Signer;

        Ok(match self.algorithm {
            KeyAlgorithm::EccP256 => {
                let signature: p256::ecdsa::Signature = self.p256_signing_key()?.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            KeyAlgorithm::EccP384 => {
                let signature: p384::ecdsa::Signature = self.p384_signing_key()?.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            KeyAlgorithm::Ed25519 => self.ed25519_signing_key()?.sign(message).to_bytes().to_vec(),
        })
    }

    /// Check a signature produced by [`TestKey::sign`] or by a device holding this key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool> {
        use p256::ecdsa::signature::Verifier;

        let point = self.public_point()?;
        Ok(match self.algorithm {
            KeyAlgorithm::EccP256 => {
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(der_error)?;
                p256::ecdsa::Signature::from_der(signature)
                    .is_ok_and(|sig| key.verify(message, &sig).is_ok())
            }
            KeyAlgorithm::EccP384 => {
                let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(der_error)?;
                p384::ecdsa::Signature::from_der(signature)
                    .is_ok_and(|sig| key.verify(message, &sig).is_ok())
            }
            KeyAlgorithm::Ed25519 => {
                let bytes: [u8; 32] = point
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidDer("Ed25519 key length".to_string()))?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(der_error)?;
                ed25519_dalek::Signature::from_slice(signature)
                    .is_ok_and(|sig| key.verify(message, &sig).is_ok())
            }
        })
    }
}

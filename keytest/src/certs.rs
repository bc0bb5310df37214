//! Test certificates: PEM, DER and PIV certificate objects

use crate::error::{Error, Result};
use crate::keys::{KeyAlgorithm, KeyConverter, KeyKind, TestKey};
use crate::piv;

use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use std::fmt;
use std::path::Path;

pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (rest, cert) =
        X509Certificate::from_der(der).map_err(|e| Error::InvalidCertificate(format!("{:?}", e)))?;
    if !rest.is_empty() {
        return Err(Error::InvalidCertificate(format!(
            "{} trailing bytes after certificate",
            rest.len()
        )));
    }
    Ok(cert)
}

/// Stateless certificate conversions
pub struct CertConverter;

impl CertConverter {
    /// Decode a `CERTIFICATE` PEM block, checking that it parses as X.509
    pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
        let der = KeyConverter::pem_to_der(pem, CERTIFICATE_LABEL)?;
        parse(&der)?;
        Ok(der)
    }

    pub fn der_to_pem(der: &[u8]) -> Result<String> {
        KeyConverter::der_to_pem(CERTIFICATE_LABEL, der)
    }

    /// Certificate held in a PIV certificate data object
    pub fn from_piv_object(object: &[u8]) -> Result<TestCertificate> {
        TestCertificate::from_der(piv::certificate_from_object(object)?.to_vec())
    }

    /// Whether `key` (either half) is the certificate's subject key
    pub fn public_key_matches(cert: &TestCertificate, key: &TestKey) -> Result<bool> {
        if cert.algorithm() != key.algorithm() {
            return Ok(false);
        }
        let (_, cert_point) = KeyConverter::public_point_from_spki(&cert.public_key_der()?)?;
        Ok(cert_point == key.public_point()?)
    }
}

/// A certificate loaded from the fixture directory
#[derive(Clone, PartialEq, Eq)]
pub struct TestCertificate {
    algorithm: KeyAlgorithm,
    pem: String,
    der: Vec<u8>,
}

impl fmt::Debug for TestCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCertificate")
            .field("algorithm", &self.algorithm)
            .field("subject", &self.subject().unwrap_or_default())
            .finish()
    }
}

impl TestCertificate {
    /// Load `{p256,p384,ed25519}_cert.pem` from `dir`
    pub fn load(dir: &Path, algorithm: KeyAlgorithm) -> Result<Self> {
        let path = dir.join(format!("{}_cert.pem", algorithm.file_stem()));
        let pem = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let cert = Self::from_pem(&pem)?;
        if cert.algorithm != algorithm {
            return Err(Error::InvalidCertificate(format!(
                "{} holds a {} certificate",
                path.display(),
                cert.algorithm
            )));
        }
        Ok(cert)
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(CertConverter::pem_to_der(pem)?)
    }

    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let algorithm = {
            let cert = parse(&der)?;
            KeyConverter::algorithm_of_public_der(cert.public_key().raw)?
        };
        let pem = CertConverter::der_to_pem(&der)?;
        Ok(Self { algorithm, pem, der })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn as_pem(&self) -> &str {
        &self.pem
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Subject DN in RFC 4514 form, e.g. `CN=keytest p256, O=keytest`
    pub fn subject(&self) -> Result<String> {
        Ok(parse(&self.der)?.subject().to_string())
    }

    pub fn issuer(&self) -> Result<String> {
        Ok(parse(&self.der)?.issuer().to_string())
    }

    pub fn is_self_issued(&self) -> Result<bool> {
        let cert = parse(&self.der)?;
        Ok(cert.subject() == cert.issuer())
    }

    /// Serial number as lowercase hex of its DER content bytes
    pub fn serial_hex(&self) -> Result<String> {
        Ok(hex::encode(parse(&self.der)?.raw_serial()))
    }

    /// SubjectPublicKeyInfo DER
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(parse(&self.der)?.public_key().raw.to_vec())
    }

    pub fn public_key(&self) -> Result<TestKey> {
        TestKey::from_der(KeyKind::Public, self.public_key_der()?)
    }

    /// PIV certificate data object: `70 cert | 71 01 00 | FE 00`
    pub fn piv_object(&self) -> Vec<u8> {
        piv::certificate_object(&self.der)
    }
}

//! Error type for the keytest harness

use crate::status::StatusCode;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Authenticator returned a non-zero CTAP2 status
    #[error("CTAP error: {0}")]
    Ctap(StatusCode),

    #[error("Transport error: {0}")]
    Transport(#[from] keytest_transport::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] keytest_crypto::CryptoError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No attached, non-blocked device satisfies the request
    #[error("No test device found: {0}")]
    DeviceNotFound(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The key collector declined a request
    #[error("Operation cancelled by key collector")]
    Cancelled,

    #[error("Malformed response: {0}")]
    InvalidResponse(String),

    #[error("Invalid PIN: {0}")]
    InvalidPin(&'static str),

    #[error("Authenticator does not support {0}")]
    NotSupported(&'static str),

    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    #[error("Invalid DER: {0}")]
    InvalidDer(String),

    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid PIV encoding: {0}")]
    InvalidPiv(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CBOR error: {0}")]
    Cbor(String),
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Error::Ctap(status)
    }
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// CTAP status carried by this error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Ctap(status) => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

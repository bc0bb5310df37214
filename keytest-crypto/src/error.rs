//! Error types for cryptographic operations

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Peer public key is not a valid P-256 point
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Secret scalar is zero or out of range
    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    /// Key material does not have the length the algorithm needs
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    /// Input to a block cipher mode without padding is not block aligned
    #[error("Input length {0} is not a multiple of the AES block size")]
    UnalignedInput(usize),

    /// PIN/UV auth protocol number the host does not implement
    #[error("Unsupported PIN/UV auth protocol {0}")]
    UnsupportedProtocol(u8),
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;

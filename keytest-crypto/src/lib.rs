//! Cryptographic primitives used by the keytest harness
//!
//! - **ECDH**: P-256 key agreement for the CTAP2 PIN/UV auth protocols
//! - **PIN protocols**: one (zero-IV AES-CBC, truncated HMAC) and two (HKDF keys, random IV)
//! - **GCM**: AES-256-GCM, the cipher behind CTAP2 large-blob entries
//! - **CMAC**: AES-CMAC over 128, 192 and 256 bit keys, used by SCP and PIV management keys
//!
//! All CTAP pieces follow
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html>

pub mod cmac;
pub mod ecdh;
pub mod error;
pub mod gcm;
pub mod pin_protocol;

pub use error::{CryptoError, Result};
pub use pin_protocol::{PinProtocol, SharedSecret};

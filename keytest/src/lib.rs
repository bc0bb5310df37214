#![warn(unused_extern_crates)]

//! # keytest
//!
//! Support code for integration tests that run against physical FIDO2/PIV
//! security keys.
//!
//! ## Architecture
//!
//! - **Enumeration and selection**: list attached keys, skip the ones on the
//!   local block list, pick one by firmware, form factor and FIPS status;
//!   keys in PC/SC readers are identified through the management applet
//! - **Reset**: wait for a re-insertion, factory-reset the key, optionally set
//!   a PIN
//! - **Client**: the CTAP2 subset test setup needs (clientPin, credential
//!   management, bio enrollment, large blobs)
//! - **Keys and certificates**: fixtures in PEM, DER, PIV and RustCrypto form
//! - **Collector**: PIN, touch and fingerprint prompts answered by a
//!   [`KeyCollector`]
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(feature = "usb")]
//! # fn main() -> Result<(), keytest::Error> {
//! use keytest::{StandardTestDevice, TestDeviceEnumeration};
//!
//! let mut devices = TestDeviceEnumeration::usb()?;
//! let device = devices.select(StandardTestDevice::Fw5)?;
//! println!("testing against {}", device);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "usb"))]
//! # fn main() {}
//! ```

pub mod cbor;
pub mod certs;
pub mod client;
pub mod collector;
pub mod config;
pub mod ctap;
pub mod device;
pub mod enumeration;
pub mod error;
pub mod fixtures;
pub mod info;
pub mod keys;
pub mod large_blob;
pub mod piv;
pub mod reset;
pub mod response;
pub mod selection;
pub mod status;

pub use certs::{CertConverter, TestCertificate};
pub use client::{Fido2Client, PinToken, permissions};
pub use collector::{
    KeyCollector, KeyEntryData, KeyEntryRequest, KeyEntryResponse, TestKeyCollector,
};
pub use config::TestConfig;
pub use ctap::{CtapCommand, CtapConnection, HidCtapConnection};
pub use device::{DeviceInfo, FirmwareVersion, FormFactor, TestDevice};
pub use enumeration::{
    BlockList, DeviceEnumerator, SmartCardTestDevice, TestDeviceEnumeration, identify_smart_cards,
};
pub use error::{Error, Result};
pub use fixtures::BioFixture;
pub use info::AuthenticatorInfo;
pub use keys::{KeyAlgorithm, KeyConverter, KeyKind, TestKey};
pub use large_blob::{LargeBlobArray, LargeBlobEntry};
pub use reset::{Fido2Reset, ResetOutcome};
pub use response::{
    CredentialUserInfo, CredentialsMetadata, EnrollSample, RpInfo, TemplateInfo, UserEntity,
};
pub use selection::StandardTestDevice;
pub use status::StatusCode;

#[cfg(feature = "usb")]
pub use ctap::open_hid;
#[cfg(feature = "usb")]
pub use enumeration::HidDeviceEnumerator;

pub use keytest_crypto::PinProtocol;

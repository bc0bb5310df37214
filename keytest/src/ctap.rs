//! CTAP2 command codes and the connection seam used by the client
//!
//! Everything that talks to an authenticator goes through [`CtapConnection`],
//! so flows can run against a real key over HID or against an in-memory fake
//! in tests.

use crate::cbor::{self, Value};
use crate::error::{Error, Result};
use crate::status::StatusCode;

use keytest_transport::{Cmd, HidChannel, HidPort};

use std::time::Duration;

/// CTAP 2.1 command codes issued by the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CtapCommand {
    GetInfo = 0x04,
    ClientPin = 0x06,
    Reset = 0x07,
    BioEnrollment = 0x09,
    CredentialManagement = 0x0a,
    Selection = 0x0b,
    LargeBlobs = 0x0c,
}

impl CtapCommand {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x04 => Some(Self::GetInfo),
            0x06 => Some(Self::ClientPin),
            0x07 => Some(Self::Reset),
            0x09 => Some(Self::BioEnrollment),
            0x0a => Some(Self::CredentialManagement),
            0x0b => Some(Self::Selection),
            0x0c => Some(Self::LargeBlobs),
            _ => None,
        }
    }
}

impl std::fmt::Display for CtapCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.as_u8())
    }
}

/// Upper bound for commands answered without user interaction
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for commands that wait on a touch or a fingerprint
pub const USER_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A link to one authenticator
pub trait CtapConnection {
    /// Send `command || params` and return the raw response, status byte first
    fn transmit(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// YubiKey device-info TLVs (vendor command 0xC2), length prefix included
    fn read_config(&mut self) -> Result<Vec<u8>> {
        Err(Error::NotSupported("vendor device config"))
    }

    /// Firmware version from the transport handshake, when the transport has one
    fn device_version(&self) -> Option<(u8, u8, u8)> {
        None
    }
}

impl<C: CtapConnection + ?Sized> CtapConnection for &mut C {
    fn transmit(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        (**self).transmit(request, timeout)
    }

    fn read_config(&mut self) -> Result<Vec<u8>> {
        (**self).read_config()
    }

    fn device_version(&self) -> Option<(u8, u8, u8)> {
        (**self).device_version()
    }
}

impl<C: CtapConnection + ?Sized> CtapConnection for Box<C> {
    fn transmit(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        (**self).transmit(request, timeout)
    }

    fn read_config(&mut self) -> Result<Vec<u8>> {
        (**self).read_config()
    }

    fn device_version(&self) -> Option<(u8, u8, u8)> {
        (**self).device_version()
    }
}

/// Split a response into its status and body, failing on a non-zero status
pub fn split_status(response: &[u8]) -> Result<&[u8]> {
    let (&status, body) = response
        .split_first()
        .ok_or_else(|| Error::InvalidResponse("empty CTAP response".to_string()))?;
    match StatusCode::from_u8(status) {
        StatusCode::Success => Ok(body),
        error => Err(Error::Ctap(error)),
    }
}

/// Encode and send a command, decoding the CBOR body if there is one
pub fn send<C: CtapConnection + ?Sized>(
    conn: &mut C,
    command: CtapCommand,
    params: Option<&Value>,
    timeout: Duration,
) -> Result<Option<Value>> {
    let mut request = vec![command.as_u8()];
    if let Some(params) = params {
        request.extend_from_slice(&cbor::encode(params)?);
    }

    log::trace!("-> {} ({} bytes)", command, request.len());
    let response = conn.transmit(&request, timeout)?;
    let body =
        split_status(&response).inspect_err(|e| log::debug!("<- {} failed: {}", command, e))?;

    if body.is_empty() {
        Ok(None)
    } else {
        cbor::decode(body).map(Some)
    }
}

/// CTAP connection over a CTAPHID channel
pub struct HidCtapConnection<P> {
    channel: HidChannel<P>,
}

impl<P: HidPort> HidCtapConnection<P> {
    pub fn new(channel: HidChannel<P>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &HidChannel<P> {
        &self.channel
    }
}

impl<P: HidPort> CtapConnection for HidCtapConnection<P> {
    fn transmit(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        Ok(self.channel.transact(Cmd::Cbor, request, timeout)?)
    }

    fn read_config(&mut self) -> Result<Vec<u8>> {
        // page 0
        Ok(self.channel.transact(Cmd::ReadConfig, &[0x00], DEFAULT_TIMEOUT)?)
    }

    fn device_version(&self) -> Option<(u8, u8, u8)> {
        self.channel.init_response().map(|init| init.device_version)
    }
}

/// Open a physical device and wrap it as a CTAP connection
#[cfg(feature = "usb")]
pub fn open_hid(
    api: &keytest_transport::hidapi::HidApi,
    info: &keytest_transport::HidDeviceInfo,
) -> Result<HidCtapConnection<keytest_transport::UsbPort>> {
    Ok(HidCtapConnection::new(keytest_transport::open_channel(api, info)?))
}

//! YubiKey identity: firmware, form factor, FIPS and serial number

use crate::ctap::CtapConnection;
use crate::error::{Error, Result};

use keytest_transport::{Apdu, ApduPort, HidDeviceInfo, SmartCardChannel};

use std::fmt;
use std::str::FromStr;

/// Firmware version, ordered major, minor, patch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }
}

impl From<(u8, u8, u8)> for FirmwareVersion {
    fn from((major, minor, patch): (u8, u8, u8)) -> Self {
        Self::new(major, minor, patch)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    /// Accepts "5", "5.4" or "5.4.3"
    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u8>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("bad firmware version {:?}: {}", s, e)))?;
        match parts[..] {
            [major] => Ok(Self::new(major, 0, 0)),
            [major, minor] => Ok(Self::new(major, minor, 0)),
            [major, minor, patch] => Ok(Self::new(major, minor, patch)),
            _ => Err(Error::Config(format!("bad firmware version {:?}", s))),
        }
    }
}

/// Physical form of a YubiKey
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FormFactor {
    #[default]
    Unknown,
    UsbAKeychain,
    UsbANano,
    UsbCKeychain,
    UsbCNano,
    UsbCLightning,
    UsbABiometricKeychain,
    UsbCBiometricKeychain,
}

impl FormFactor {
    /// From the low nibble of the form-factor byte
    pub fn from_u8(value: u8) -> Self {
        match value & FORM_FACTOR_MASK {
            0x01 => Self::UsbAKeychain,
            0x02 => Self::UsbANano,
            0x03 => Self::UsbCKeychain,
            0x04 => Self::UsbCNano,
            0x05 => Self::UsbCLightning,
            0x06 => Self::UsbABiometricKeychain,
            0x07 => Self::UsbCBiometricKeychain,
            _ => Self::Unknown,
        }
    }

    pub fn is_biometric(self) -> bool {
        matches!(self, Self::UsbABiometricKeychain | Self::UsbCBiometricKeychain)
    }
}

/// Management application, present on every YubiKey's CCID interface
pub const MANAGEMENT_AID: [u8; 8] = [0xA0, 0x00, 0x00, 0x05, 0x27, 0x47, 0x11, 0x17];

const INS_READ_CONFIG: u8 = 0x1D;

const FORM_FACTOR_MASK: u8 = 0x0F;
const FORM_FACTOR_SKY: u8 = 0x40;
const FORM_FACTOR_FIPS: u8 = 0x80;

mod tags {
    pub const SERIAL: u8 = 0x02;
    pub const FORM_FACTOR: u8 = 0x04;
    pub const VERSION: u8 = 0x05;
    pub const FIPS_CAPABLE: u8 = 0x14;
}

/// What the harness knows about one key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: Option<u32>,
    pub firmware: FirmwareVersion,
    pub form_factor: FormFactor,
    pub is_fips: bool,
    /// Security Key series (no serial, FIDO only)
    pub is_sky: bool,
}

impl DeviceInfo {
    /// Decode the device-info page: a length byte followed by tag/length/value entries
    pub fn parse(response: &[u8]) -> Result<Self> {
        let (&len, mut rest) = response
            .split_first()
            .ok_or_else(|| Error::InvalidResponse("empty device info".to_string()))?;
        if rest.len() < len as usize {
            return Err(Error::InvalidResponse(format!(
                "device info truncated: {} of {} bytes",
                rest.len(),
                len
            )));
        }
        rest = &rest[..len as usize];

        let mut info = Self::default();
        while let [tag, value_len, tail @ ..] = rest {
            let value_len = *value_len as usize;
            if tail.len() < value_len {
                return Err(Error::InvalidResponse(format!(
                    "device info tag 0x{:02x} truncated",
                    tag
                )));
            }
            let (value, next) = tail.split_at(value_len);
            match (*tag, value) {
                (tags::SERIAL, [a, b, c, d]) => {
                    info.serial = Some(u32::from_be_bytes([*a, *b, *c, *d]))
                }
                (tags::FORM_FACTOR, [ff, ..]) => {
                    info.form_factor = FormFactor::from_u8(*ff);
                    info.is_fips |= ff & FORM_FACTOR_FIPS != 0;
                    info.is_sky = ff & FORM_FACTOR_SKY != 0;
                }
                (tags::VERSION, [major, minor, patch]) => {
                    info.firmware = FirmwareVersion::new(*major, *minor, *patch)
                }
                (tags::FIPS_CAPABLE, bits) => info.is_fips |= bits.iter().any(|b| *b != 0),
                _ => {}
            }
            rest = next;
        }
        if !rest.is_empty() {
            return Err(Error::InvalidResponse("trailing byte in device info".to_string()));
        }
        Ok(info)
    }

    /// Query a connected key
    ///
    /// Keys that do not answer the vendor config command report only the
    /// firmware version from the CTAPHID handshake.
    pub fn read<C: CtapConnection + ?Sized>(conn: &mut C) -> Result<Self> {
        match conn.read_config().and_then(|raw| Self::parse(&raw)) {
            Ok(info) => Ok(info),
            Err(e) => {
                let version = conn.device_version().ok_or(e)?;
                log::debug!("device info unavailable, using handshake version {:?}", version);
                Ok(Self {
                    firmware: version.into(),
                    ..Self::default()
                })
            }
        }
    }

    /// Query a key through its smart-card interface
    ///
    /// Selects the management application and reads the same device-info
    /// page the HID path returns. Older keys without READ CONFIG report the
    /// firmware version embedded in the selection response.
    pub fn read_smart_card<P: ApduPort>(channel: &mut SmartCardChannel<P>) -> Result<Self> {
        let selected = channel.select(&MANAGEMENT_AID)?;
        let read_config = Apdu::new(0x00, INS_READ_CONFIG, 0x00, 0x00).with_le(0x100);
        match channel.transmit(&read_config)?.into_data() {
            Ok(raw) => Self::parse(&raw),
            Err(e) => {
                let firmware = version_in_text(&selected).ok_or(e)?;
                log::debug!("device info unavailable, management applet reports {}", firmware);
                Ok(Self {
                    firmware,
                    ..Self::default()
                })
            }
        }
    }

    pub fn is_biometric(&self) -> bool {
        self.form_factor.is_biometric()
    }
}

/// First dotted `major.minor.patch` in an ASCII banner
fn version_in_text(banner: &[u8]) -> Option<FirmwareVersion> {
    let text = std::str::from_utf8(banner).ok()?;
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|word| word.matches('.').count() == 2)
        .find_map(|word| word.parse().ok())
}

/// An attached key eligible for tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDevice {
    pub hid: HidDeviceInfo,
    pub info: DeviceInfo,
}

impl TestDevice {
    pub fn new(hid: HidDeviceInfo, mut info: DeviceInfo) -> Self {
        if info.serial.is_none() {
            info.serial = hid.serial_number.as_deref().and_then(|s| s.trim().parse().ok());
        }
        Self { hid, info }
    }

    pub fn serial(&self) -> Option<u32> {
        self.info.serial
    }

    pub fn firmware(&self) -> FirmwareVersion {
        self.info.firmware
    }

    /// Whether `other` is the same physical key
    ///
    /// Serials decide when either side has one. Keys without a serial can
    /// only be told apart by firmware and form factor.
    pub fn is_same_key(&self, other: &TestDevice) -> bool {
        match (self.serial(), other.serial()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                self.info.firmware == other.info.firmware
                    && self.info.form_factor == other.info.form_factor
            }
            _ => false,
        }
    }
}

impl fmt::Display for TestDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.info.serial {
            Some(serial) => write!(
                f,
                "{} (serial {}, fw {})",
                self.hid.product_name(),
                serial,
                self.info.firmware
            ),
            None => write!(f, "{} (fw {})", self.hid.product_name(), self.info.firmware),
        }
    }
}

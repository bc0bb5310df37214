//! Picking the device a test needs
//!
//! Tests declare what kind of key they run against; when no attached,
//! non-blocked key qualifies the test fails immediately with
//! [`Error::DeviceNotFound`] rather than being skipped.

use crate::device::{FirmwareVersion, TestDevice};
use crate::enumeration::{DeviceEnumerator, TestDeviceEnumeration};
use crate::error::{Error, Result};

use std::fmt;
use std::str::FromStr;

/// Device classes tests are written against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardTestDevice {
    Fw3,
    Fw4Fips,
    /// 5.x, neither FIPS nor biometric
    Fw5,
    Fw5Fips,
    Fw5Bio,
    Any,
}

impl StandardTestDevice {
    pub fn matches(self, device: &TestDevice) -> bool {
        let info = &device.info;
        let major = info.firmware.major;
        match self {
            Self::Fw3 => major == 3,
            Self::Fw4Fips => major == 4 && info.is_fips,
            Self::Fw5 => major == 5 && !info.is_fips && !info.is_biometric(),
            Self::Fw5Fips => major == 5 && info.is_fips,
            Self::Fw5Bio => major == 5 && info.is_biometric(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for StandardTestDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fw3 => "Fw3",
            Self::Fw4Fips => "Fw4Fips",
            Self::Fw5 => "Fw5",
            Self::Fw5Fips => "Fw5Fips",
            Self::Fw5Bio => "Fw5Bio",
            Self::Any => "Any",
        };
        f.write_str(name)
    }
}

impl FromStr for StandardTestDevice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fw3" => Ok(Self::Fw3),
            "fw4fips" => Ok(Self::Fw4Fips),
            "fw5" => Ok(Self::Fw5),
            "fw5fips" => Ok(Self::Fw5Fips),
            "fw5bio" => Ok(Self::Fw5Bio),
            "any" => Ok(Self::Any),
            _ => Err(Error::Config(format!("unknown test device class {:?}", s))),
        }
    }
}

/// First device of the requested class
pub fn select_required_test_device(
    devices: &[TestDevice],
    wanted: StandardTestDevice,
) -> Result<TestDevice> {
    devices
        .iter()
        .find(|d| wanted.matches(d))
        .cloned()
        .inspect(|d| log::info!("selected {} for {}", d, wanted))
        .ok_or_else(|| {
            Error::DeviceNotFound(format!(
                "no {} device among {} attached test device(s)",
                wanted,
                devices.len()
            ))
        })
}

pub fn select_by_serial(devices: &[TestDevice], serial: u32) -> Result<TestDevice> {
    devices
        .iter()
        .find(|d| d.serial() == Some(serial))
        .cloned()
        .ok_or_else(|| Error::DeviceNotFound(format!("no test device with serial {}", serial)))
}

/// First device of the requested class at or above `minimum`
pub fn select_min_firmware(
    devices: &[TestDevice],
    wanted: StandardTestDevice,
    minimum: FirmwareVersion,
) -> Result<TestDevice> {
    devices
        .iter()
        .find(|d| wanted.matches(d) && d.firmware() >= minimum)
        .cloned()
        .ok_or_else(|| {
            Error::DeviceNotFound(format!("no {} device with firmware >= {}", wanted, minimum))
        })
}

impl<E: DeviceEnumerator> TestDeviceEnumeration<E> {
    /// Enumerate and select in one step
    pub fn select(&mut self, wanted: StandardTestDevice) -> Result<TestDevice> {
        select_required_test_device(&self.test_devices()?, wanted)
    }
}

//! USB HID access to FIDO authenticators
//!
//! [`HidDeviceInfo`] is always available so device events and selection can be
//! exercised without hardware. Opening devices needs the `usb` feature.

#[cfg(feature = "usb")]
use crate::channel::{HidChannel, HidPort};
#[cfg(feature = "usb")]
use crate::ctaphid::{PACKET_SIZE, Packet};
#[cfg(feature = "usb")]
use crate::error::{Error, Result};

#[cfg(feature = "usb")]
use std::ffi::CString;
#[cfg(feature = "usb")]
use std::time::Duration;

#[cfg(feature = "usb")]
use hidapi::{HidApi, HidDevice};

/// FIDO alliance HID usage page
pub const FIDO_USAGE_PAGE: u16 = 0xF1D0;

/// CTAPHID usage within the FIDO page
pub const FIDO_USAGE: u16 = 0x01;

pub const YUBICO_VENDOR_ID: u16 = 0x1050;

/// Descriptor of an attached FIDO HID interface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HidDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Platform-specific path, stable while the device stays plugged in
    pub path: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// USB iSerial string, often absent on security keys
    pub serial_number: Option<String>,
}

impl HidDeviceInfo {
    pub fn is_yubico(&self) -> bool {
        self.vendor_id == YUBICO_VENDOR_ID
    }

    pub fn product_name(&self) -> &str {
        self.product.as_deref().unwrap_or("unknown HID device")
    }
}

/// Initialize hidapi
#[cfg(feature = "usb")]
pub fn init_usb() -> Result<HidApi> {
    HidApi::new().map_err(|e| Error::IoError(format!("Failed to initialize HID API: {}", e)))
}

/// List attached FIDO interfaces, refreshing hidapi's device list first
#[cfg(feature = "usb")]
pub fn enumerate_fido_devices(api: &mut HidApi) -> Result<Vec<HidDeviceInfo>> {
    api.refresh_devices()
        .map_err(|e| Error::IoError(format!("Failed to refresh device list: {}", e)))?;

    Ok(api
        .device_list()
        .filter(|d| d.usage_page() == FIDO_USAGE_PAGE && d.usage() == FIDO_USAGE)
        .map(|d| HidDeviceInfo {
            vendor_id: d.vendor_id(),
            product_id: d.product_id(),
            path: d.path().to_string_lossy().to_string(),
            manufacturer: d.manufacturer_string().map(str::to_string),
            product: d.product_string().map(str::to_string),
            serial_number: d.serial_number().map(str::to_string).filter(|s| !s.is_empty()),
        })
        .collect())
}

/// An opened hidapi device
#[cfg(feature = "usb")]
pub struct UsbPort {
    device: HidDevice,
}

#[cfg(feature = "usb")]
impl UsbPort {
    pub fn open(api: &HidApi, info: &HidDeviceInfo) -> Result<Self> {
        let c_path = CString::new(info.path.as_str())
            .map_err(|e| Error::IoError(format!("Invalid device path: {}", e)))?;
        let device = api
            .open_path(&c_path)
            .map_err(|e| Error::IoError(format!("Failed to open {}: {}", info.path, e)))?;
        Ok(Self { device })
    }
}

#[cfg(feature = "usb")]
impl HidPort for UsbPort {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        // report ID 0 prefix
        let mut report = [0u8; PACKET_SIZE + 1];
        report[1..].copy_from_slice(packet.as_bytes());
        let written = self
            .device
            .write(&report)
            .map_err(|e| Error::IoError(format!("Failed to write packet: {}", e)))?;
        if written < PACKET_SIZE {
            return Err(Error::IoError(format!(
                "Incomplete write: {} of {} bytes",
                written,
                report.len()
            )));
        }
        Ok(())
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        let mut buf = [0u8; PACKET_SIZE];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let read = self
            .device
            .read_timeout(&mut buf, timeout_ms)
            .map_err(|e| Error::IoError(format!("Failed to read packet: {}", e)))?;
        match read {
            0 => Ok(None),
            PACKET_SIZE => Ok(Some(Packet::from_bytes(buf))),
            n => Err(Error::IoError(format!(
                "Incomplete read: {} bytes (expected {})",
                n, PACKET_SIZE
            ))),
        }
    }
}

/// Open `info` and allocate a CTAPHID channel on it
#[cfg(feature = "usb")]
pub fn open_channel(api: &HidApi, info: &HidDeviceInfo) -> Result<HidChannel<UsbPort>> {
    let mut channel = HidChannel::new(UsbPort::open(api, info)?);
    channel.init()?;
    Ok(channel)
}

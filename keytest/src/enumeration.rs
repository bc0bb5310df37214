//! Attached test devices minus the ones on the local block list
//!
//! The block list protects keys a developer uses for real accounts: any key
//! whose serial number appears there is never handed to a test, so a reset
//! test cannot wipe it.

use crate::config::TestConfig;
use crate::device::{DeviceInfo, TestDevice};
use crate::error::{Error, Result};

use keytest_transport::{ApduPort, SmartCardChannel, SmartCardReader};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const BLOCK_LIST_HEADER: &str = "\
# Serial numbers of keys that integration tests must never touch.
# One decimal serial per line; lines starting with # are ignored.
";

/// Serial numbers excluded from testing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockList {
    serials: BTreeSet<u32>,
    path: Option<PathBuf>,
}

impl BlockList {
    pub fn empty() -> Self {
        Self::default()
    }

    /// One decimal serial per line
    ///
    /// Blank lines and `#` comments are ignored; anything else that is not a
    /// serial is logged and skipped.
    pub fn parse(content: &str) -> Self {
        let mut serials = BTreeSet::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<u32>() {
                Ok(serial) => {
                    serials.insert(serial);
                }
                Err(e) => log::warn!("block list line {}: skipping {:?}: {}", lineno + 1, line, e),
            }
        }
        Self { serials, path: None }
    }

    /// Read the block list at `path`, creating an empty one if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            std::fs::write(path, BLOCK_LIST_HEADER).map_err(|e| Error::io(path, e))?;
            log::info!("created empty block list at {}", path.display());
            return Ok(Self {
                serials: BTreeSet::new(),
                path: Some(path.to_path_buf()),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut list = Self::parse(&content);
        list.path = Some(path.to_path_buf());
        log::debug!("{} blocked serial(s) from {}", list.len(), path.display());
        Ok(list)
    }

    /// File this list was read from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, serial: u32) -> bool {
        self.serials.contains(&serial)
    }

    /// Devices without a serial are never blocked
    pub fn is_blocked(&self, device: &TestDevice) -> bool {
        device.serial().is_some_and(|s| self.contains(s))
    }

    pub fn serials(&self) -> impl Iterator<Item = u32> + '_ {
        self.serials.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.serials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }
}

impl FromIterator<u32> for BlockList {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            serials: iter.into_iter().collect(),
            path: None,
        }
    }
}

/// Source of attached devices
pub trait DeviceEnumerator {
    fn enumerate(&mut self) -> Result<Vec<TestDevice>>;
}

impl<F> DeviceEnumerator for F
where
    F: FnMut() -> Result<Vec<TestDevice>>,
{
    fn enumerate(&mut self) -> Result<Vec<TestDevice>> {
        self()
    }
}

/// Enumerates FIDO HID interfaces and identifies each key
#[cfg(feature = "usb")]
pub struct HidDeviceEnumerator {
    api: keytest_transport::hidapi::HidApi,
}

#[cfg(feature = "usb")]
impl HidDeviceEnumerator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            api: keytest_transport::init_usb()?,
        })
    }

    pub fn api(&self) -> &keytest_transport::hidapi::HidApi {
        &self.api
    }

    fn identify(
        &self,
        hid: &keytest_transport::HidDeviceInfo,
    ) -> Result<crate::device::DeviceInfo> {
        let mut conn = crate::ctap::open_hid(&self.api, hid)?;
        crate::device::DeviceInfo::read(&mut conn)
    }
}

#[cfg(feature = "usb")]
impl DeviceEnumerator for HidDeviceEnumerator {
    fn enumerate(&mut self) -> Result<Vec<TestDevice>> {
        let interfaces = keytest_transport::enumerate_fido_devices(&mut self.api)?;
        let mut devices = Vec::with_capacity(interfaces.len());
        for hid in interfaces {
            match self.identify(&hid) {
                Ok(info) => devices.push(TestDevice::new(hid, info)),
                Err(e) => log::warn!("skipping {}: {}", hid.path, e),
            }
        }
        Ok(devices)
    }
}

/// A key reached through its smart-card interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartCardTestDevice {
    pub reader: SmartCardReader,
    pub info: DeviceInfo,
}

/// Identify the YubiKeys in `readers`, leaving out blocked ones
///
/// Empty readers and readers of other vendors are skipped. A key that cannot
/// be identified is logged and skipped.
pub fn identify_smart_cards<P, F>(
    readers: &[SmartCardReader],
    block_list: &BlockList,
    mut connect: F,
) -> Vec<SmartCardTestDevice>
where
    P: ApduPort,
    F: FnMut(&SmartCardReader) -> Result<P>,
{
    let mut devices = Vec::new();
    for reader in readers.iter().filter(|r| r.has_card() && r.is_yubikey()) {
        let info = connect(reader)
            .and_then(|port| DeviceInfo::read_smart_card(&mut SmartCardChannel::new(port)));
        match info {
            Ok(info) if info.serial.is_some_and(|s| block_list.contains(s)) => {
                log::info!("ignoring blocked key in {}", reader.name);
            }
            Ok(info) => devices.push(SmartCardTestDevice {
                reader: reader.clone(),
                info,
            }),
            Err(e) => log::warn!("skipping reader {}: {}", reader.name, e),
        }
    }
    devices
}

/// Attached devices that tests are allowed to use
pub struct TestDeviceEnumeration<E> {
    enumerator: E,
    block_list: BlockList,
}

impl<E: DeviceEnumerator> TestDeviceEnumeration<E> {
    pub fn new(enumerator: E, block_list: BlockList) -> Self {
        Self {
            enumerator,
            block_list,
        }
    }

    /// Load the block list named by `config`
    pub fn from_config(enumerator: E, config: &TestConfig) -> Result<Self> {
        let block_list = BlockList::load(&config.block_list_path()?)?;
        Ok(Self::new(enumerator, block_list))
    }

    pub fn block_list(&self) -> &BlockList {
        &self.block_list
    }

    /// YubiKeys in PC/SC readers not on the block list
    #[cfg(feature = "pcsc")]
    pub fn smart_card_devices(
        &self,
        context: &keytest_transport::pcsc::Context,
    ) -> Result<Vec<SmartCardTestDevice>> {
        let readers = keytest_transport::list_readers(context)?;
        Ok(identify_smart_cards(&readers, &self.block_list, |reader| {
            Ok(keytest_transport::PcscPort::connect(context, &reader.name)?)
        }))
    }

    /// Attached devices not on the block list
    pub fn test_devices(&mut self) -> Result<Vec<TestDevice>> {
        let all = self.enumerator.enumerate()?;
        let total = all.len();
        let allowed: Vec<TestDevice> = all
            .into_iter()
            .filter(|device| {
                let blocked = self.block_list.is_blocked(device);
                if blocked {
                    log::info!("ignoring blocked device {}", device);
                }
                !blocked
            })
            .collect();
        log::debug!("{} of {} attached device(s) available for tests", allowed.len(), total);
        Ok(allowed)
    }
}

#[cfg(feature = "usb")]
impl TestDeviceEnumeration<HidDeviceEnumerator> {
    /// USB enumeration with the block list from the environment's configuration
    pub fn usb() -> Result<Self> {
        Self::from_config(HidDeviceEnumerator::new()?, &TestConfig::from_env()?)
    }
}

//! Host-side CTAP transport for security-key tests
//!
//! - CTAPHID framing and the INIT handshake
//! - Transactions over any [`HidPort`], with keepalive handling
//! - USB HID ports via hidapi (`usb` feature)
//! - ISO 7816 APDU exchange over PC/SC readers (`pcsc` feature)
//! - Device arrival/removal events from a polling [`DeviceWatcher`]
//!
//! # Features
//!
//! - `usb`: open real devices through hidapi (requires libudev on Linux)
//! - `pcsc`: list readers, open cards and watch insertion through PC/SC
//!
//! CTAP 2.2: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#usb>

pub mod channel;
pub mod ctaphid;
pub mod error;
pub mod hid;
pub mod smartcard;
pub mod watcher;

pub use channel::{DEFAULT_TIMEOUT, HidChannel, HidPort};
pub use ctaphid::{Cmd, InitResponse, KeepaliveStatus, Message, Packet};
pub use error::{Error, Result};
pub use hid::HidDeviceInfo;
#[cfg(feature = "usb")]
pub use hidapi;
#[cfg(feature = "usb")]
pub use hid::{UsbPort, enumerate_fido_devices, init_usb, open_channel};
pub use smartcard::{
    Apdu, ApduPort, ApduResponse, ReaderEvent, SmartCardChannel, SmartCardReader, diff_readers,
};
#[cfg(feature = "pcsc")]
pub use smartcard::{PcscPort, ReaderWatcher, establish_context, list_readers};
#[cfg(feature = "pcsc")]
pub use pcsc;
pub use watcher::{DeviceEvent, DeviceEvents, DeviceWatcher, EventCallback, ListenerId, Listeners};

//! Transport errors

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Report shorter than a packet header or with a bad length field
    InvalidPacket,

    /// Packet for a channel other than ours
    InvalidChannel,

    /// Continuation packets out of order
    InvalidSequence,

    /// Payload above the 7609-byte CTAPHID limit
    MessageTooLarge,

    /// Message ended before its declared length was reassembled
    FragmentationError,

    /// Device answered with a command other than the one sent
    UnexpectedCommand(u8),

    /// CTAPHID_ERROR packet from the device
    Device(u8),

    Timeout,

    IoError(String),

    /// Card answered with a status word other than 0x9000
    Status(u16),

    /// PC/SC service or reader failure
    SmartCard(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPacket => write!(f, "malformed CTAPHID packet"),
            Error::InvalidChannel => write!(f, "packet for a foreign channel"),
            Error::InvalidSequence => write!(f, "continuation packet out of sequence"),
            Error::MessageTooLarge => write!(f, "message exceeds CTAPHID maximum"),
            Error::FragmentationError => write!(f, "incomplete CTAPHID message"),
            Error::UnexpectedCommand(cmd) => write!(f, "unexpected response command 0x{:02x}", cmd),
            Error::Device(code) => write!(f, "CTAPHID error 0x{:02x}", code),
            Error::Timeout => write!(f, "timed out waiting for the device"),
            Error::IoError(msg) => write!(f, "HID I/O error: {}", msg),
            Error::Status(sw) => write!(f, "card status word 0x{:04x}", sw),
            Error::SmartCard(msg) => write!(f, "PC/SC error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

//! CTAPHID framing, host side
//!
//! Packet format:
//! - Initialization packet: CID(4) + CMD(1) + BCNT(2) + DATA(57)
//! - Continuation packet: CID(4) + SEQ(1) + DATA(59)
//!
//! CTAP 2.2: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#usb-hid-framing>

use crate::error::{Error, Result};

/// HID report size for FIDO authenticators
pub const PACKET_SIZE: usize = 64;

/// 57 + 128 * 59
pub const MAX_MESSAGE_SIZE: usize = 7609;

/// Channel used to allocate a real channel with INIT
pub const BROADCAST_CID: u32 = 0xFFFFFFFF;

const INIT_PACKET_DATA_SIZE: usize = 57;
const CONT_PACKET_DATA_SIZE: usize = 59;

/// CTAPHID commands, without the TYPE_INIT bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    Ping = 0x01,
    /// Encapsulated CTAP1/U2F APDU
    Msg = 0x03,
    Lock = 0x04,
    Init = 0x06,
    Wink = 0x08,
    /// Encapsulated CTAP2 request: command byte followed by CBOR
    Cbor = 0x10,
    Cancel = 0x11,
    Keepalive = 0x3B,
    Error = 0x3F,
    /// YubiKey vendor command returning the device-info TLVs (wire value 0xC2)
    ReadConfig = 0x42,
}

impl Cmd {
    /// Parse a command byte, ignoring the TYPE_INIT bit
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & 0x7F {
            0x01 => Some(Cmd::Ping),
            0x03 => Some(Cmd::Msg),
            0x04 => Some(Cmd::Lock),
            0x06 => Some(Cmd::Init),
            0x08 => Some(Cmd::Wink),
            0x10 => Some(Cmd::Cbor),
            0x11 => Some(Cmd::Cancel),
            0x3B => Some(Cmd::Keepalive),
            0x3F => Some(Cmd::Error),
            0x42 => Some(Cmd::ReadConfig),
            _ => None,
        }
    }

    /// Command byte as it appears in an initialization packet
    pub fn to_u8_init(self) -> u8 {
        (self as u8) | 0x80
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Status carried by a KEEPALIVE packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveStatus {
    Processing,
    /// Waiting for the user to touch the key
    UpNeeded,
    Unknown(u8),
}

impl From<u8> for KeepaliveStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Processing,
            2 => Self::UpNeeded,
            other => Self::Unknown(other),
        }
    }
}

/// CTAPHID capability flags from the INIT response
pub mod capability {
    pub const WINK: u8 = 0x01;
    pub const CBOR: u8 = 0x04;
    /// Device does not implement CTAPHID_MSG
    pub const NMSG: u8 = 0x08;
}

/// Parsed INIT response
///
/// Layout: nonce(8) CID(4) protocol(1) major(1) minor(1) build(1) capabilities(1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitResponse {
    pub nonce: [u8; 8],
    pub cid: u32,
    pub protocol_version: u8,
    pub device_version: (u8, u8, u8),
    pub capabilities: u8,
}

impl InitResponse {
    pub const LEN: usize = 17;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LEN {
            return Err(Error::InvalidPacket);
        }
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&data[..8]);
        Ok(Self {
            nonce,
            cid: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            protocol_version: data[12],
            device_version: (data[13], data[14], data[15]),
            capabilities: data[16],
        })
    }

    pub fn supports_cbor(&self) -> bool {
        self.capabilities & capability::CBOR != 0
    }

    pub fn supports_wink(&self) -> bool {
        self.capabilities & capability::WINK != 0
    }
}

/// A single 64-byte HID report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: [u8; PACKET_SIZE],
}

impl Packet {
    pub fn from_bytes(data: [u8; PACKET_SIZE]) -> Self {
        Self { data }
    }

    /// Build a packet from a slice of exactly 64 bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let data: [u8; PACKET_SIZE] = data.try_into().map_err(|_| Error::InvalidPacket)?;
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    pub fn cid(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    pub fn is_init(&self) -> bool {
        (self.data[4] & 0x80) != 0
    }

    /// Command of an initialization packet
    pub fn cmd(&self) -> Option<Cmd> {
        if !self.is_init() {
            return None;
        }
        Cmd::from_u8(self.data[4])
    }

    /// Raw command byte of an initialization packet, TYPE_INIT bit included
    pub fn raw_cmd(&self) -> u8 {
        self.data[4]
    }

    /// Total message length announced by an initialization packet
    pub fn payload_len(&self) -> Option<u16> {
        if !self.is_init() {
            return None;
        }
        Some(u16::from_be_bytes([self.data[5], self.data[6]]))
    }

    /// Sequence number of a continuation packet
    pub fn seq(&self) -> Option<u8> {
        if self.is_init() {
            return None;
        }
        Some(self.data[4])
    }

    pub fn payload(&self) -> &[u8] {
        if self.is_init() {
            &self.data[7..]
        } else {
            &self.data[5..]
        }
    }
}

/// A complete CTAPHID message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u32,
    pub cmd: Cmd,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(cid: u32, cmd: Cmd, data: Vec<u8>) -> Self {
        Self { cid, cmd, data }
    }

    /// Fragment into one initialization packet and up to 128 continuations
    ///
    /// # Arguments
    ///
    /// * `self` - Message whose `data` is at most 7609 bytes
    ///
    /// # Returns
    ///
    /// The initialization packet carrying the total length and the first 57
    /// bytes, then continuation packets of 59 bytes each, zero-padded
    ///
    /// # Examples
    ///
    /// ```
    /// use keytest_transport::{Cmd, Message};
    ///
    /// let message = Message::new(0x01020304, Cmd::Cbor, vec![0xAB; 100]);
    /// let packets = message.to_packets().unwrap();
    ///
    /// assert_eq!(packets.len(), 2);
    /// assert_eq!(packets[0].payload_len(), Some(100));
    /// assert_eq!(packets[1].seq(), Some(0));
    /// assert_eq!(Message::from_packets(&packets).unwrap(), message);
    /// ```
    pub fn to_packets(&self) -> Result<Vec<Packet>> {
        if self.data.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let cid = self.cid.to_be_bytes();
        let mut packets = Vec::with_capacity(1 + self.data.len() / CONT_PACKET_DATA_SIZE);

        let mut init = [0u8; PACKET_SIZE];
        init[0..4].copy_from_slice(&cid);
        init[4] = self.cmd.to_u8_init();
        init[5..7].copy_from_slice(&(self.data.len() as u16).to_be_bytes());
        let head = self.data.len().min(INIT_PACKET_DATA_SIZE);
        init[7..7 + head].copy_from_slice(&self.data[..head]);
        packets.push(Packet::from_bytes(init));

        for (seq, chunk) in self.data[head..].chunks(CONT_PACKET_DATA_SIZE).enumerate() {
            let mut cont = [0u8; PACKET_SIZE];
            cont[0..4].copy_from_slice(&cid);
            cont[4] = seq as u8;
            cont[5..5 + chunk.len()].copy_from_slice(chunk);
            packets.push(Packet::from_bytes(cont));
        }

        Ok(packets)
    }

    /// Reassemble a message from an initialization packet and its continuations
    pub fn from_packets(packets: &[Packet]) -> Result<Self> {
        let (init, rest) = packets.split_first().ok_or(Error::InvalidPacket)?;
        if !init.is_init() {
            return Err(Error::InvalidPacket);
        }

        let cid = init.cid();
        let cmd = init.cmd().ok_or(Error::UnexpectedCommand(init.raw_cmd()))?;
        let total_len = init.payload_len().ok_or(Error::InvalidPacket)? as usize;
        if total_len > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let mut data = Vec::with_capacity(total_len);
        let head = total_len.min(INIT_PACKET_DATA_SIZE);
        data.extend_from_slice(&init.payload()[..head]);

        for (expected_seq, packet) in rest.iter().enumerate() {
            if data.len() == total_len {
                break;
            }
            if packet.cid() != cid {
                return Err(Error::InvalidChannel);
            }
            if packet.seq() != Some(expected_seq as u8) {
                return Err(Error::InvalidSequence);
            }
            let take = (total_len - data.len()).min(CONT_PACKET_DATA_SIZE);
            data.extend_from_slice(&packet.payload()[..take]);
        }

        if data.len() != total_len {
            return Err(Error::FragmentationError);
        }

        Ok(Message { cid, cmd, data })
    }

    /// Number of payload bytes still missing after `packets`
    pub(crate) fn missing_bytes(packets: &[Packet]) -> Option<usize> {
        let total = packets.first()?.payload_len()? as usize;
        let head = total.min(INIT_PACKET_DATA_SIZE);
        let received = head + (packets.len() - 1) * CONT_PACKET_DATA_SIZE;
        Some(total.saturating_sub(received))
    }
}

//! CTAPHID transactions over a packet port
//!
//! [`HidChannel`] owns one allocated channel on one device. It sends a request
//! message, then collects response packets for that channel until the message
//! is complete, skipping KEEPALIVE packets while the authenticator waits for
//! the user.

use crate::ctaphid::{BROADCAST_CID, Cmd, InitResponse, KeepaliveStatus, Message, Packet};
use crate::error::{Error, Result};

use std::time::{Duration, Instant};

use smallvec::SmallVec;

/// Raw 64-byte report I/O with a device
pub trait HidPort {
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Read one report, `Ok(None)` when `timeout` elapses first
    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>>;
}

impl<P: HidPort + ?Sized> HidPort for Box<P> {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        (**self).write_packet(packet)
    }

    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        (**self).read_packet(timeout)
    }
}

/// Default bound on a single transaction
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A CTAPHID channel on one device
pub struct HidChannel<P> {
    port: P,
    init: Option<InitResponse>,
}

impl<P: HidPort> HidChannel<P> {
    pub fn new(port: P) -> Self {
        Self { port, init: None }
    }

    /// INIT response of the current channel, if one has been allocated
    pub fn init_response(&self) -> Option<&InitResponse> {
        self.init.as_ref()
    }

    /// Allocate a channel on the broadcast CID
    ///
    /// Other hosts may be allocating channels at the same time, so INIT
    /// replies carrying someone else's nonce are skipped until ours arrives.
    pub fn init(&mut self) -> Result<&InitResponse> {
        let nonce: [u8; 8] = rand::random();
        self.send(BROADCAST_CID, Cmd::Init, &nonce)?;

        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        let init = loop {
            let reply = self.receive(BROADCAST_CID, Cmd::Init, deadline)?;
            let init = InitResponse::parse(&reply)?;
            if init.nonce == nonce {
                break init;
            }
            log::debug!("skipping INIT reply for nonce {}", hex_nonce(&init.nonce));
        };

        log::debug!(
            "allocated CTAPHID channel {:08x}, device version {}.{}.{}",
            init.cid,
            init.device_version.0,
            init.device_version.1,
            init.device_version.2
        );
        Ok(self.init.insert(init))
    }

    fn cid(&mut self) -> Result<u32> {
        if let Some(init) = &self.init {
            return Ok(init.cid);
        }
        Ok(self.init()?.cid)
    }

    /// Send a request and wait for its response
    ///
    /// Allocates a channel first if none is open yet.
    ///
    /// # Arguments
    ///
    /// * `cmd` - CTAPHID command, `Cmd::Cbor` for CTAP2 requests
    /// * `payload` - Request body, fragmented into packets as needed
    /// * `timeout` - Bound on the whole exchange, keepalives included
    ///
    /// # Returns
    ///
    /// The reassembled response payload, `Error::Device` for a CTAPHID_ERROR
    /// packet, or `Error::Timeout` when the deadline passes
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut channel = HidChannel::new(port);
    /// let reply = channel.transact(Cmd::Cbor, &[0x04], DEFAULT_TIMEOUT)?;
    /// assert_eq!(reply[0], 0x00);
    /// ```
    pub fn transact(&mut self, cmd: Cmd, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let cid = self.cid()?;
        self.send(cid, cmd, payload)?;
        self.receive(cid, cmd, Instant::now() + timeout)
    }

    fn send(&mut self, cid: u32, cmd: Cmd, payload: &[u8]) -> Result<()> {
        for packet in Message::new(cid, cmd, payload.to_vec()).to_packets()? {
            self.port.write_packet(&packet)?;
        }
        Ok(())
    }

    /// Collect one `cmd` response on `cid`
    fn receive(&mut self, cid: u32, cmd: Cmd, deadline: Instant) -> Result<Vec<u8>> {
        let mut packets: SmallVec<[Packet; 4]> = SmallVec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let Some(packet) = self.port.read_packet(remaining)? else {
                continue;
            };
            if packet.cid() != cid {
                continue;
            }

            if packet.is_init() {
                match packet.cmd() {
                    Some(Cmd::Keepalive) => {
                        let status = KeepaliveStatus::from(packet.payload()[0]);
                        log::trace!("keepalive on {:08x}: {:?}", cid, status);
                        continue;
                    }
                    Some(Cmd::Error) => return Err(Error::Device(packet.payload()[0])),
                    Some(reply) if reply == cmd => {
                        packets.clear();
                        packets.push(packet);
                    }
                    _ => return Err(Error::UnexpectedCommand(packet.raw_cmd())),
                }
            } else if packets.is_empty() {
                continue;
            } else {
                packets.push(packet);
            }

            if Message::missing_bytes(&packets) == Some(0) {
                return Ok(Message::from_packets(&packets)?.data);
            }
        }
    }

    pub fn into_port(self) -> P {
        self.port
    }
}

fn hex_nonce(nonce: &[u8; 8]) -> String {
    nonce.iter().map(|b| format!("{:02x}", b)).collect()
}

//! ISO 7816 APDUs over PC/SC smart-card readers
//!
//! [`SmartCardChannel`] sends command APDUs through any [`ApduPort`] and
//! follows `61xx` GET RESPONSE chaining, so callers see one complete
//! response. With the `pcsc` feature, [`PcscPort`] opens the card in a reader
//! and [`ReaderWatcher`] reports card insertion and removal from PC/SC status
//! changes.

use crate::error::{Error, Result};

pub const SW_SUCCESS: u16 = 0x9000;

/// Largest command body an extended-length APDU can carry
pub const MAX_APDU_DATA: usize = 0xFFFF;

/// Upper bound on GET RESPONSE rounds for one command
const MAX_CHAINED_RESPONSES: usize = 256;

/// Command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length, 256 (short) or 65536 (extended) for "all"
    pub le: Option<usize>,
}

impl Apdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_le(mut self, le: usize) -> Self {
        self.le = Some(le);
        self
    }

    /// SELECT by application identifier
    pub fn select(aid: &[u8]) -> Self {
        Self::new(0x00, 0xA4, 0x04, 0x00).with_data(aid)
    }

    /// Short form when the body fits in 255 bytes and Le in 256, extended otherwise
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_APDU_DATA || self.le.is_some_and(|le| le > 0x10000) {
            return Err(Error::MessageTooLarge);
        }
        let extended = self.data.len() > 0xFF || self.le.is_some_and(|le| le > 0x100);

        let mut out = Vec::with_capacity(self.data.len() + 9);
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            if extended {
                out.push(0x00);
                out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
            } else {
                out.push(self.data.len() as u8);
            }
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            if extended {
                if self.data.is_empty() {
                    out.push(0x00);
                }
                // 65536 encodes as 0x0000
                out.extend_from_slice(&(le as u16).to_be_bytes());
            } else {
                // 256 encodes as 0x00
                out.push(le as u8);
            }
        }
        Ok(out)
    }
}

/// Response APDU split into body and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw: u16,
}

impl ApduResponse {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let Some((data, sw)) = raw.split_last_chunk::<2>() else {
            return Err(Error::InvalidPacket);
        };
        Ok(Self {
            data: data.to_vec(),
            sw: u16::from_be_bytes(*sw),
        })
    }

    pub fn sw1(&self) -> u8 {
        (self.sw >> 8) as u8
    }

    pub fn sw2(&self) -> u8 {
        self.sw as u8
    }

    pub fn is_success(&self) -> bool {
        self.sw == SW_SUCCESS
    }

    /// Body on 0x9000, `Error::Status` otherwise
    pub fn into_data(self) -> Result<Vec<u8>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(Error::Status(self.sw))
        }
    }
}

/// Raw APDU exchange with one card
pub trait ApduPort {
    /// Send an encoded command APDU and return the raw response, status word last
    fn transmit_apdu(&mut self, apdu: &[u8]) -> Result<Vec<u8>>;
}

impl<P: ApduPort + ?Sized> ApduPort for Box<P> {
    fn transmit_apdu(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        (**self).transmit_apdu(apdu)
    }
}

impl<P: ApduPort + ?Sized> ApduPort for &mut P {
    fn transmit_apdu(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        (**self).transmit_apdu(apdu)
    }
}

/// Command/response exchange with one card
pub struct SmartCardChannel<P> {
    port: P,
}

impl<P: ApduPort> SmartCardChannel<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        let raw = self.port.transmit_apdu(&apdu.to_bytes()?)?;
        let response = ApduResponse::parse(&raw)?;
        log::trace!(
            "apdu {:02x} {:02x} -> {} bytes, sw {:04x}",
            apdu.cla,
            apdu.ins,
            response.data.len(),
            response.sw
        );
        Ok(response)
    }

    /// Send `apdu` and collect the whole response
    ///
    /// `6Cxx` resends the command with the Le the card asked for; `61xx`
    /// fetches the remaining bytes with GET RESPONSE until the card stops
    /// signalling more.
    pub fn transmit(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        let mut response = self.exchange(apdu)?;
        if response.sw1() == 0x6C {
            let retry = Apdu {
                le: Some(length_or_256(response.sw2())),
                ..apdu.clone()
            };
            response = self.exchange(&retry)?;
        }

        let mut data = std::mem::take(&mut response.data);
        let mut rounds = 0;
        while response.sw1() == 0x61 {
            rounds += 1;
            if rounds > MAX_CHAINED_RESPONSES {
                return Err(Error::FragmentationError);
            }
            let get_response =
                Apdu::new(apdu.cla & 0x03, 0xC0, 0x00, 0x00).with_le(length_or_256(response.sw2()));
            response = self.exchange(&get_response)?;
            data.append(&mut response.data);
        }
        Ok(ApduResponse {
            data,
            sw: response.sw,
        })
    }

    /// SELECT `aid` and return the selection response body
    pub fn select(&mut self, aid: &[u8]) -> Result<Vec<u8>> {
        self.transmit(&Apdu::select(aid))?.into_data()
    }

    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }
}

fn length_or_256(sw2: u8) -> usize {
    match sw2 {
        0 => 0x100,
        n => n as usize,
    }
}

/// A PC/SC reader and the card in it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartCardReader {
    pub name: String,
    /// ATR of the inserted card, `None` for an empty reader
    pub atr: Option<Vec<u8>>,
}

impl SmartCardReader {
    pub fn has_card(&self) -> bool {
        self.atr.is_some()
    }

    /// Reader exposed by a YubiKey's CCID interface
    pub fn is_yubikey(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        name.contains("yubikey") || name.contains("yubico")
    }
}

/// Card insertion or removal in a reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    CardInserted(SmartCardReader),
    CardRemoved(SmartCardReader),
}

impl ReaderEvent {
    pub fn reader(&self) -> &SmartCardReader {
        match self {
            ReaderEvent::CardInserted(reader) | ReaderEvent::CardRemoved(reader) => reader,
        }
    }
}

/// Compare two reader snapshots by reader name
///
/// A reader appearing with a card counts as an insertion, one vanishing
/// with a card as a removal. A changed ATR reads as remove-then-insert.
/// Removals come first.
pub fn diff_readers(previous: &[SmartCardReader], current: &[SmartCardReader]) -> Vec<ReaderEvent> {
    let find = |list: &[SmartCardReader], name: &str| -> Option<SmartCardReader> {
        list.iter().find(|r| r.name == name).cloned()
    };

    let mut removed = Vec::new();
    let mut inserted = Vec::new();
    for old in previous.iter().filter(|r| r.has_card()) {
        match find(current, &old.name) {
            Some(new) if new.atr == old.atr => {}
            _ => removed.push(ReaderEvent::CardRemoved(old.clone())),
        }
    }
    for new in current.iter().filter(|r| r.has_card()) {
        match find(previous, &new.name) {
            Some(old) if old.atr == new.atr => {}
            _ => inserted.push(ReaderEvent::CardInserted(new.clone())),
        }
    }
    removed.extend(inserted);
    removed
}

#[cfg(feature = "pcsc")]
pub use self::pcsc_backend::{PcscPort, ReaderWatcher, establish_context, list_readers};

#[cfg(feature = "pcsc")]
mod pcsc_backend {
    use super::{ApduPort, ReaderEvent, SmartCardChannel, SmartCardReader, diff_readers};
    use crate::error::{Error, Result};

    use std::ffi::CString;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// How long one status-change wait blocks before the stop flag is checked
    const STATUS_WAIT: Duration = Duration::from_millis(500);

    impl From<pcsc::Error> for Error {
        fn from(err: pcsc::Error) -> Self {
            Error::SmartCard(err.to_string())
        }
    }

    /// User-scope PC/SC context
    pub fn establish_context() -> Result<pcsc::Context> {
        Ok(pcsc::Context::establish(pcsc::Scope::User)?)
    }

    /// Every reader known to PC/SC with the ATR of its card
    pub fn list_readers(context: &pcsc::Context) -> Result<Vec<SmartCardReader>> {
        let names = match context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut states: Vec<pcsc::ReaderState> = names
            .into_iter()
            .map(|name| pcsc::ReaderState::new(name, pcsc::State::UNAWARE))
            .collect();
        context.get_status_change(Duration::ZERO, &mut states)?;

        Ok(states
            .iter()
            .map(|state| SmartCardReader {
                name: state.name().to_string_lossy().into_owned(),
                atr: state
                    .event_state()
                    .contains(pcsc::State::PRESENT)
                    .then(|| state.atr().to_vec()),
            })
            .collect())
    }

    impl ApduPort for &pcsc::Card {
        fn transmit_apdu(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
            let mut buffer = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
            Ok(self.transmit(apdu, &mut buffer)?.to_vec())
        }
    }

    /// A card opened in shared mode
    pub struct PcscPort {
        card: pcsc::Card,
        reader: String,
    }

    impl PcscPort {
        pub fn connect(context: &pcsc::Context, reader: &str) -> Result<Self> {
            let name = CString::new(reader).map_err(|e| Error::SmartCard(e.to_string()))?;
            let card = context.connect(&name, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)?;
            log::debug!("connected to card in {}", reader);
            Ok(Self {
                card,
                reader: reader.to_string(),
            })
        }

        pub fn reader(&self) -> &str {
            &self.reader
        }

        /// Run `f` inside an exclusive card transaction
        ///
        /// Other PC/SC clients cannot interleave APDUs until `f` returns.
        pub fn transaction<T, E: From<Error>>(
            &mut self,
            f: impl FnOnce(&mut SmartCardChannel<&pcsc::Card>) -> std::result::Result<T, E>,
        ) -> std::result::Result<T, E> {
            let tx = self.card.transaction().map_err(Error::from)?;
            let result = {
                let mut channel = SmartCardChannel::new(&*tx);
                f(&mut channel)
            };
            if let Err((_, e)) = tx.end(pcsc::Disposition::LeaveCard) {
                log::warn!("ending card transaction failed: {}", e);
            }
            result
        }

        /// Reconnect after another application reset the card
        pub fn reconnect(&mut self) -> Result<()> {
            self.card.reconnect(
                pcsc::ShareMode::Shared,
                pcsc::Protocols::ANY,
                pcsc::Disposition::LeaveCard,
            )?;
            Ok(())
        }

        pub fn disconnect(self) -> Result<()> {
            self.card
                .disconnect(pcsc::Disposition::LeaveCard)
                .map_err(|(_, e)| e.into())
        }
    }

    impl ApduPort for PcscPort {
        fn transmit_apdu(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
            (&self.card).transmit_apdu(apdu)
        }
    }

    /// Reports card insertion and removal from PC/SC status changes
    ///
    /// Cards present at start are not reported. The callback runs on the
    /// watcher thread.
    pub struct ReaderWatcher {
        context: pcsc::Context,
        stop: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    /// PnP pseudo-reader first so reader attach and detach wake the wait
    fn watch_states(readers: &[SmartCardReader]) -> Vec<pcsc::ReaderState> {
        let mut states = vec![pcsc::ReaderState::new(
            pcsc::PNP_NOTIFICATION(),
            pcsc::State::UNAWARE,
        )];
        states.extend(readers.iter().filter_map(|reader| {
            let name = CString::new(reader.name.as_str()).ok()?;
            Some(pcsc::ReaderState::new(name, pcsc::State::UNAWARE))
        }));
        states
    }

    impl ReaderWatcher {
        pub fn start<F>(callback: F) -> Result<Self>
        where
            F: Fn(&ReaderEvent) + Send + 'static,
        {
            let context = establish_context()?;
            let stop = Arc::new(AtomicBool::new(false));
            let mut snapshot = list_readers(&context)?;

            let handle = {
                let context = context.clone();
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name("keytest-reader-watcher".into())
                    .spawn(move || {
                        let mut states = watch_states(&snapshot);
                        while !stop.load(Ordering::Acquire) {
                            match context.get_status_change(STATUS_WAIT, &mut states) {
                                Ok(()) | Err(pcsc::Error::Timeout) => {}
                                Err(pcsc::Error::Cancelled) => break,
                                Err(e) => {
                                    log::warn!("waiting for reader status failed: {}", e);
                                    thread::sleep(STATUS_WAIT);
                                }
                            }
                            states.iter_mut().for_each(pcsc::ReaderState::sync_current_state);

                            let current = match list_readers(&context) {
                                Ok(current) => current,
                                Err(e) => {
                                    log::warn!("reader enumeration failed: {}", e);
                                    continue;
                                }
                            };
                            for event in diff_readers(&snapshot, &current) {
                                log::debug!("reader event: {:?}", event);
                                callback(&event);
                            }
                            let names_changed = snapshot.len() != current.len()
                                || snapshot.iter().zip(&current).any(|(a, b)| a.name != b.name);
                            if names_changed {
                                states = watch_states(&current);
                            }
                            snapshot = current;
                        }
                    })?
            };

            Ok(Self {
                context,
                stop,
                handle: Some(handle),
            })
        }

        pub fn stop(&mut self) {
            self.stop.store(true, Ordering::Release);
            if let Err(e) = self.context.cancel() {
                log::debug!("cancelling status wait: {}", e);
            }
            if let Some(handle) = self.handle.take() {
                if handle.join().is_err() {
                    log::warn!("reader watcher thread panicked");
                }
            }
        }
    }

    impl Drop for ReaderWatcher {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

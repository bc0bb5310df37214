//! Factory-reset a key so a test starts from a clean state
//!
//! authenticatorReset is only honoured shortly after power-up, so the flow
//! asks the tester to re-insert the key, waits for the arrival, sends Reset
//! while a notification task prompts for the touch, then optionally sets a
//! PIN.
//!
//! Whatever arrives is identified before Reset is sent. A key other than the
//! one under test, or one on the block list, is never wiped.

use crate::client::Fido2Client;
use crate::collector::{KeyCollector, KeyEntryData, KeyEntryRequest, KeyEntryResponse};
use crate::config::TestConfig;
use crate::ctap::CtapConnection;
use crate::device::{DeviceInfo, TestDevice};
use crate::enumeration::BlockList;
use crate::error::{Error, Result};

use keytest_transport::{DeviceEvent, DeviceEvents, HidDeviceInfo, ListenerId};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a completed reset
pub struct ResetOutcome<C> {
    /// The re-inserted device that was reset
    pub device: TestDevice,
    pub pin_set: bool,
    /// Client on the reset key, ready for further setup
    pub client: Fido2Client<C>,
}

/// Unregisters listeners when the flow ends, however it ends
struct ListenerGuard<'a, E: DeviceEvents + ?Sized> {
    events: &'a E,
    ids: Vec<ListenerId>,
}

impl<E: DeviceEvents + ?Sized> Drop for ListenerGuard<'_, E> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.events.remove_listener(id);
        }
    }
}

/// Reinsert-then-reset flow
pub struct Fido2Reset<'a, E: ?Sized, K: ?Sized, F> {
    events: &'a E,
    target: &'a TestDevice,
    block_list: Option<&'a BlockList>,
    collector: &'a K,
    connect: F,
    pin: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
    touch_delay: Duration,
}

impl<'a, E, K, F, C> Fido2Reset<'a, E, K, F>
where
    E: DeviceEvents + ?Sized,
    K: KeyCollector + ?Sized,
    F: FnMut(&HidDeviceInfo) -> Result<C>,
    C: CtapConnection,
{
    /// Reset `target` once it is re-inserted; `connect` opens the arrival
    pub fn new(events: &'a E, target: &'a TestDevice, connect: F, collector: &'a K) -> Self {
        let defaults = TestConfig::default();
        Self {
            events,
            target,
            block_list: None,
            collector,
            connect,
            pin: None,
            timeout: defaults.reset_timeout(),
            poll_interval: defaults.poll_interval(),
            touch_delay: defaults.touch_notice_delay(),
        }
    }

    /// Refuse to reset keys on `block_list`
    pub fn with_block_list(mut self, block_list: &'a BlockList) -> Self {
        self.block_list = Some(block_list);
        self
    }

    /// Set this PIN after the reset
    pub fn with_pin(mut self, pin: &str) -> Self {
        self.pin = Some(pin.to_string());
        self
    }

    /// How long to wait for the key to come back
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_touch_delay(mut self, delay: Duration) -> Self {
        self.touch_delay = delay;
        self
    }

    /// Timing from `config`
    pub fn with_config(self, config: &TestConfig) -> Self {
        self.with_timeout(config.reset_timeout())
            .with_poll_interval(config.poll_interval())
            .with_touch_delay(config.touch_notice_delay())
    }

    pub fn run(mut self) -> Result<ResetOutcome<C>> {
        self.check_allowed(self.target)?;

        let removed = Arc::new(AtomicBool::new(false));
        let arrived: Arc<Mutex<Option<HidDeviceInfo>>> = Arc::new(Mutex::new(None));

        let mut guard = ListenerGuard {
            events: self.events,
            ids: Vec::with_capacity(2),
        };
        guard.ids.push(self.events.on_removed({
            let removed = Arc::clone(&removed);
            Arc::new(move |event: &DeviceEvent| {
                log::debug!("removed: {}", event.device().path);
                removed.store(true, Ordering::Release);
            })
        }));
        guard.ids.push(self.events.on_arrived({
            let removed = Arc::clone(&removed);
            let arrived = Arc::clone(&arrived);
            Arc::new(move |event: &DeviceEvent| {
                if !removed.load(Ordering::Acquire) {
                    log::debug!("ignoring arrival of {} before any removal", event.device().path);
                    return;
                }
                let mut slot = arrived.lock().unwrap_or_else(PoisonError::into_inner);
                *slot = Some(event.device().clone());
            })
        }));

        let reinsert = KeyEntryData::new(KeyEntryRequest::Reinsert);
        if self.collector.collect(&reinsert) == KeyEntryResponse::Cancel {
            return Err(Error::Cancelled);
        }
        let hid = self.wait_for_reinsert(&arrived)?;
        log::info!("key re-inserted at {}", hid.path);

        let mut client = Fido2Client::new((self.connect)(&hid)?);
        let device = TestDevice::new(hid, DeviceInfo::read(client.connection())?);
        if !device.is_same_key(self.target) {
            log::warn!("{} arrived instead of {}, not resetting", device, self.target);
            return Err(Error::DeviceNotFound(format!(
                "{} arrived but {} is under test",
                device, self.target
            )));
        }
        self.check_allowed(&device)?;

        let result = self.reset_with_touch_notice(&mut client);
        self.collector.collect(&KeyEntryData::new(KeyEntryRequest::Release));
        result?;

        let pin_set = match &self.pin {
            Some(pin) => {
                client.set_pin(pin)?;
                true
            }
            None => false,
        };

        drop(guard);
        Ok(ResetOutcome {
            device,
            pin_set,
            client,
        })
    }

    fn check_allowed(&self, device: &TestDevice) -> Result<()> {
        match self.block_list {
            Some(block_list) if block_list.is_blocked(device) => {
                log::warn!("{} is on the block list, not resetting", device);
                Err(Error::DeviceNotFound(format!("{} is blocked", device)))
            }
            _ => Ok(()),
        }
    }

    fn wait_for_reinsert(&self, arrived: &Mutex<Option<HidDeviceInfo>>) -> Result<HidDeviceInfo> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(device) = arrived.lock().unwrap_or_else(PoisonError::into_inner).take() {
                return Ok(device);
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("key not re-inserted within {:?}", self.timeout);
                return Err(Error::Timeout("key re-insertion"));
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Send Reset while a scoped task prompts for touch after `touch_delay`
    ///
    /// The task is abandoned through its cancellation flag once Reset
    /// returns, whether or not it has prompted.
    fn reset_with_touch_notice(&self, client: &mut Fido2Client<C>) -> Result<()> {
        let cancel = AtomicBool::new(false);
        let collector = self.collector;
        let delay = self.touch_delay;
        let step = self.poll_interval.max(Duration::from_millis(1));

        thread::scope(|scope| {
            scope.spawn(|| {
                let start = Instant::now();
                while start.elapsed() < delay {
                    if cancel.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(step.min(delay - start.elapsed().min(delay)));
                }
                if !cancel.load(Ordering::Acquire) {
                    collector.collect(&KeyEntryData::new(KeyEntryRequest::TouchRequest));
                }
            });

            let result = client.reset();
            cancel.store(true, Ordering::Release);
            result
        })
    }
}

//! Reinsert-then-reset flow driven by scripted device events

mod common;

use common::MockAuthenticator;

use keytest::{
    BlockList, CtapConnection, DeviceInfo, Error, Fido2Reset, KeyCollector, KeyEntryData,
    KeyEntryRequest, KeyEntryResponse, Result, StatusCode, TestDevice, TestKeyCollector,
};
use keytest_transport::{DeviceEvent, HidDeviceInfo, Listeners};

use std::thread;
use std::time::{Duration, Instant};

const PIN: &str = "123456";
const SERIAL: u32 = 11111111;

fn yubikey(path: &str) -> HidDeviceInfo {
    HidDeviceInfo {
        vendor_id: 0x1050,
        product_id: 0x0407,
        path: path.to_string(),
        manufacturer: Some("Yubico".to_string()),
        product: Some("YubiKey OTP+FIDO+CCID".to_string()),
        serial_number: None,
    }
}

/// The key under test as enumeration identified it before the reset
fn target(mock: &MockAuthenticator) -> TestDevice {
    let mut conn = mock.clone();
    TestDevice::new(yubikey("/dev/hidraw3"), DeviceInfo::read(&mut conn).unwrap())
}

/// Plays the tester: unplugs and re-plugs the key when asked to
struct Replug<'a> {
    inner: TestKeyCollector,
    listeners: &'a Listeners,
    unplug_first: bool,
    arrival: &'static str,
}

impl<'a> Replug<'a> {
    fn new(listeners: &'a Listeners) -> Self {
        Self {
            inner: TestKeyCollector::default(),
            listeners,
            unplug_first: true,
            arrival: "/dev/hidraw5",
        }
    }
}

impl KeyCollector for Replug<'_> {
    fn collect(&self, data: &KeyEntryData) -> KeyEntryResponse {
        if data.request == KeyEntryRequest::Reinsert {
            if self.unplug_first {
                self.listeners.dispatch(&DeviceEvent::Removed(yubikey("/dev/hidraw3")));
            }
            self.listeners.dispatch(&DeviceEvent::Arrived(yubikey(self.arrival)));
        }
        self.inner.collect(data)
    }
}

/// Holds the Reset command long enough for the touch prompt to fire
struct SlowReset {
    inner: MockAuthenticator,
    delay: Duration,
}

impl CtapConnection for SlowReset {
    fn transmit(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        if request.first() == Some(&0x07) {
            thread::sleep(self.delay);
        }
        self.inner.transmit(request, timeout)
    }

    fn read_config(&mut self) -> Result<Vec<u8>> {
        self.inner.read_config()
    }

    fn device_version(&self) -> Option<(u8, u8, u8)> {
        self.inner.device_version()
    }
}

#[test]
fn test_reset_sets_pin() {
    common::init_logging();
    let listeners = Listeners::new();
    let collector = Replug::new(&listeners);
    let mock = MockAuthenticator::new().with_serial(SERIAL).with_pin("999999");

    let outcome = Fido2Reset::new(
        &listeners,
        &target(&mock),
        |_: &HidDeviceInfo| Ok(mock.clone()),
        &collector,
    )
    .with_pin(PIN)
    .with_poll_interval(Duration::from_millis(5))
    .with_timeout(Duration::from_secs(2))
    .run()
    .unwrap();

    assert_eq!(outcome.device.hid.path, "/dev/hidraw5");
    assert_eq!(outcome.device.serial(), Some(SERIAL));
    assert!(outcome.pin_set);
    assert!(mock.pin_matches(PIN));
    assert_eq!(mock.state().reset_count, 1);
    assert_eq!(collector.inner.count(KeyEntryRequest::Reinsert), 1);
    assert_eq!(collector.inner.count(KeyEntryRequest::Release), 1);
    assert!(listeners.is_empty());
}

#[test]
fn test_reset_without_pin() {
    let listeners = Listeners::new();
    let collector = Replug::new(&listeners);
    let mock = MockAuthenticator::new().with_serial(SERIAL).with_pin("999999");

    let mut outcome = Fido2Reset::new(
        &listeners,
        &target(&mock),
        |_: &HidDeviceInfo| Ok(mock.clone()),
        &collector,
    )
    .with_poll_interval(Duration::from_millis(5))
    .run()
    .unwrap();

    assert!(!outcome.pin_set);
    assert!(!outcome.client.get_info().unwrap().pin_is_set());
}

#[test]
fn test_arrival_without_removal_times_out() {
    let listeners = Listeners::new();
    let mut collector = Replug::new(&listeners);
    collector.unplug_first = false;
    let mock = MockAuthenticator::new().with_serial(SERIAL);

    let result = Fido2Reset::new(
        &listeners,
        &target(&mock),
        |_: &HidDeviceInfo| Ok(mock.clone()),
        &collector,
    )
    .with_poll_interval(Duration::from_millis(5))
    .with_timeout(Duration::from_millis(100))
    .run();

    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(mock.state().reset_count, 0);
    assert!(listeners.is_empty());
}

#[test]
fn test_cancelled_before_reinsert() {
    let listeners = Listeners::new();
    let collector = |_: &KeyEntryData| KeyEntryResponse::Cancel;
    let mock = MockAuthenticator::new().with_serial(SERIAL);

    let result = Fido2Reset::new(
        &listeners,
        &target(&mock),
        |_: &HidDeviceInfo| Ok(mock.clone()),
        &collector,
    )
    .run();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(mock.state().commands.is_empty());
    assert!(listeners.is_empty());
}

#[test]
fn test_reset_refused() {
    let listeners = Listeners::new();
    let collector = Replug::new(&listeners);
    let mock = MockAuthenticator::new().with_serial(SERIAL);
    mock.state().reset_status = StatusCode::NotAllowed;

    let result = Fido2Reset::new(
        &listeners,
        &target(&mock),
        |_: &HidDeviceInfo| Ok(mock.clone()),
        &collector,
    )
    .with_pin(PIN)
    .with_poll_interval(Duration::from_millis(5))
    .run();

    assert!(matches!(result, Err(Error::Ctap(StatusCode::NotAllowed))));
    assert_eq!(collector.inner.count(KeyEntryRequest::Release), 1);
    assert!(mock.state().pin_hash.is_none());
    assert!(listeners.is_empty());
}

#[test]
fn test_touch_prompt_while_reset_pending() {
    let listeners = Listeners::new();
    let collector = Replug::new(&listeners);
    let mock = MockAuthenticator::new().with_serial(SERIAL);

    let connect = |_: &HidDeviceInfo| -> Result<SlowReset> {
        Ok(SlowReset {
            inner: mock.clone(),
            delay: Duration::from_millis(300),
        })
    };
    Fido2Reset::new(&listeners, &target(&mock), connect, &collector)
        .with_poll_interval(Duration::from_millis(5))
        .with_touch_delay(Duration::from_millis(10))
        .run()
        .unwrap();

    assert_eq!(collector.inner.count(KeyEntryRequest::TouchRequest), 1);
    let requests: Vec<KeyEntryRequest> =
        collector.inner.requests().iter().map(|d| d.request).collect();
    assert_eq!(
        requests,
        vec![KeyEntryRequest::Reinsert, KeyEntryRequest::TouchRequest, KeyEntryRequest::Release]
    );
}

#[test]
fn test_no_touch_prompt_when_reset_is_quick() {
    let listeners = Listeners::new();
    let collector = Replug::new(&listeners);
    let mock = MockAuthenticator::new().with_serial(SERIAL);

    let start = Instant::now();
    Fido2Reset::new(&listeners, &target(&mock), |_: &HidDeviceInfo| Ok(mock.clone()), &collector)
        .with_poll_interval(Duration::from_millis(5))
        .with_touch_delay(Duration::from_secs(5))
        .run()
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(collector.inner.count(KeyEntryRequest::TouchRequest), 0);
}

#[test]
fn test_swapped_key_is_not_reset() {
    let listeners = Listeners::new();
    let mut collector = Replug::new(&listeners);
    collector.arrival = "/dev/hidraw9";
    let mock = MockAuthenticator::new().with_serial(SERIAL).with_pin("999999");
    let stranger = MockAuthenticator::new().with_serial(99999999).with_pin("999999");

    let connect = |hid: &HidDeviceInfo| -> Result<MockAuthenticator> {
        match hid.path.as_str() {
            "/dev/hidraw9" => Ok(stranger.clone()),
            _ => Ok(mock.clone()),
        }
    };
    let result = Fido2Reset::new(&listeners, &target(&mock), connect, &collector)
        .with_pin(PIN)
        .with_poll_interval(Duration::from_millis(5))
        .with_timeout(Duration::from_secs(2))
        .run();

    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    assert_eq!(stranger.state().reset_count, 0);
    assert!(stranger.pin_matches("999999"));
    assert_eq!(mock.state().reset_count, 0);
    assert_eq!(collector.inner.count(KeyEntryRequest::Release), 0);
    assert!(listeners.is_empty());
}

#[test]
fn test_blocked_key_is_not_reset() {
    let listeners = Listeners::new();
    let collector = Replug::new(&listeners);
    let mock = MockAuthenticator::new().with_serial(SERIAL);
    let block_list: BlockList = [SERIAL].into_iter().collect();

    let result = Fido2Reset::new(
        &listeners,
        &target(&mock),
        |_: &HidDeviceInfo| Ok(mock.clone()),
        &collector,
    )
    .with_block_list(&block_list)
    .with_poll_interval(Duration::from_millis(5))
    .run();

    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    assert_eq!(collector.inner.count(KeyEntryRequest::Reinsert), 0);
    assert_eq!(mock.state().reset_count, 0);
    assert!(listeners.is_empty());
}

#[test]
fn test_key_without_serial_matches_by_firmware() {
    let listeners = Listeners::new();
    let collector = Replug::new(&listeners);
    // Security Key series: no device-info serial, handshake version only
    let mock = MockAuthenticator::new();

    let outcome = Fido2Reset::new(
        &listeners,
        &target(&mock),
        |_: &HidDeviceInfo| Ok(mock.clone()),
        &collector,
    )
    .with_block_list(&BlockList::empty())
    .with_poll_interval(Duration::from_millis(5))
    .run()
    .unwrap();

    assert_eq!(outcome.device.serial(), None);
    assert_eq!(mock.state().reset_count, 1);
}

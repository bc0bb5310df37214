//! Device arrival and removal events
//!
//! hidapi has no hotplug notifications, so [`DeviceWatcher`] polls the device
//! list on a background thread and reports the difference between snapshots.
//! Listeners are plain callbacks invoked on the watcher thread.

use crate::error::Result;
use crate::hid::HidDeviceInfo;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Arrived(HidDeviceInfo),
    Removed(HidDeviceInfo),
}

impl DeviceEvent {
    pub fn device(&self) -> &HidDeviceInfo {
        match self {
            DeviceEvent::Arrived(info) | DeviceEvent::Removed(info) => info,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Handle returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Source of device arrival and removal notifications
pub trait DeviceEvents {
    fn on_arrived(&self, callback: EventCallback) -> ListenerId;
    fn on_removed(&self, callback: EventCallback) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Arrived,
    Removed,
}

/// Registry of event callbacks
///
/// Usable on its own as a manually driven [`DeviceEvents`] source.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    table: Mutex<BTreeMap<ListenerId, (Kind, EventCallback)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, kind: Kind, callback: EventCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (kind, callback));
        id
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener registered for the event's kind
    ///
    /// Callbacks run outside the registry lock and may unregister themselves.
    pub fn dispatch(&self, event: &DeviceEvent) {
        let kind = match event {
            DeviceEvent::Arrived(_) => Kind::Arrived,
            DeviceEvent::Removed(_) => Kind::Removed,
        };
        let callbacks: Vec<EventCallback> = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl DeviceEvents for Listeners {
    fn on_arrived(&self, callback: EventCallback) -> ListenerId {
        self.add(Kind::Arrived, callback)
    }

    fn on_removed(&self, callback: EventCallback) -> ListenerId {
        self.add(Kind::Removed, callback)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Compare two snapshots by device path
///
/// Removals come before arrivals so a key re-plugged between two polls under a
/// new path reads as remove-then-arrive.
pub fn diff_devices(previous: &[HidDeviceInfo], current: &[HidDeviceInfo]) -> Vec<DeviceEvent> {
    let removed = previous
        .iter()
        .filter(|old| !current.iter().any(|new| new.path == old.path))
        .cloned()
        .map(DeviceEvent::Removed);
    let arrived = current
        .iter()
        .filter(|new| !previous.iter().any(|old| old.path == new.path))
        .cloned()
        .map(DeviceEvent::Arrived);
    removed.chain(arrived).collect()
}

/// Polls a device enumeration and dispatches the differences
pub struct DeviceWatcher {
    listeners: Arc<Listeners>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Take a baseline snapshot and start polling every `interval`
    ///
    /// Devices present at start are not reported. Enumeration errors are
    /// logged and the previous snapshot is kept.
    pub fn start<F>(interval: Duration, mut enumerate: F) -> Result<Self>
    where
        F: FnMut() -> Result<Vec<HidDeviceInfo>> + Send + 'static,
    {
        let listeners = Arc::new(Listeners::new());
        let stop = Arc::new(AtomicBool::new(false));
        let mut snapshot = enumerate()?;

        let handle = {
            let listeners = Arc::clone(&listeners);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("keytest-device-watcher".into())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        thread::sleep(interval);
                        match enumerate() {
                            Ok(current) => {
                                for event in diff_devices(&snapshot, &current) {
                                    log::debug!("device event: {:?}", event);
                                    listeners.dispatch(&event);
                                }
                                snapshot = current;
                            }
                            Err(e) => log::warn!("device enumeration failed: {}", e),
                        }
                    }
                })?
        };

        Ok(Self {
            listeners,
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::warn!("device watcher thread panicked");
        }
    }
}

impl DeviceEvents for DeviceWatcher {
    fn on_arrived(&self, callback: EventCallback) -> ListenerId {
        self.listeners.on_arrived(callback)
    }

    fn on_removed(&self, callback: EventCallback) -> ListenerId {
        self.listeners.on_removed(callback)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove_listener(id)
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

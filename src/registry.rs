// SPDX-License-Identifier: GPL-3.0-only
//! Device registry
//!
//! The in-memory record of every device seen this session and its decoded
//! feature state. Decoder results and confirmed writes both land here, and
//! the presentation layer observes changes through [`DeviceRegistry::subscribe`].
//!
//! # Thread Safety
//!
//! Clones share one store. Locks are never held across an `.await` or while
//! observers run, so an observer may call back into the registry.
//!
//! # Disconnects
//!
//! Devices are never removed within a session. A discovery pass that omits a
//! known device marks it disconnected and keeps its last feature state.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::decode::ValueReading;
use crate::model::{Category, Device, DeviceKey, Feature};

type DevicesChanged = Box<dyn Fn() + Send + Sync>;
type FeatureChanged = Box<dyn Fn(&DeviceKey, &Feature) + Send + Sync>;

struct Observer {
    on_devices_changed: DevicesChanged,
    on_feature_changed: FeatureChanged,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: Vec<(u64, Arc<Observer>)>,
}

#[derive(Default)]
struct Inner {
    /// First-discovered order
    devices: RwLock<Vec<Device>>,
    observers: Mutex<Observers>,
}

/// Shared store of known devices
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Inner>,
}

/// Keeps an observer registered until dropped
#[must_use = "dropping the subscription unregisters the observer"]
pub struct Subscription {
    id: u64,
    registry: Weak<Inner>,
}

impl Subscription {
    /// Unregister now instead of at drop
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            let mut observers = inner.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register change callbacks
    ///
    /// `on_devices_changed` fires when devices are added, updated or change
    /// connection state. `on_feature_changed` fires when a single feature's
    /// value changes.
    pub fn subscribe<D, F>(&self, on_devices_changed: D, on_feature_changed: F) -> Subscription
    where
        D: Fn() + Send + Sync + 'static,
        F: Fn(&DeviceKey, &Feature) + Send + Sync + 'static,
    {
        let mut observers = self.observers();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.entries.push((
            id,
            Arc::new(Observer {
                on_devices_changed: Box::new(on_devices_changed),
                on_feature_changed: Box::new(on_feature_changed),
            }),
        ));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers().entries.len()
    }

    /// Insert a device, or replace the features and inputs of a known one
    pub fn upsert_device(&self, device: Device) -> DeviceKey {
        let key = device.key();
        {
            let mut devices = self.write();
            match devices.iter_mut().find(|d| d.key() == key) {
                Some(existing) => {
                    existing.update_identity(&device);
                    existing.features = device.features;
                    existing.inputs = device.inputs;
                    debug!(device = %key, "Updated device");
                }
                None => {
                    info!(device = %key, "Added device {}", device.display_name());
                    devices.push(device);
                }
            }
        }
        self.notify_devices_changed();
        key
    }

    /// Fold a discovery pass into the registry
    ///
    /// Known devices get fresh identity fields but keep their features; new
    /// devices are appended; devices absent from the pass are marked
    /// disconnected. Returns the keys of the discovered devices in order.
    pub fn merge_discovery(&self, discovered: Vec<Device>) -> Vec<DeviceKey> {
        let keys: Vec<DeviceKey> = discovered.iter().map(Device::key).collect();
        {
            let mut devices = self.write();
            for found in discovered {
                let key = found.key();
                match devices.iter_mut().find(|d| d.key() == key) {
                    Some(existing) => existing.update_identity(&found),
                    None => {
                        info!(device = %key, "Discovered {}", found.display_name());
                        devices.push(found);
                    }
                }
            }
            for device in devices.iter_mut() {
                if device.connected && !keys.contains(&device.key()) {
                    info!(device = %device.key(), "Device disconnected");
                    device.connected = false;
                }
            }
        }
        self.notify_devices_changed();
        keys
    }

    pub fn mark_all_disconnected(&self) {
        let changed = {
            let mut devices = self.write();
            let mut changed = false;
            for device in devices.iter_mut().filter(|d| d.connected) {
                device.connected = false;
                changed = true;
            }
            changed
        };
        if changed {
            self.notify_devices_changed();
        }
    }

    /// Snapshot of all devices in first-discovered order
    pub fn list_devices(&self) -> Vec<Device> {
        self.read().clone()
    }

    pub fn device(&self, key: &DeviceKey) -> Option<Device> {
        self.read().iter().find(|d| &d.key() == key).cloned()
    }

    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.read().iter().any(|d| &d.key() == key)
    }

    /// Resolve a transport address back to a registry key
    ///
    /// The EDID is authoritative when both sides have one; otherwise the
    /// transport id must match.
    pub fn find_key_by_address(&self, id: &str, edid: &str) -> Option<DeviceKey> {
        let devices = self.read();
        devices
            .iter()
            .find(|d| !edid.is_empty() && d.edid_hash == edid)
            .or_else(|| devices.iter().find(|d| !id.is_empty() && d.id == id))
            .map(Device::key)
    }

    pub fn find_feature_by_code(&self, key: &DeviceKey, code: u8) -> Option<Feature> {
        self.read()
            .iter()
            .find(|d| &d.key() == key)
            .and_then(|d| d.feature(code))
            .cloned()
    }

    /// Features of one category, in the device's feature order
    pub fn features_for_category(&self, key: &DeviceKey, category: Category) -> Vec<Feature> {
        self.read()
            .iter()
            .find(|d| &d.key() == key)
            .map(|d| {
                d.features
                    .iter()
                    .filter(|f| f.category == category)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store a confirmed feature value
    ///
    /// The value is clamped into the feature's range. Returns the updated
    /// feature, or `None` when the device or feature is unknown.
    pub fn apply_feature_value(&self, key: &DeviceKey, code: u8, value: i64) -> Option<Feature> {
        let updated = {
            let mut devices = self.write();
            let feature = devices
                .iter_mut()
                .find(|d| &d.key() == key)?
                .feature_mut(code)?;
            feature.set_current(value);
            feature.clone()
        };
        self.notify_feature_changed(key, &updated);
        Some(updated)
    }

    /// Apply a batch of readings; returns how many matched a known feature
    pub fn apply_readings(&self, key: &DeviceKey, readings: &[(u8, ValueReading)]) -> usize {
        let updated: Vec<Feature> = {
            let mut devices = self.write();
            let Some(device) = devices.iter_mut().find(|d| &d.key() == key) else {
                return 0;
            };
            readings
                .iter()
                .filter_map(|(code, reading)| {
                    let feature = device.feature_mut(*code)?;
                    feature.apply_reading(reading.current, reading.maximum);
                    Some(feature.clone())
                })
                .collect()
        };
        for feature in &updated {
            self.notify_feature_changed(key, feature);
        }
        updated.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Device>> {
        self.inner.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Device>> {
        self.inner.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> std::sync::MutexGuard<'_, Observers> {
        self.inner.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_observers(&self) -> Vec<Arc<Observer>> {
        self.observers().entries.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    fn notify_devices_changed(&self) {
        for observer in self.snapshot_observers() {
            (observer.on_devices_changed)();
        }
    }

    fn notify_feature_changed(&self, key: &DeviceKey, feature: &Feature) {
        for observer in self.snapshot_observers() {
            (observer.on_feature_changed)(key, feature);
        }
    }
}

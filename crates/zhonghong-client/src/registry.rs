//! Last-known state of every terminal unit behind the gateway.
//!
//! The dispatcher feeds unsolicited frames into [`DeviceRegistry::update`].
//! A unit enters the registry the first time a full status report for it is
//! seen; control echoes only touch units already known. Observers run after
//! the registry lock is released, once per unit whose state changed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zhonghong_protocol::{
    decode_updates, DeviceAddress, DeviceUpdate, FanSpeed, Frame, Mode, ProtocolError,
    StatusReport, WireProfile,
};

use crate::diagnostics::Diagnostics;
use crate::error::{GatewayError, GatewayResult};

/// Known state of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub address: DeviceAddress,
    pub power: bool,
    pub mode: Mode,
    pub fan_speed: FanSpeed,
    /// Target temperature, degrees Celsius.
    pub set_point: f32,
    /// Room temperature, degrees Celsius.
    pub current_temp: f32,
    /// Fault code reported by the unit, 0 when healthy.
    pub error_code: u8,
    /// When the gateway last reported anything about this unit.
    pub last_updated: DateTime<Utc>,
}

fn replace<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        return false;
    }
    *field = value;
    true
}

impl DeviceState {
    pub fn from_report(report: &StatusReport, now: DateTime<Utc>) -> Self {
        DeviceState {
            address: report.address,
            power: report.power,
            mode: report.mode,
            fan_speed: report.fan_speed,
            set_point: report.set_point,
            current_temp: report.current_temp,
            error_code: report.error_code,
            last_updated: now,
        }
    }

    /// Apply an update; true if any reported field changed.
    ///
    /// `last_updated` is always refreshed but does not count as a change.
    fn apply(&mut self, update: &DeviceUpdate, now: DateTime<Utc>) -> bool {
        self.last_updated = now;
        match *update {
            DeviceUpdate::Status(report) => {
                // Non-short-circuit `|` so every field is written.
                replace(&mut self.power, report.power)
                    | replace(&mut self.mode, report.mode)
                    | replace(&mut self.fan_speed, report.fan_speed)
                    | replace(&mut self.set_point, report.set_point)
                    | replace(&mut self.current_temp, report.current_temp)
                    | replace(&mut self.error_code, report.error_code)
            }
            DeviceUpdate::Power { on, .. } => replace(&mut self.power, on),
            DeviceUpdate::Mode { mode, .. } => replace(&mut self.mode, mode),
            DeviceUpdate::FanSpeed { speed, .. } => replace(&mut self.fan_speed, speed),
            DeviceUpdate::SetPoint { celsius, .. } => replace(&mut self.set_point, celsius),
        }
    }
}

/// Callback invoked with the new state of a unit that changed.
pub type Observer = Arc<dyn Fn(&DeviceState) + Send + Sync>;

/// Handle returned by [`DeviceRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Thread-safe map of unit address to state, with change observers.
pub struct DeviceRegistry {
    profile: WireProfile,
    diagnostics: Arc<Diagnostics>,
    devices: RwLock<HashMap<DeviceAddress, DeviceState>>,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_subscription: AtomicU64,
}

impl DeviceRegistry {
    pub fn new(profile: WireProfile, diagnostics: Arc<Diagnostics>) -> Self {
        DeviceRegistry {
            profile,
            diagnostics,
            devices: RwLock::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Apply a frame to the registry.
    ///
    /// Returns whether any unit changed. On a parse error nothing is
    /// modified and no observer runs.
    pub fn update(&self, frame: &Frame) -> Result<bool, ProtocolError> {
        let updates = decode_updates(frame, &self.profile)?;
        let now = Utc::now();
        let mut changed: Vec<DeviceState> = Vec::new();

        let device_count = {
            let mut devices = self.devices.write();
            for update in &updates {
                let address = update.address();
                match devices.get_mut(&address) {
                    Some(state) => {
                        if state.apply(update, now) {
                            changed.push(state.clone());
                        }
                    }
                    None => match update {
                        DeviceUpdate::Status(report) => {
                            info!(%address, "discovered unit");
                            let state = DeviceState::from_report(report, now);
                            changed.push(state.clone());
                            devices.insert(address, state);
                        }
                        _ => debug!(%address, "ignoring control echo for unknown unit"),
                    },
                }
            }
            devices.len()
        };

        for state in &changed {
            self.diagnostics.record_registry_change(device_count);
            self.notify(state);
        }
        Ok(!changed.is_empty())
    }

    fn notify(&self, state: &DeviceState) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(state))).is_err() {
                warn!(address = %state.address, "state observer panicked");
                self.diagnostics.record_observer_failure();
            }
        }
    }

    /// Register an observer. Observers run in registration order.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&DeviceState) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn get(&self, address: DeviceAddress) -> GatewayResult<DeviceState> {
        self.devices
            .read()
            .get(&address)
            .cloned()
            .ok_or(GatewayError::NotFound(address))
    }

    /// Snapshot of all known units, sorted by address.
    pub fn list(&self) -> Vec<DeviceState> {
        let mut states: Vec<DeviceState> = self.devices.read().values().cloned().collect();
        states.sort_by_key(|state| state.address);
        states
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

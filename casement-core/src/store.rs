use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    bus_contract::DeviceReport,
    error::MalformedReport,
    model::{DeviceId, DeviceState},
};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Updated(Arc<DeviceState>),
    Removed(DeviceId),
}

/// Receives state changes for one device.
///
/// Callbacks run while the device's lock is held, which is what keeps every
/// listener of a device on the same ordering. They must not block or call
/// back into the store. Returning `false` drops the listener.
pub trait StateListener: Send + Sync {
    /// Called once when the listener joins, with the state current at that instant.
    fn on_join(&self, _device_id: &DeviceId, current: Option<&Arc<DeviceState>>) -> bool {
        match current {
            Some(state) => self.on_event(&StoreEvent::Updated(Arc::clone(state))),
            None => true,
        }
    }

    fn on_event(&self, event: &StoreEvent) -> bool;
}

/// Forwards store events into an unbounded channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<StoreEvent>) -> Self {
        Self { tx }
    }
}

impl StateListener for ChannelListener {
    fn on_event(&self, event: &StoreEvent) -> bool {
        self.tx.send(event.clone()).is_ok()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionHandle {
    device_id: DeviceId,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }
}

#[derive(Default)]
struct Slot {
    state: Option<Arc<DeviceState>>,
    listeners: Vec<(SubscriptionId, Arc<dyn StateListener>)>,
    // Set once the slot has been unlinked from the index; writers must re-resolve.
    retired: bool,
}

impl Slot {
    fn notify(&mut self, event: &StoreEvent) {
        self.listeners.retain(|(_, listener)| listener.on_event(event));
    }

    fn is_idle(&self) -> bool {
        self.state.is_none() && self.listeners.is_empty()
    }
}

type SlotRef = Arc<Mutex<Slot>>;

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last known state per device with change notification.
///
/// Each device owns a slot with its own mutex. The revision check and the
/// fan-out to listeners happen under that mutex, so concurrent reports for one
/// device are applied and delivered in a single order, while different devices
/// never wait on each other. The index lock is only held to look up, create or
/// unlink a slot.
#[derive(Default)]
pub struct StateStore {
    slots: RwLock<HashMap<DeviceId, SlotRef>>,
    next_subscription: AtomicU64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, device_id: &DeviceId) -> Option<SlotRef> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(device_id).cloned()
    }

    fn slot_or_insert(&self, device_id: &DeviceId) -> SlotRef {
        if let Some(slot) = self.slot(device_id) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(device_id.clone()).or_default())
    }

    /// Runs `f` with the live slot of `device_id`, creating it if needed.
    fn with_slot<T>(&self, device_id: &DeviceId, mut f: impl FnMut(&mut Slot) -> T) -> T {
        loop {
            let slot = self.slot_or_insert(device_id);
            let mut guard = lock(&slot);
            if guard.retired {
                continue;
            }
            return f(&mut *guard);
        }
    }

    /// Unlinks the slot of `device_id` when it holds neither state nor listeners.
    fn prune(&self, device_id: &DeviceId) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get(device_id).cloned() else {
            return;
        };
        let mut guard = lock(&slot);
        if guard.is_idle() {
            guard.retired = true;
            slots.remove(device_id);
        }
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<Arc<DeviceState>> {
        let slot = self.slot(device_id)?;
        let guard = lock(&slot);
        guard.state.clone()
    }

    /// Installs `candidate` if it is newer than the stored state.
    ///
    /// Returns `Ok(false)` for a stale candidate, which is expected under
    /// at-least-once delivery and is not an error.
    pub fn replace(
        &self,
        device_id: &DeviceId,
        candidate: DeviceState,
    ) -> Result<bool, MalformedReport> {
        if candidate.device_id != *device_id {
            return Err(MalformedReport::DeviceMismatch {
                expected: device_id.clone(),
                reported: candidate.device_id,
            });
        }
        candidate.validate()?;

        let candidate = Arc::new(candidate);
        let applied = self.with_slot(device_id, |slot| {
            if let Some(current) = &slot.state
                && candidate.revision <= current.revision
            {
                debug!(
                    device_id = %device_id,
                    revision = candidate.revision,
                    stored = current.revision,
                    "dropping stale report"
                );
                return false;
            }
            slot.state = Some(Arc::clone(&candidate));
            slot.notify(&StoreEvent::Updated(Arc::clone(&candidate)));
            true
        });
        Ok(applied)
    }

    /// Parses a wire report and applies it through `replace`.
    pub fn apply_report(
        &self,
        device_id: &DeviceId,
        report: DeviceReport,
    ) -> Result<bool, MalformedReport> {
        let candidate = DeviceState::try_from(report)?;
        self.replace(device_id, candidate)
    }

    /// Registers `listener` for `device_id`. The listener is handed the current
    /// state, if any, before it can observe any later update.
    pub fn subscribe(
        &self,
        device_id: &DeviceId,
        listener: Arc<dyn StateListener>,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let joined = self.with_slot(device_id, |slot| {
            if listener.on_join(device_id, slot.state.as_ref()) {
                slot.listeners.push((id, Arc::clone(&listener)));
                true
            } else {
                false
            }
        });
        if !joined {
            self.prune(device_id);
        }
        SubscriptionHandle { device_id: device_id.clone(), id }
    }

    /// Subscribes with a channel listener and returns the receiving side.
    pub fn watch(
        &self,
        device_id: &DeviceId,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(device_id, Arc::new(ChannelListener::new(tx)));
        (handle, rx)
    }

    /// Returns whether the subscription was still registered.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let Some(slot) = self.slot(&handle.device_id) else {
            return false;
        };
        let removed = {
            let mut guard = lock(&slot);
            let before = guard.listeners.len();
            guard.listeners.retain(|(id, _)| *id != handle.id);
            guard.listeners.len() != before
        };
        self.prune(&handle.device_id);
        removed
    }

    /// Evicts the stored state of a deregistered device. Subscribers are told
    /// and stay registered for a future device reusing the id.
    pub fn remove(&self, device_id: &DeviceId) -> bool {
        let Some(slot) = self.slot(device_id) else {
            return false;
        };
        let removed = {
            let mut guard = lock(&slot);
            match guard.state.take() {
                Some(_) => {
                    guard.notify(&StoreEvent::Removed(device_id.clone()));
                    true
                }
                None => false,
            }
        };
        if removed {
            info!(device_id = %device_id, "device state evicted");
        }
        self.prune(device_id);
        removed
    }

    /// Stored states ordered by device id.
    pub fn devices(&self) -> Vec<Arc<DeviceState>> {
        let slots: Vec<SlotRef> = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            slots.values().cloned().collect()
        };
        let mut states: Vec<Arc<DeviceState>> =
            slots.iter().filter_map(|slot| lock(slot).state.clone()).collect();
        states.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        states
    }

    pub fn subscriber_count(&self, device_id: &DeviceId) -> usize {
        self.slot(device_id).map(|slot| lock(&slot).listeners.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlarmState, Ambient, LockState, Mode, WindowPosition};

    fn state(id: &str, revision: u64) -> DeviceState {
        DeviceState {
            device_id: DeviceId::parse(id).unwrap(),
            mode: Mode::Manual,
            window: WindowPosition::Closed,
            lock: LockState::Engaged,
            alarm: AlarmState::Inactive,
            ambient: Ambient { temperature_celsius: 20.0, is_raining: false, is_daytime: true },
            revision,
        }
    }

    #[test]
    fn idle_slots_are_unlinked() {
        let store = StateStore::new();
        let id = DeviceId::parse("w1").unwrap();
        let (handle, _rx) = store.watch(&id);
        assert_eq!(store.slots.read().unwrap().len(), 1);

        assert!(store.unsubscribe(&handle));
        assert!(store.slots.read().unwrap().is_empty());
        assert!(!store.unsubscribe(&handle));
    }

    #[test]
    fn slot_survives_while_state_is_stored() {
        let store = StateStore::new();
        let id = DeviceId::parse("w1").unwrap();
        store.replace(&id, state("w1", 1)).unwrap();
        let (handle, _rx) = store.watch(&id);
        store.unsubscribe(&handle);

        assert_eq!(store.get(&id).map(|s| s.revision), Some(1));
        assert!(store.remove(&id));
        assert!(store.slots.read().unwrap().is_empty());
    }

    #[test]
    fn dead_listeners_are_dropped_on_fan_out() {
        let store = StateStore::new();
        let id = DeviceId::parse("w1").unwrap();
        let (_handle, rx) = store.watch(&id);
        drop(rx);

        store.replace(&id, state("w1", 1)).unwrap();
        assert_eq!(store.subscriber_count(&id), 0);
    }

    #[test]
    fn non_finite_temperature_is_malformed() {
        let store = StateStore::new();
        let id = DeviceId::parse("w1").unwrap();
        let mut bad = state("w1", 1);
        bad.ambient.temperature_celsius = f64::NAN;

        assert!(matches!(
            store.replace(&id, bad),
            Err(MalformedReport::InvalidValue { field: "ambient.temperature_celsius", .. })
        ));
        assert!(store.get(&id).is_none());
    }
}

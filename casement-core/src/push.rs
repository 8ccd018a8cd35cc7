use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    bus_contract::DeviceReport,
    error::{MalformedReport, SessionError, SnapshotError},
    model::{DeviceId, DeviceState},
    store::{StateListener, StateStore, StoreEvent, SubscriptionHandle},
};

/// What a dashboard session receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    Snapshot { state: Arc<DeviceState> },
    Update { state: Arc<DeviceState> },
    NotFound { device_id: DeviceId },
    Removed { device_id: DeviceId },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Applied,
    Stale,
    Malformed,
}

/// External registry consulted when a snapshot is requested for a device that
/// has not reported since this process started.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn fetch(&self, device_id: &DeviceId) -> Result<Option<DeviceReport>>;
}

struct SessionListener {
    tx: mpsc::UnboundedSender<PushFrame>,
}

impl StateListener for SessionListener {
    fn on_join(&self, device_id: &DeviceId, current: Option<&Arc<DeviceState>>) -> bool {
        let frame = match current {
            Some(state) => PushFrame::Snapshot { state: Arc::clone(state) },
            None => PushFrame::NotFound { device_id: device_id.clone() },
        };
        self.tx.send(frame).is_ok()
    }

    fn on_event(&self, event: &StoreEvent) -> bool {
        let frame = match event {
            StoreEvent::Updated(state) => PushFrame::Update { state: Arc::clone(state) },
            StoreEvent::Removed(device_id) => PushFrame::Removed { device_id: device_id.clone() },
        };
        self.tx.send(frame).is_ok()
    }
}

struct SessionEntry {
    tx: mpsc::UnboundedSender<PushFrame>,
    subscriptions: HashMap<DeviceId, SubscriptionHandle>,
}

/// Connects the device reporting side and dashboard sessions to a `StateStore`.
pub struct PushChannel {
    store: Arc<StateStore>,
    directory: Option<Arc<dyn DeviceDirectory>>,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl PushChannel {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store, directory: None, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DeviceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Ingests a report from the device transport. Malformed and stale reports
    /// are logged and absorbed.
    pub fn on_device_report(&self, device_id: &DeviceId, report: DeviceReport) -> ReportOutcome {
        match self.store.apply_report(device_id, report) {
            Ok(true) => {
                debug!(device_id = %device_id, "device report applied");
                ReportOutcome::Applied
            }
            Ok(false) => ReportOutcome::Stale,
            Err(err) => {
                log_malformed(device_id, &err);
                ReportOutcome::Malformed
            }
        }
    }

    /// Current state of `device_id`, falling back to the device directory when
    /// nothing has been reported yet.
    pub async fn request_snapshot(
        &self,
        device_id: &DeviceId,
    ) -> Result<Arc<DeviceState>, SnapshotError> {
        if let Some(state) = self.store.get(device_id) {
            return Ok(state);
        }
        let Some(directory) = &self.directory else {
            return Err(SnapshotError::NotFound(device_id.clone()));
        };

        let fetched = directory
            .fetch(device_id)
            .await
            .map_err(|err| SnapshotError::Directory(format!("{err:#}")))?;
        if let Some(report) = fetched
            && let Err(err) = self.store.apply_report(device_id, report)
        {
            log_malformed(device_id, &err);
        }
        self.store.get(device_id).ok_or_else(|| SnapshotError::NotFound(device_id.clone()))
    }

    /// Opens a dashboard session. Frames for every device the session
    /// subscribes to arrive on the returned receiver.
    pub fn open_session(&self) -> (SessionId, mpsc::UnboundedReceiver<PushFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SessionId::new();
        let entry = SessionEntry { tx, subscriptions: HashMap::new() };
        self.sessions().insert(id, entry);
        debug!(session = %id, "session opened");
        (id, rx)
    }

    /// Subscribes `session` to `device_id`. The session receives a `Snapshot`
    /// or `NotFound` frame first, then every later update. Subscribing again
    /// to the same device restarts the subscription with a fresh snapshot.
    pub fn on_subscribe(
        &self,
        device_id: &DeviceId,
        session: SessionId,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions();
        let entry = sessions.get_mut(&session).ok_or(SessionError::UnknownSession)?;
        if let Some(previous) = entry.subscriptions.remove(device_id) {
            self.store.unsubscribe(&previous);
        }
        let listener = Arc::new(SessionListener { tx: entry.tx.clone() });
        let handle = self.store.subscribe(device_id, listener);
        entry.subscriptions.insert(device_id.clone(), handle);
        debug!(session = %session, device_id = %device_id, "session subscribed");
        Ok(())
    }

    /// Returns whether the session was subscribed to `device_id`.
    pub fn on_unsubscribe(&self, device_id: &DeviceId, session: SessionId) -> bool {
        let mut sessions = self.sessions();
        let Some(handle) =
            sessions.get_mut(&session).and_then(|entry| entry.subscriptions.remove(device_id))
        else {
            return false;
        };
        self.store.unsubscribe(&handle)
    }

    /// Drops every subscription of `session`. Safe to call repeatedly; returns
    /// the number of subscriptions released by this call.
    pub fn on_disconnect(&self, session: SessionId) -> usize {
        let Some(entry) = self.sessions().remove(&session) else {
            return 0;
        };
        let released = entry.subscriptions.len();
        for handle in entry.subscriptions.values() {
            self.store.unsubscribe(handle);
        }
        info!(session = %session, released, "session disconnected");
        released
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_malformed(device_id: &DeviceId, err: &MalformedReport) {
    warn!(
        target: "casement::data_quality",
        device_id = %device_id,
        error = %err,
        "malformed device report"
    );
}

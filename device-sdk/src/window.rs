use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use casement_core::model::{
    Action, AlarmState, Ambient, DeviceId, DeviceState, LockState, Mode, WindowPosition,
};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::runtime::DeviceContext;

/// Everything a window reports except its identity and revision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowReading {
    pub mode: Mode,
    pub window: WindowPosition,
    pub lock: LockState,
    pub alarm: AlarmState,
    pub ambient: Ambient,
}

/// Hardware access for a window controller.
///
/// `apply` may decline an action (the firmware has the final say on its own
/// mode); the component reports whatever `read` returns afterwards.
#[async_trait]
pub trait WindowDriver: Send + Sync + 'static {
    async fn apply(&self, action: Action) -> Result<()>;
    async fn read(&self) -> Result<WindowReading>;
}

/// Runs a window's command loop and publishes a full report with a fresh
/// revision after every command.
#[derive(Clone)]
pub struct WindowComponent {
    ctx: DeviceContext,
    device_id: DeviceId,
    driver: Arc<dyn WindowDriver>,
    revision: Arc<Mutex<u64>>,
}

impl WindowComponent {
    pub fn new(ctx: DeviceContext, device_id: DeviceId, driver: Arc<dyn WindowDriver>) -> Self {
        Self { ctx, device_id, driver, revision: Arc::new(Mutex::new(0)) }
    }

    /// Continues numbering after `revision`, e.g. a value persisted in flash.
    pub fn resume_from(mut self, revision: u64) -> Self {
        self.revision = Arc::new(Mutex::new(revision));
        self
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Revision of the last published report.
    pub async fn revision(&self) -> u64 {
        *self.revision.lock().await
    }

    /// Subscribes to commands, publishes the initial report and spawns the loop.
    pub async fn spawn(self) -> Result<()> {
        let mut commands = self.ctx.subscribe_commands(&self.device_id).await?;
        self.publish_report().await?;

        tokio::spawn(async move {
            while let Some(envelope) = commands.next().await {
                info!(
                    device_id = %self.device_id,
                    action = %envelope.action,
                    correlation_id = %envelope.correlation_id,
                    "received command"
                );
                if let Err(err) = self.driver.apply(envelope.action).await {
                    warn!(device_id = %self.device_id, error = %err, "driver rejected command");
                }
                if let Err(err) = self.publish_report().await {
                    warn!(device_id = %self.device_id, error = %err, "failed to publish report");
                }
            }
            debug!(device_id = %self.device_id, "command stream closed");
        });

        Ok(())
    }

    /// Reads the driver and publishes it under the next revision.
    ///
    /// The revision lock is held from the read until the publish completes, so
    /// a later reading never goes out under a lower revision. A failed read
    /// leaves the counter untouched.
    pub async fn publish_report(&self) -> Result<DeviceState> {
        let mut last = self.revision.lock().await;
        let reading = self.driver.read().await?;
        let revision = *last + 1;
        let state = DeviceState {
            device_id: self.device_id.clone(),
            mode: reading.mode,
            window: reading.window,
            lock: reading.lock,
            alarm: reading.alarm,
            ambient: reading.ambient,
            revision,
        };
        *last = revision;
        self.ctx.publish_report(&state).await?;
        Ok(state)
    }
}

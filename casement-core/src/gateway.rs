use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    bus::Bus,
    bus_contract::{CommandEnvelope, command_topic},
    error::CommandError,
    model::{Action, Command, DeviceId},
    policy::{self, Decision},
    store::StateStore,
};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Outbound path to a device's command endpoint.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, envelope: &CommandEnvelope) -> Result<()>;
}

/// Publishes commands on the per-device command topic.
#[derive(Clone)]
pub struct BusCommandTransport {
    bus: Arc<dyn Bus>,
}

impl BusCommandTransport {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl CommandTransport for BusCommandTransport {
    async fn send(&self, envelope: &CommandEnvelope) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(envelope)?);
        self.bus
            .publish(&command_topic(&envelope.device_id), payload)
            .await
            .context("publish device command")
    }
}

/// The command was handed to the transport. Whether the device acted on it is
/// only known from its next report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub correlation_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// Validates user intents against the device's reported mode and sends them.
///
/// Commands are neither deduplicated nor retried; the next device report is
/// the only authority on what happened.
pub struct CommandGateway {
    store: Arc<StateStore>,
    transport: Arc<dyn CommandTransport>,
    send_timeout: Duration,
}

impl CommandGateway {
    pub fn new(store: Arc<StateStore>, transport: Arc<dyn CommandTransport>) -> Self {
        Self { store, transport, send_timeout: DEFAULT_SEND_TIMEOUT }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub async fn submit(
        &self,
        device_id: &DeviceId,
        action: Action,
    ) -> Result<Accepted, CommandError> {
        self.submit_with_timeout(device_id, action, self.send_timeout).await
    }

    pub async fn submit_with_timeout(
        &self,
        device_id: &DeviceId,
        action: Action,
        send_timeout: Duration,
    ) -> Result<Accepted, CommandError> {
        let Some(state) = self.store.get(device_id) else {
            info!(device_id = %device_id, %action, "command for unknown device");
            return Err(CommandError::DeviceUnknown(device_id.clone()));
        };

        if let Decision::Denied { reason } = policy::can_execute(state.mode, action) {
            info!(device_id = %device_id, %action, mode = state.mode.as_str(), "command denied");
            return Err(CommandError::Denied { reason });
        }

        let envelope = CommandEnvelope::new(Command { device_id: device_id.clone(), action });
        match timeout(send_timeout, self.transport.send(&envelope)).await {
            Ok(Ok(())) => {
                info!(
                    device_id = %device_id,
                    %action,
                    correlation_id = %envelope.correlation_id,
                    "command accepted"
                );
                Ok(Accepted {
                    correlation_id: envelope.correlation_id,
                    issued_at: envelope.issued_at,
                })
            }
            Ok(Err(err)) => {
                let error = format!("{err:#}");
                warn!(device_id = %device_id, %action, %error, "command send failed");
                Err(CommandError::Transport(error))
            }
            Err(_) => {
                warn!(device_id = %device_id, %action, ?send_timeout, "command send timed out");
                Err(CommandError::Timeout(send_timeout))
            }
        }
    }
}

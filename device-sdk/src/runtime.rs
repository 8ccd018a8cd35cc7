use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use casement_core::{
    bus::Bus,
    bus_contract::{
        CommandEnvelope, DeviceReport, Deregister, TOPIC_DEVICE_DEREGISTER, command_topic,
        report_topic,
    },
    model::{DeviceId, DeviceState},
};
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

pub type CommandStream = Box<dyn Stream<Item = CommandEnvelope> + Unpin + Send>;

/// A thin wrapper around the message bus that standardizes how window
/// firmware publishes reports and receives commands.
#[derive(Clone)]
pub struct DeviceContext {
    bus: Arc<dyn Bus>,
}

impl DeviceContext {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub async fn publish_report(&self, state: &DeviceState) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(&DeviceReport::from(state))?);
        self.bus
            .publish(&report_topic(&state.device_id), bytes)
            .await
            .context("publish device report")
    }

    /// Asks the hub to forget the device, e.g. on factory reset.
    pub async fn deregister(&self, device_id: &DeviceId) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(&Deregister { device_id: device_id.clone() })?);
        self.bus.publish(TOPIC_DEVICE_DEREGISTER, bytes).await.context("publish deregister")
    }

    pub async fn subscribe_commands(&self, device_id: &DeviceId) -> Result<CommandStream> {
        let device_id = device_id.clone();
        let stream = self.bus.subscribe(&command_topic(&device_id)).await?.filter_map(move |msg| {
            let parsed = serde_json::from_slice::<CommandEnvelope>(&msg.payload);
            match parsed {
                Ok(envelope) if envelope.device_id == device_id => Some(envelope),
                Ok(envelope) => {
                    warn!(
                        device_id = %device_id,
                        addressed_to = %envelope.device_id,
                        "dropping command addressed to another device"
                    );
                    None
                }
                Err(err) => {
                    warn!(device_id = %device_id, error = %err, "failed to decode command payload");
                    None
                }
            }
        });
        Ok(Box::new(stream))
    }
}

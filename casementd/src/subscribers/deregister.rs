use anyhow::Result;
use casement_core::bus_contract::{Deregister, TOPIC_DEVICE_DEREGISTER};
use metrics::counter;
use tokio_stream::StreamExt;

use crate::state::AppState;

pub async fn spawn(app: AppState) -> Result<()> {
    let mut stream = app.bus.subscribe(TOPIC_DEVICE_DEREGISTER).await?;
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match serde_json::from_slice::<Deregister>(&msg.payload) {
                Ok(v) => {
                    if !app.store.remove(&v.device_id) {
                        tracing::debug!(device_id = %v.device_id, "deregister for unknown device");
                    }
                }
                Err(e) => {
                    counter!("bus.message.decode_error").increment(1);
                    tracing::warn!("bad deregister payload: {e}");
                }
            }
        }
    });
    Ok(())
}

use anyhow::Result;
use casement_core::{
    bus_contract::{DeviceReport, TOPIC_REPORT_PREFIX, device_id_from_topic},
    push::ReportOutcome,
};
use chrono::Utc;
use metrics::{counter, histogram};
use tokio_stream::StreamExt;

use crate::state::AppState;

pub async fn spawn(app: AppState) -> Result<()> {
    let mut stream = app.bus.subscribe(&format!("{TOPIC_REPORT_PREFIX}*")).await?;
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let latency_ms = (Utc::now() - msg.received_at).num_milliseconds();
            histogram!("bus.message.latency_ms").record(latency_ms as f64);

            let Some(device_id) = device_id_from_topic(TOPIC_REPORT_PREFIX, &msg.topic) else {
                counter!("bus.message.decode_error").increment(1);
                tracing::warn!(topic = %msg.topic, "report on topic without a valid device id");
                continue;
            };
            match serde_json::from_slice::<DeviceReport>(&msg.payload) {
                Ok(report) => match app.push.on_device_report(&device_id, report) {
                    ReportOutcome::Applied => counter!("report.applied").increment(1),
                    ReportOutcome::Stale => counter!("report.stale").increment(1),
                    ReportOutcome::Malformed => counter!("report.malformed").increment(1),
                },
                Err(e) => {
                    counter!("bus.message.decode_error").increment(1);
                    tracing::warn!(device_id = %device_id, "bad device report payload: {e}");
                }
            }
        }
        tracing::info!("report stream closed");
    });
    Ok(())
}

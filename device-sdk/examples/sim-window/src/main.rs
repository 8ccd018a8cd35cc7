use std::sync::Arc;

use anyhow::Result;
use casement_core::{
    bus::{Bus, InMemoryBus},
    bus_contract::{DeviceReport, TOPIC_REPORT_PREFIX, device_id_from_topic},
    gateway::{BusCommandTransport, CommandGateway},
    model::{Action, Ambient, DeviceId},
    push::{PushChannel, PushFrame},
    store::StateStore,
};
use device_sdk::{runtime::DeviceContext, sim::SimulatedWindow, window::WindowComponent};
use tokio::{
    sync::mpsc::UnboundedReceiver,
    time::{Duration, sleep, timeout},
};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

async fn pump_reports(bus: Arc<dyn Bus>, push: Arc<PushChannel>) -> Result<()> {
    let mut reports = bus.subscribe(&format!("{TOPIC_REPORT_PREFIX}*")).await?;
    tokio::spawn(async move {
        while let Some(msg) = reports.next().await {
            let Some(device_id) = device_id_from_topic(TOPIC_REPORT_PREFIX, &msg.topic) else {
                continue;
            };
            match serde_json::from_slice::<DeviceReport>(&msg.payload) {
                Ok(report) => {
                    push.on_device_report(&device_id, report);
                }
                Err(err) => tracing::warn!(error = %err, "undecodable report"),
            }
        }
    });
    Ok(())
}

async fn drain(frames: &mut UnboundedReceiver<PushFrame>) {
    while let Ok(Some(frame)) = timeout(Duration::from_millis(50), frames.recv()).await {
        match frame {
            PushFrame::Snapshot { state } | PushFrame::Update { state } => tracing::info!(
                revision = state.revision,
                mode = state.mode.as_str(),
                window = state.window.as_str(),
                lock = state.lock.as_str(),
                "dashboard frame"
            ),
            other => tracing::info!(?other, "dashboard frame"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).without_time().init();

    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::default());
    let store = Arc::new(StateStore::new());
    let push = Arc::new(PushChannel::new(store.clone()));
    let gateway = CommandGateway::new(store, Arc::new(BusCommandTransport::new(bus.clone())));
    pump_reports(bus.clone(), push.clone()).await?;

    let device_id = DeviceId::parse("sim-window-1")?;
    let window = Arc::new(SimulatedWindow::closed_manual(Ambient {
        temperature_celsius: 26.0,
        is_raining: false,
        is_daytime: true,
    }));
    let component =
        WindowComponent::new(DeviceContext::new(bus.clone()), device_id.clone(), window.clone());
    component.clone().spawn().await?;
    sleep(Duration::from_millis(50)).await;

    let (session, mut frames) = push.open_session();
    push.on_subscribe(&device_id, session)?;
    drain(&mut frames).await;

    for action in [Action::Open, Action::ToggleMode, Action::Close] {
        match gateway.submit(&device_id, action).await {
            Ok(accepted) => {
                tracing::info!(%action, correlation_id = %accepted.correlation_id, "accepted")
            }
            Err(err) => tracing::info!(%action, %err, "command refused"),
        }
        drain(&mut frames).await;
    }

    // Weather turns; the window closes itself and reports.
    window.set_ambient(Ambient { temperature_celsius: 17.0, is_raining: true, is_daytime: true });
    component.publish_report().await?;
    drain(&mut frames).await;

    push.on_disconnect(session);
    Ok(())
}

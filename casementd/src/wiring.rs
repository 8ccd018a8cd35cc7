use std::sync::Arc;

use adapter_mqtt::MqttBus;
use anyhow::Result;
use casement_core::bus::{Bus, InMemoryBus};

use crate::{
    config::{BusKind, Config},
    directory::HttpDirectory,
    state::AppState,
};

pub async fn build_state(cfg: &Config) -> Result<AppState> {
    let bus: Arc<dyn Bus> = match cfg.bus {
        BusKind::InMem => Arc::new(InMemoryBus::default()),
        BusKind::Mqtt => {
            Arc::new(MqttBus::connect(&cfg.mqtt.host, cfg.mqtt.port, &cfg.mqtt.client_id).await?)
        }
    };

    let state = AppState::new(bus, cfg.command_timeout, cfg.ws_ping);
    match &cfg.directory_url {
        Some(url) => {
            tracing::info!(%url, "device directory fallback enabled");
            let directory = HttpDirectory::new(url.clone(), cfg.command_timeout)?;
            Ok(state.with_directory(Arc::new(directory)))
        }
        None => Ok(state),
    }
}

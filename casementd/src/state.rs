use std::{sync::Arc, time::Duration};

use casement_core::{
    bus::Bus,
    gateway::{BusCommandTransport, CommandGateway, CommandTransport},
    push::{DeviceDirectory, PushChannel},
    store::StateStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub push: Arc<PushChannel>,
    pub gateway: Arc<CommandGateway>,
    pub bus: Arc<dyn Bus>,
    pub ws_ping: Duration,
}

impl AppState {
    /// Commands travel over `bus` to the per-device command topics.
    pub fn new(bus: Arc<dyn Bus>, command_timeout: Duration, ws_ping: Duration) -> Self {
        let transport = Arc::new(BusCommandTransport::new(bus.clone()));
        Self::with_transport(bus, transport, command_timeout, ws_ping)
    }

    pub fn with_transport(
        bus: Arc<dyn Bus>,
        transport: Arc<dyn CommandTransport>,
        command_timeout: Duration,
        ws_ping: Duration,
    ) -> Self {
        let store = Arc::new(StateStore::new());
        let push = Arc::new(PushChannel::new(store.clone()));
        let gateway = Arc::new(
            CommandGateway::new(store.clone(), transport).with_send_timeout(command_timeout),
        );
        Self { store, push, gateway, bus, ws_ping }
    }

    /// Falls back to `directory` for snapshots of devices that have not
    /// reported yet. Call before any session is opened.
    pub fn with_directory(mut self, directory: Arc<dyn DeviceDirectory>) -> Self {
        let push = PushChannel::new(self.store.clone()).with_directory(directory);
        self.push = Arc::new(push);
        self
    }
}

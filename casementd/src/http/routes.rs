use crate::{
    http::{handlers as h, ws},
    state::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(h::healthz))
        .route("/devices", get(h::list_devices))
        .route("/devices/{device_id}", delete(h::delete_device))
        .route("/devices/{device_id}/state", get(h::get_state))
        .route("/devices/{device_id}/commands", post(h::send_command))
        .route("/reports", post(h::post_report))
        .merge(ws::router())
        .with_state(state)
}

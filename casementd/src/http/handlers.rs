use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use casement_core::{
    bus_contract::DeviceReport,
    error::{CommandError, SnapshotError},
    model::{Action, DeviceId},
    push::ReportOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn list_devices(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.store.devices())
}

pub async fn get_state(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let device_id = match parse_device_id(&device_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match app.push.request_snapshot(&device_id).await {
        Ok(state) => Json(state).into_response(),
        Err(e @ SnapshotError::NotFound(_)) => reason(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ SnapshotError::Directory(_)) => reason(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

pub async fn delete_device(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let device_id = match parse_device_id(&device_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    app.store.remove(&device_id);
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub action: Action,
}

pub async fn send_command(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<CommandBody>,
) -> impl IntoResponse {
    let device_id = match parse_device_id(&device_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match app.gateway.submit(&device_id, body.action).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(err) => reason(command_error_status(&err), err.to_string()),
    }
}

#[derive(Serialize)]
pub struct ReportResp {
    applied: bool,
}

pub async fn post_report(
    State(app): State<AppState>,
    Json(report): Json<DeviceReport>,
) -> impl IntoResponse {
    let device_id = match report.device_id() {
        Ok(id) => id,
        Err(e) => return reason(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };
    match app.push.on_device_report(&device_id, report) {
        ReportOutcome::Applied => {
            (StatusCode::ACCEPTED, Json(ReportResp { applied: true })).into_response()
        }
        ReportOutcome::Stale => {
            (StatusCode::ACCEPTED, Json(ReportResp { applied: false })).into_response()
        }
        ReportOutcome::Malformed => {
            reason(StatusCode::UNPROCESSABLE_ENTITY, "malformed report".into())
        }
    }
}

pub fn command_error_status(err: &CommandError) -> StatusCode {
    match err {
        CommandError::Denied { .. } => StatusCode::CONFLICT,
        CommandError::DeviceUnknown(_) => StatusCode::NOT_FOUND,
        CommandError::Transport(_) => StatusCode::BAD_GATEWAY,
        CommandError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn parse_device_id(raw: &str) -> Result<DeviceId, Response> {
    DeviceId::parse(raw).map_err(|e| reason(StatusCode::BAD_REQUEST, e.to_string()))
}

fn reason(status: StatusCode, reason: String) -> Response {
    (status, Json(json!({ "reason": reason }))).into_response()
}

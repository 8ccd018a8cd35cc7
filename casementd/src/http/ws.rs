use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{Router, extract::State, response::IntoResponse, routing::get};
use bytes::Bytes;
use casement_core::{
    error::CommandError,
    gateway::Accepted,
    model::{Action, DeviceId},
    push::SessionId,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{
    select,
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

/// Frames a dashboard sends over the socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { device_id: DeviceId },
    Unsubscribe { device_id: DeviceId },
    Command { device_id: DeviceId, action: Action },
}

/// Replies to client frames. State pushes are sent as `PushFrame`s.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    CommandResult {
        device_id: DeviceId,
        action: Action,
        #[serde(flatten)]
        outcome: CommandOutcome,
    },
    Error {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted(Accepted),
    Rejected { error: &'static str, reason: String },
}

impl From<Result<Accepted, CommandError>> for CommandOutcome {
    fn from(result: Result<Accepted, CommandError>) -> Self {
        match result {
            Ok(accepted) => CommandOutcome::Accepted(accepted),
            Err(err) => {
                let error = match err {
                    CommandError::Denied { .. } => "denied",
                    CommandError::DeviceUnknown(_) => "device_unknown",
                    CommandError::Transport(_) => "transport",
                    CommandError::Timeout(_) => "timeout",
                };
                CommandOutcome::Rejected { error, reason: err.to_string() }
            }
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

pub async fn upgrade(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, app))
}

/// Applies one client frame to the session. Returns the reply, if any.
pub async fn handle_client_frame(
    app: &AppState,
    session: SessionId,
    frame: ClientFrame,
) -> Option<ServerFrame> {
    match frame {
        ClientFrame::Subscribe { device_id } => match app.push.on_subscribe(&device_id, session) {
            Ok(()) => None,
            Err(e) => Some(ServerFrame::Error { reason: e.to_string() }),
        },
        ClientFrame::Unsubscribe { device_id } => {
            app.push.on_unsubscribe(&device_id, session);
            None
        }
        ClientFrame::Command { device_id, action } => {
            let outcome = app.gateway.submit(&device_id, action).await.into();
            Some(ServerFrame::CommandResult { device_id, action, outcome })
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, frame: &T) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("failed to encode websocket frame: {e}");
            Ok(())
        }
    }
}

/// First tick one period from now. Ticks missed while a send was stalled are
/// not replayed back to back, so a pong always gets a full period.
fn ping_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_session(mut socket: WebSocket, app: AppState) {
    let (session, mut frames) = app.push.open_session();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<ServerFrame>();
    let mut ticker = ping_ticker(app.ws_ping);
    let mut awaiting_pong = false;
    info!(%session, "dashboard session opened");

    loop {
        select! {
            incoming = socket.recv() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(%session, "websocket error: {e}");
                        break;
                    }
                    None => break,
                };
                awaiting_pong = false;
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let reply = ServerFrame::Error { reason: format!("invalid frame: {e}") };
                        if send_json(&mut socket, &reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                if let ClientFrame::Command { .. } = frame {
                    // Sends may take up to the command timeout; keep pushing meanwhile.
                    let app = app.clone();
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = handle_client_frame(&app, session, frame).await {
                            let _ = reply_tx.send(reply);
                        }
                    });
                } else if let Some(reply) = handle_client_frame(&app, session, frame).await {
                    if send_json(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
            Some(frame) = frames.recv() => {
                if send_json(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            Some(reply) = replies.recv() => {
                if send_json(&mut socket, &reply).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if awaiting_pong {
                    warn!(%session, "websocket ping unanswered, closing session");
                    break;
                }
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    let released = app.push.on_disconnect(session);
    info!(%session, released, "dashboard session closed");
}

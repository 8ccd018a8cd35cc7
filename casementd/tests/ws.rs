use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use casement_core::{
    bus::InMemoryBus,
    bus_contract::DeviceReport,
    model::{AlarmState, Ambient, DeviceId, DeviceState, LockState, Mode, WindowPosition},
};
use casementd::{http::build_router, state::AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn w1() -> DeviceId {
    DeviceId::parse("w1").unwrap()
}

fn report(revision: u64, window: WindowPosition) -> DeviceReport {
    DeviceReport::from(&DeviceState {
        device_id: w1(),
        mode: Mode::Manual,
        window,
        lock: LockState::Disengaged,
        alarm: AlarmState::Inactive,
        ambient: Ambient { temperature_celsius: 19.0, is_raining: false, is_daytime: true },
        revision,
    })
}

fn app_state(ws_ping: Duration) -> AppState {
    AppState::new(Arc::new(InMemoryBus::default()), Duration::from_secs(1), ws_ping)
}

async fn serve(state: AppState) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = build_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

async fn connect(addr: SocketAddr) -> Result<Client> {
    let (client, _response) = connect_async(format!("ws://{addr}/ws")).await?;
    Ok(client)
}

async fn send(client: &mut Client, frame: Value) -> Result<()> {
    client.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}

async fn next_json(client: &mut Client) -> Result<Value> {
    loop {
        let msg = timeout(Duration::from_secs(2), client.next())
            .await?
            .ok_or_else(|| anyhow!("socket closed"))??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

async fn eventually(check: impl Fn() -> bool) -> Result<()> {
    timeout(Duration::from_secs(2), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn session_pushes_replies_and_releases_on_close() -> Result<()> {
    let state = app_state(Duration::from_secs(15));
    state.push.on_device_report(&w1(), report(1, WindowPosition::Closed));
    let mut client = connect(serve(state.clone()).await?).await?;

    send(&mut client, json!({ "type": "subscribe", "device_id": "w1" })).await?;
    let snapshot = next_json(&mut client).await?;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["state"]["revision"], 1);
    assert_eq!(state.push.session_count(), 1);
    assert_eq!(state.store.subscriber_count(&w1()), 1);

    send(&mut client, json!({ "type": "command", "device_id": "w1", "action": "open" })).await?;
    let reply = next_json(&mut client).await?;
    assert_eq!(reply["type"], "command_result");
    assert_eq!(reply["outcome"], "accepted");

    state.push.on_device_report(&w1(), report(2, WindowPosition::Open));
    let update = next_json(&mut client).await?;
    assert_eq!(update["type"], "update");
    assert_eq!(update["state"]["window"], "open");

    send(&mut client, json!({ "type": "subscribe" })).await?;
    assert_eq!(next_json(&mut client).await?["type"], "error");

    client.close(None).await?;
    eventually(|| state.push.session_count() == 0).await?;
    assert_eq!(state.store.subscriber_count(&w1()), 0);
    Ok(())
}

#[tokio::test]
async fn dropped_connection_releases_subscriptions() -> Result<()> {
    let state = app_state(Duration::from_secs(15));
    let mut client = connect(serve(state.clone()).await?).await?;

    send(&mut client, json!({ "type": "subscribe", "device_id": "w1" })).await?;
    assert_eq!(next_json(&mut client).await?["type"], "not_found");
    assert_eq!(state.store.subscriber_count(&w1()), 1);

    drop(client);
    eventually(|| state.push.session_count() == 0).await?;
    assert_eq!(state.store.subscriber_count(&w1()), 0);
    Ok(())
}

#[tokio::test]
async fn unanswered_pings_close_the_session() -> Result<()> {
    let state = app_state(Duration::from_millis(100));
    let mut client = connect(serve(state.clone()).await?).await?;
    send(&mut client, json!({ "type": "subscribe", "device_id": "w1" })).await?;
    assert_eq!(next_json(&mut client).await?["type"], "not_found");

    // The client stops reading, so no pong is ever written back.
    eventually(|| state.push.session_count() == 0).await?;
    assert_eq!(state.store.subscriber_count(&w1()), 0);
    drop(client);
    Ok(())
}

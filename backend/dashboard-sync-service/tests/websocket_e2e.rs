/// End-to-end tests: real server on an ephemeral port, WebSocket clients
/// driven by tokio-tungstenite and update triggers sent over HTTP.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dashboard_sync_service::{config::Config, server, state::AppState};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};

struct TestServer {
    state: AppState,
    http: String,
    ws: String,
}

fn start_server() -> Result<TestServer> {
    let state = AppState::new(Arc::new(Config::test_defaults()));
    let (srv, addrs) = server::build(state.clone())?;
    let addr = addrs.first().context("server bound no address")?;
    actix_rt::spawn(srv);

    Ok(TestServer {
        state,
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}/ws"),
    })
}

/// Wait for the next text frame, skipping pings and other control frames.
async fn next_event<S>(ws: &mut S) -> Result<Value>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .context("timed out waiting for frame")?
            .ok_or_else(|| anyhow!("websocket closed"))??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

async fn assert_silent<S>(ws: &mut S)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let res = timeout(Duration::from_millis(300), next_event(ws)).await;
    assert!(res.is_err(), "unexpected frame: {:?}", res);
}

async fn wait_for_members(state: &AppState, room: &str, expected: usize) {
    for _ in 0..50 {
        if state.hub.member_count(room) == expected {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "room {room} has {} members, expected {expected}",
        state.hub.member_count(room)
    );
}

fn join_frame(room: &str) -> Message {
    Message::text(json!({"event": "JOIN_ROOM", "data": room}).to_string())
}

#[actix_web::test]
async fn test_join_then_config_and_profile_updates() -> Result<()> {
    let srv = start_server()?;
    let (mut ws, _) = connect_async(srv.ws.as_str()).await?;

    let connected = next_event(&mut ws).await?;
    assert_eq!(connected["event"], "CONNECTED");

    ws.send(join_frame("U1")).await?;
    let joined = next_event(&mut ws).await?;
    assert_eq!(joined, json!({"event": "ROOM_JOINED", "data": "U1"}));

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/internal/v1/rooms/U1/config", srv.http))
        .json(&json!({"owner_id": "U1", "name": "My Profile", "modules": ["w1"]}))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 202);
    let body: Value = resp.json().await?;
    assert_eq!(body["delivered"], 1);

    let update = next_event(&mut ws).await?;
    assert_eq!(update["event"], "UPDATED_CONFIG");
    assert_eq!(update["data"]["owner_id"], "U1");
    assert_eq!(update["data"]["name"], "My Profile");

    let resp = client
        .post(format!("{}/internal/v1/updates", srv.http))
        .json(&json!({
            "room_id": "U1",
            "source": "profile",
            "payload": {"owner_id": "U1", "name": {"first": "Sam", "last": "Heutmaker"}}
        }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 202);

    let update = next_event(&mut ws).await?;
    assert_eq!(update["event"], "UPDATED_CONFIG");
    assert_eq!(update["data"]["owner_id"], "U1");
    assert_eq!(update["data"]["name"]["first"], "Sam");

    Ok(())
}

#[actix_web::test]
async fn test_two_clients_same_room_receive_same_payload() -> Result<()> {
    let srv = start_server()?;
    let (mut a, _) = connect_async(srv.ws.as_str()).await?;
    let (mut b, _) = connect_async(srv.ws.as_str()).await?;
    next_event(&mut a).await?;
    next_event(&mut b).await?;

    a.send(join_frame("U1")).await?;
    b.send(join_frame("U1")).await?;
    assert_eq!(next_event(&mut a).await?["event"], "ROOM_JOINED");
    assert_eq!(next_event(&mut b).await?["event"], "ROOM_JOINED");

    let payload = json!({"owner_id": "U1", "name": "shared"});
    reqwest::Client::new()
        .post(format!("{}/internal/v1/rooms/U1/config", srv.http))
        .json(&payload)
        .send()
        .await?;

    let from_a = next_event(&mut a).await?;
    let from_b = next_event(&mut b).await?;
    assert_eq!(from_a["data"], payload);
    assert_eq!(from_a, from_b);

    Ok(())
}

#[actix_web::test]
async fn test_other_room_update_is_not_delivered() -> Result<()> {
    let srv = start_server()?;
    let (mut ws, _) = connect_async(srv.ws.as_str()).await?;
    next_event(&mut ws).await?;

    ws.send(join_frame("U1")).await?;
    next_event(&mut ws).await?;

    let resp = reqwest::Client::new()
        .post(format!("{}/internal/v1/rooms/U2/config", srv.http))
        .json(&json!({"owner_id": "U2"}))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 202);

    assert_silent(&mut ws).await;
    Ok(())
}

#[actix_web::test]
async fn test_disconnect_removes_membership() -> Result<()> {
    let srv = start_server()?;
    let (mut ws, _) = connect_async(srv.ws.as_str()).await?;
    next_event(&mut ws).await?;

    ws.send(join_frame("U1")).await?;
    next_event(&mut ws).await?;
    wait_for_members(&srv.state, "U1", 1).await;

    ws.close(None).await?;
    wait_for_members(&srv.state, "U1", 0).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/internal/v1/rooms/U1/config", srv.http))
        .json(&json!({"owner_id": "U1"}))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 202);
    let body: Value = resp.json().await?;
    assert_eq!(body["delivered"], 0);
    assert_eq!(srv.state.hub.stats().rooms, 0);

    Ok(())
}

#[actix_web::test]
async fn test_invalid_frames_get_error_and_keep_connection() -> Result<()> {
    let srv = start_server()?;
    let (mut ws, _) = connect_async(srv.ws.as_str()).await?;
    next_event(&mut ws).await?;

    ws.send(join_frame("")).await?;
    let err = next_event(&mut ws).await?;
    assert_eq!(err["event"], "ERROR");
    assert_eq!(err["data"]["code"], "INVALID_ROOM");

    ws.send(Message::text("not json")).await?;
    let err = next_event(&mut ws).await?;
    assert_eq!(err["event"], "ERROR");

    ws.send(join_frame("U1")).await?;
    let joined = next_event(&mut ws).await?;
    assert_eq!(joined["event"], "ROOM_JOINED");

    Ok(())
}

#[actix_web::test]
async fn test_binary_frame_gets_unsupported_error() -> Result<()> {
    let srv = start_server()?;
    let (mut ws, _) = connect_async(srv.ws.as_str()).await?;
    next_event(&mut ws).await?;

    ws.send(Message::binary(vec![0x01, 0x02, 0x03])).await?;
    let err = next_event(&mut ws).await?;
    assert_eq!(err["event"], "ERROR");
    assert_eq!(err["data"]["code"], "UNSUPPORTED_FRAME");

    // Session stays usable
    ws.send(join_frame("U1")).await?;
    assert_eq!(next_event(&mut ws).await?["event"], "ROOM_JOINED");

    Ok(())
}

#[actix_web::test]
async fn test_leave_room_stops_updates() -> Result<()> {
    let srv = start_server()?;
    let (mut ws, _) = connect_async(srv.ws.as_str()).await?;
    next_event(&mut ws).await?;

    ws.send(join_frame("U1")).await?;
    next_event(&mut ws).await?;

    ws.send(Message::text(
        json!({"event": "LEAVE_ROOM", "data": "U1"}).to_string(),
    ))
    .await?;
    let left = next_event(&mut ws).await?;
    assert_eq!(left, json!({"event": "ROOM_LEFT", "data": "U1"}));
    wait_for_members(&srv.state, "U1", 0).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/internal/v1/rooms/U1/config", srv.http))
        .json(&json!({"owner_id": "U1"}))
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["delivered"], 0);

    assert_silent(&mut ws).await;
    assert_eq!(srv.state.hub.stats().connections, 1);

    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket integration tests using real connections against an in-process
//! axum server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use bridgeterm::pty::spawn::NativeSpawner;
use bridgeterm::test_support::{spawn_http_server, wait_until, AppStateBuilder, FakeSpawner};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a JSON message over the WebSocket.
async fn ws_send(stream: &mut WsTx, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    stream.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
    Ok(())
}

async fn ws_next(stream: &mut WsRx, timeout: Duration) -> anyhow::Result<WsMessage> {
    tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
        .map_err(|e| anyhow::anyhow!("ws recv: {e}"))
}

/// Receive a JSON message from the WebSocket with timeout.
async fn ws_recv(stream: &mut WsRx, timeout: Duration) -> anyhow::Result<serde_json::Value> {
    match ws_next(stream, timeout).await? {
        WsMessage::Text(text) => {
            let parsed: serde_json::Value = serde_json::from_str(&text)?;
            Ok(parsed)
        }
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

/// Receive the server's close frame, skipping any text still in flight.
async fn ws_recv_close(stream: &mut WsRx) -> anyhow::Result<CloseFrame> {
    loop {
        match ws_next(stream, RECV_TIMEOUT).await? {
            WsMessage::Close(Some(frame)) => return Ok(frame),
            WsMessage::Close(None) => anyhow::bail!("close without frame"),
            _ => continue,
        }
    }
}

/// Collect stdout frames until their concatenation contains `needle`.
async fn ws_recv_stdout_until(stream: &mut WsRx, needle: &str) -> anyhow::Result<String> {
    let mut output = String::new();
    while !output.contains(needle) {
        let msg = ws_recv(stream, RECV_TIMEOUT).await?;
        if msg["event"] == "stdout" {
            output.push_str(msg["data"].as_str().unwrap_or_default());
        }
    }
    Ok(output)
}

/// Connect a WebSocket to the terminal endpoint.
async fn ws_connect(addr: &std::net::SocketAddr) -> anyhow::Result<(WsTx, WsRx)> {
    let url = format!("ws://{addr}/platform-tools/terminal");
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(stream.split())
}

fn start(cols: u16, rows: u16) -> serde_json::Value {
    json!({ "event": "start-session", "data": { "cols": cols, "rows": rows } })
}

#[tokio::test]
async fn late_joiner_receives_replay_then_live_output() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let state = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut a_tx, mut a_rx) = ws_connect(&addr).await?;
    ws_send(&mut a_tx, &start(80, 24)).await?;
    wait_until(|| spawner.spawn_count() == 1).await?;
    let shell = spawner.last()?;
    shell.emit("$ ls\r\n").await?;
    shell.emit("config.json\r\n").await?;
    assert_eq!(ws_recv_stdout_until(&mut a_rx, "config.json").await?, "$ ls\r\nconfig.json\r\n");

    let (mut b_tx, mut b_rx) = ws_connect(&addr).await?;
    ws_send(&mut b_tx, &start(120, 40)).await?;
    let replay = ws_recv(&mut b_rx, RECV_TIMEOUT).await?;
    assert_eq!(replay, json!({ "event": "stdout", "data": "$ ls\r\nconfig.json\r\n" }));

    shell.emit("$ ").await?;
    for rx in [&mut a_rx, &mut b_rx] {
        let live = ws_recv(rx, RECV_TIMEOUT).await?;
        assert_eq!(live, json!({ "event": "stdout", "data": "$ " }));
    }
    assert_eq!(spawner.spawn_count(), 1);
    assert_eq!(state.manager.status().attached_clients, 2);
    Ok(())
}

#[tokio::test]
async fn stdin_from_socket_reaches_shared_shell() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let state = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).build();
    let (addr, _handle) = spawn_http_server(state).await?;

    let (mut tx, _rx) = ws_connect(&addr).await?;
    ws_send(&mut tx, &start(80, 24)).await?;
    ws_send(&mut tx, &json!({ "event": "stdin", "data": "uptime\r" })).await?;
    ws_send(&mut tx, &json!({ "event": "resize", "data": { "cols": 132, "rows": 50 } })).await?;

    wait_until(|| spawner.last().map(|p| p.resizes().len() == 1).unwrap_or(false)).await?;
    let shell = spawner.last()?;
    assert_eq!(shell.written(), "uptime\r");
    assert_eq!(shell.resizes()[0].cols, 132);
    Ok(())
}

#[tokio::test]
async fn disconnect_keeps_persistent_session() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let state = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, rx) = ws_connect(&addr).await?;
    ws_send(&mut tx, &start(80, 24)).await?;
    wait_until(|| state.manager.status().attached_clients == 1).await?;
    tx.send(WsMessage::Close(None)).await?;
    drop((tx, rx));

    wait_until(|| state.manager.status().attached_clients == 0).await?;
    assert!(state.manager.has_persistent_session());
    assert!(!spawner.last()?.is_killed());
    Ok(())
}

#[tokio::test]
async fn destroy_closes_attached_sockets() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let state = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_connect(&addr).await?;
    ws_send(&mut tx, &start(80, 24)).await?;
    wait_until(|| state.manager.status().attached_clients == 1).await?;

    state.manager.destroy_persistent_session();

    let frame = ws_recv_close(&mut rx).await?;
    assert_eq!(u16::from(frame.code), 1000);
    assert_eq!(frame.reason.as_str(), "session destroyed");
    assert!(!state.manager.has_persistent_session());
    Ok(())
}

#[tokio::test]
async fn shared_shell_exit_reaches_every_socket() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let state = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut a_tx, mut a_rx) = ws_connect(&addr).await?;
    let (mut b_tx, mut b_rx) = ws_connect(&addr).await?;
    ws_send(&mut a_tx, &start(80, 24)).await?;
    ws_send(&mut b_tx, &start(80, 24)).await?;
    wait_until(|| state.manager.status().attached_clients == 2).await?;

    spawner.last()?.exit(0).await?;
    for rx in [&mut a_rx, &mut b_rx] {
        let msg = ws_recv(rx, RECV_TIMEOUT).await?;
        assert_eq!(msg, json!({ "event": "process-exit", "data": 0 }));
    }
    wait_until(|| !state.manager.has_persistent_session()).await?;
    Ok(())
}

#[tokio::test]
async fn disabled_terminal_closes_with_policy_violation() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let state = AppStateBuilder::new().enabled(false).spawner(spawner.clone()).build();
    let (addr, _handle) = spawn_http_server(state).await?;

    let (mut tx, mut rx) = ws_connect(&addr).await?;
    // Anything sent races the close; the server never spawns regardless.
    let _ = ws_send(&mut tx, &start(80, 24)).await;

    let frame = ws_recv_close(&mut rx).await?;
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(frame.reason.as_str(), "terminal disabled");
    assert_eq!(spawner.spawn_count(), 0);
    Ok(())
}

#[tokio::test]
async fn invalid_message_gets_error_frame() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(state).await?;

    let (mut tx, mut rx) = ws_connect(&addr).await?;
    ws_send(&mut tx, &json!({ "event": "launch-missiles" })).await?;
    let msg = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(msg["event"], "error");
    assert_eq!(msg["data"]["code"], "BAD_REQUEST");

    // The connection stays usable.
    ws_send(&mut tx, &json!({ "event": "resize", "data": { "cols": 0, "rows": 0 } })).await?;
    let msg = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(msg["data"]["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn transient_shell_round_trip() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().persistence(false).spawner(Arc::new(NativeSpawner)).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_connect(&addr).await?;
    ws_send(&mut tx, &start(80, 24)).await?;
    ws_send(&mut tx, &json!({ "event": "stdin", "data": "echo marker-$((40 + 2))\r" })).await?;
    ws_recv_stdout_until(&mut rx, "marker-42").await?;

    ws_send(&mut tx, &json!({ "event": "stdin", "data": "exit 3\r" })).await?;
    loop {
        let msg = ws_recv(&mut rx, RECV_TIMEOUT).await?;
        if msg["event"] == "process-exit" {
            assert_eq!(msg["data"], 3);
            break;
        }
    }
    assert!(!state.manager.has_persistent_session());
    Ok(())
}

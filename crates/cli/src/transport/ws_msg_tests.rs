// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::{ClientMessage, ServerMessage};
use crate::error::ErrorCode;
use crate::pty::TermSize;

#[yare::parameterized(
    start      = { json!({"event": "start-session", "data": {"cols": 120, "rows": 40}}),
                   ClientMessage::StartSession { cols: Some(120), rows: Some(40) } },
    start_bare = { json!({"event": "start-session", "data": {}}),
                   ClientMessage::StartSession { cols: None, rows: None } },
    stdin      = { json!({"event": "stdin", "data": "ls -la\r"}), ClientMessage::Stdin("ls -la\r".into()) },
    resize     = { json!({"event": "resize", "data": {"cols": 100, "rows": 30}}),
                   ClientMessage::Resize { cols: 100, rows: 30 } },
    end        = { json!({"event": "end"}), ClientMessage::End },
)]
fn parses_client_message(frame: serde_json::Value, expected: ClientMessage) {
    let parsed: Result<ClientMessage, _> = serde_json::from_value(frame);
    assert_eq!(parsed.ok(), Some(expected));
}

#[yare::parameterized(
    unknown_event  = { json!({"event": "shutdown"}) },
    stdin_not_text = { json!({"event": "stdin", "data": 42}) },
    negative_size  = { json!({"event": "resize", "data": {"cols": -1, "rows": 30}}) },
    untagged       = { json!({"data": "ls"}) },
)]
fn rejects_bad_client_message(frame: serde_json::Value) {
    assert!(serde_json::from_value::<ClientMessage>(frame).is_err());
}

#[test]
fn server_messages_match_wire_shape() -> anyhow::Result<()> {
    assert_eq!(
        serde_json::to_value(ServerMessage::Stdout("hi\n".into()))?,
        json!({"event": "stdout", "data": "hi\n"})
    );
    assert_eq!(
        serde_json::to_value(ServerMessage::ProcessExit(130))?,
        json!({"event": "process-exit", "data": 130})
    );
    assert_eq!(
        serde_json::to_value(ServerMessage::error(ErrorCode::SpawnFailed, "no shell"))?,
        json!({"event": "error", "data": {"code": "SPAWN_FAILED", "message": "no shell"}})
    );
    Ok(())
}

#[test]
fn missing_dimensions_use_default() {
    let default = TermSize::new(80, 24);
    assert_eq!(ClientMessage::requested_size(None, None, default), default);
    assert_eq!(ClientMessage::requested_size(Some(132), None, default), TermSize::new(132, 24));
}

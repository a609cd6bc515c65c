// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal WebSocket message types.
//!
//! Frames are adjacently tagged JSON: `{"event": "stdin", "data": "ls\r"}`.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::pty::TermSize;
use crate::session::ClientEvent;

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Shell output, live or replayed.
    Stdout(String),
    /// The shell ended with this exit code.
    ProcessExit(i32),
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error { code: code.as_str().to_owned(), message: message.into() }
    }
}

impl From<ClientEvent> for ServerMessage {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::Stdout(data) => Self::Stdout(data),
            ClientEvent::ProcessExit(code) => Self::ProcessExit(code),
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Attach to (or create) a session. Missing dimensions take the server default.
    StartSession {
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    Stdin(String),
    Resize { cols: u16, rows: u16 },
    /// Leave the session; the socket stays open.
    End,
}

impl ClientMessage {
    /// Size requested by a `start-session`, filled in from `default`.
    pub fn requested_size(cols: Option<u16>, rows: Option<u16>, default: TermSize) -> TermSize {
        TermSize::new(cols.unwrap_or(default.cols), rows.unwrap_or(default.rows))
    }
}

#[cfg(test)]
#[path = "ws_msg_tests.rs"]
mod tests;

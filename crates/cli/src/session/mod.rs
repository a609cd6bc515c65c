// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal session multiplexing: one shared shell for every attached
//! browser client (persistent mode) or one shell per client (transient mode).

pub mod client;
pub mod manager;
pub mod registry;
pub mod transient;

pub use client::{AttachmentState, ClientConnection};
pub use manager::SessionManager;
pub use registry::SessionRegistry;

use serde::{Deserialize, Serialize};

use crate::pty::TermSize;

/// Identity of one browser terminal connection.
pub type ClientId = uuid::Uuid;

/// Server → client terminal events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Output, live or replayed from the buffer.
    Stdout(String),
    /// The shell ended with this exit code.
    ProcessExit(i32),
}

/// Lifecycle of the shared persistent session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Empty,
    Spawning,
    Active,
    Destroying,
}

/// Point-in-time view of the persistent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub persistence: bool,
    pub phase: SessionPhase,
    pub pid: Option<u32>,
    pub attached_clients: usize,
    pub buffered_bytes: usize,
    pub buffer_size: usize,
    pub size: Option<TermSize>,
    pub generation: u64,
}

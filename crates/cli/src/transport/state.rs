// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::host::HostProcess;
use crate::session::SessionManager;

/// Shared application state passed to all handlers via axum `State` extractor.
pub struct AppState {
    /// The one session manager for this server.
    pub manager: Arc<SessionManager>,
    /// Supervised bridge host process, when `--host-command` is set.
    pub host: Option<Arc<HostProcess>>,
    pub started_at: Instant,
    /// Cancelled on server shutdown; open terminal sockets close on it.
    pub shutdown: CancellationToken,
    pub ws_client_count: AtomicI32,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, host: Option<Arc<HostProcess>>) -> Self {
        Self {
            manager,
            host,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
            ws_client_count: AtomicI32::new(0),
        }
    }

    pub fn ws_clients(&self) -> i32 {
        self.ws_client_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("manager", &self.manager)
            .field("host", &self.host)
            .field("ws_clients", &self.ws_clients())
            .finish_non_exhaustive()
    }
}

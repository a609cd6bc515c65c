// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST control surface for the dashboard's terminal page.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{code_of, ErrorCode};
use crate::guard::{self, NavigationDecision};
use crate::host::HostStatus;
use crate::session::SessionStatus;
use crate::transport::state::AppState;

// -- Types --------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub ws_clients: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasPersistentSessionResponse {
    pub has_persistent_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub enabled: bool,
    pub persistence: bool,
    pub show_warning: bool,
    pub buffer_size: usize,
}

/// Query parameters for `GET .../navigation-guard`: the browser's view of its
/// own terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationQuery {
    #[serde(default)]
    pub typed: bool,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResponse {
    pub decision: NavigationDecision,
}

/// Body of `POST /api/host/request`: one IPC request relayed to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRequestBody {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReplyResponse {
    pub payload: serde_json::Value,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        uptime_secs: s.started_at.elapsed().as_secs(),
        ws_clients: s.ws_clients(),
        host: s.host.as_ref().map(|h| h.status()),
    })
}

/// `GET /api/platform-tools/terminal/has-persistent-session`
pub async fn has_persistent_session(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HasPersistentSessionResponse { has_persistent_session: s.manager.has_persistent_session() })
}

/// `POST /api/platform-tools/terminal/destroy-persistent-session`
pub async fn destroy_persistent_session(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    info!("persistent session destroy requested");
    s.manager.destroy_persistent_session();
    Json(DestroyResponse { success: true })
}

/// `GET /api/platform-tools/terminal/settings`
pub async fn settings(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = s.manager.settings();
    Json(SettingsResponse {
        enabled: settings.enabled,
        persistence: settings.persistence,
        show_warning: settings.show_warning,
        buffer_size: settings.buffer_size,
    })
}

/// `GET /api/platform-tools/terminal/status`
pub async fn status(State(s): State<Arc<AppState>>) -> Json<SessionStatus> {
    Json(s.manager.status())
}

/// `GET /api/platform-tools/terminal/navigation-guard`
pub async fn navigation_guard(
    State(s): State<Arc<AppState>>,
    query: Result<Query<NavigationQuery>, QueryRejection>,
) -> Response {
    let q = match query {
        Ok(Query(q)) => q,
        Err(e) => return ErrorCode::BadRequest.to_http_response(e.body_text()).into_response(),
    };
    let settings = s.manager.settings();
    let decision = guard::decide(settings.persistence, settings.show_warning, q.active, q.typed);
    Json(NavigationResponse { decision }).into_response()
}

/// `POST /api/host/request`
///
/// Relays one request to the supervised host process. A host that does not
/// answer in time yields `TIMEOUT` (504); a host that is gone yields
/// `EXITED` (410).
pub async fn host_request(
    State(s): State<Arc<AppState>>,
    body: Result<Json<HostRequestBody>, JsonRejection>,
) -> Response {
    let Some(ref host) = s.host else {
        return ErrorCode::Unavailable
            .to_http_response("no host process is supervised")
            .into_response();
    };
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => return ErrorCode::BadRequest.to_http_response(e.body_text()).into_response(),
    };
    match host.request(&req.kind, req.payload).await {
        Ok(payload) => Json(HostReplyResponse { payload }).into_response(),
        Err(e) => code_of(&e).to_http_response(e.to_string()).into_response(),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::transient::TransientSession;
use super::{ClientEvent, ClientId, SessionManager};
use crate::error::{coded, ErrorCode};
use crate::pty::TermSize;

/// Which kind of session a client is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Detached,
    Persistent,
    Transient,
}

#[derive(Debug)]
pub(crate) enum Attachment {
    Detached,
    Persistent,
    Transient(TransientSession),
}

/// One browser tab's terminal.
///
/// Owns the receiving end of the client's event queue. Dropping the
/// connection ends whatever session it is attached to.
pub struct ClientConnection {
    id: ClientId,
    manager: Arc<SessionManager>,
    typed: bool,
    size: Option<TermSize>,
    attachment: Attachment,
    events: Option<mpsc::Receiver<ClientEvent>>,
}

impl ClientConnection {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            manager,
            typed: false,
            size: None,
            attachment: Attachment::Detached,
            events: None,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Whether the client has sent any input since connecting.
    pub fn has_typed(&self) -> bool {
        self.typed
    }

    pub fn size(&self) -> Option<TermSize> {
        self.size
    }

    pub fn state(&self) -> AttachmentState {
        match self.attachment {
            Attachment::Detached => AttachmentState::Detached,
            Attachment::Persistent => AttachmentState::Persistent,
            Attachment::Transient(_) => AttachmentState::Transient,
        }
    }

    pub fn is_attached(&self) -> bool {
        !matches!(self.attachment, Attachment::Detached)
    }

    /// Start or restart this client's session. See [`SessionManager::start_session`].
    pub fn start(&mut self, size: TermSize) -> anyhow::Result<()> {
        let manager = Arc::clone(&self.manager);
        manager.start_session(self, size)
    }

    pub(crate) fn attach(
        &mut self,
        attachment: Attachment,
        size: TermSize,
        events: mpsc::Receiver<ClientEvent>,
    ) {
        self.attachment = attachment;
        self.size = Some(size);
        self.events = Some(events);
    }

    /// Forward input to the attached shell. Dropped while detached; only
    /// input that reached a shell counts as typing.
    pub fn stdin(&mut self, data: &str) {
        let delivered = match self.attachment {
            Attachment::Persistent => self.manager.write_persistent(&self.id, data),
            Attachment::Transient(ref session) => session.write(data),
            Attachment::Detached => {
                debug!(client = %self.id, "dropping input from detached client");
                false
            }
        };
        self.typed |= delivered;
    }

    /// Resize the attached shell. The shared shell takes the last size sent by
    /// any client.
    pub fn resize(&mut self, size: TermSize) -> anyhow::Result<()> {
        if !size.is_valid() {
            return Err(coded(ErrorCode::BadRequest, format!("invalid terminal size {size}")));
        }
        self.size = Some(size);
        match self.attachment {
            Attachment::Persistent => self.manager.resize_persistent(&self.id, size),
            Attachment::Transient(ref session) => session.resize(size),
            Attachment::Detached => {}
        }
        Ok(())
    }

    /// Leave the current session. A transient shell is killed; the shared
    /// shell keeps running.
    pub fn end(&mut self) {
        match std::mem::replace(&mut self.attachment, Attachment::Detached) {
            Attachment::Persistent => self.manager.detach(&self.id),
            Attachment::Transient(session) => session.end(),
            Attachment::Detached => {}
        }
        self.events = None;
    }

    /// Next event for this client.
    ///
    /// Pends forever while detached. Returns `None` once the session dropped
    /// this client without an exit (destroyed, or the client fell behind).
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        let Some(rx) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        let event = rx.recv().await;
        match event {
            Some(ClientEvent::ProcessExit(_)) | None => {
                self.attachment = Attachment::Detached;
                self.events = None;
            }
            Some(ClientEvent::Stdout(_)) => {}
        }
        event
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("typed", &self.typed)
            .field("size", &self.size)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::{ClientEvent, ClientId, SessionPhase, SessionStatus};
use crate::pty::decode::skip_partial_char;
use crate::pty::{ExitStatus, ProcessHandle, TermSize};
use crate::ring::RingBuffer;

/// State of the one persistent terminal session.
///
/// Owned by the [`SessionManager`](super::SessionManager); every mutation
/// goes through the single mutex, so each operation is atomic with respect to
/// output fan-out. The lock is never held across an `.await`.
pub struct SessionRegistry {
    inner: Mutex<RegistryState>,
    persistence: bool,
}

/// Fields guarded by the registry lock.
pub struct RegistryState {
    pub(crate) phase: SessionPhase,
    pub(crate) process: Option<Arc<dyn ProcessHandle>>,
    /// Bumped on every spawn so events from a torn-down process are ignored.
    pub(crate) generation: u64,
    pub(crate) attached: HashMap<ClientId, mpsc::Sender<ClientEvent>>,
    pub(crate) buffer: RingBuffer,
    pub(crate) data_listener_attached: bool,
    pub(crate) size: Option<TermSize>,
}

impl SessionRegistry {
    pub fn new(buffer_size: usize, persistence: bool) -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                phase: SessionPhase::Empty,
                process: None,
                generation: 0,
                attached: HashMap::new(),
                buffer: RingBuffer::new(buffer_size),
                data_listener_attached: false,
                size: None,
            }),
            persistence,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock()
    }

    /// True iff a shared shell currently exists.
    pub fn has_process(&self) -> bool {
        self.inner.lock().process.is_some()
    }

    pub fn is_attached(&self, client: &ClientId) -> bool {
        self.inner.lock().attached.contains_key(client)
    }

    pub fn attached_count(&self) -> usize {
        self.inner.lock().attached.len()
    }

    pub fn data_listener_attached(&self) -> bool {
        self.inner.lock().data_listener_attached
    }

    /// Current replay buffer contents, oldest first.
    pub fn buffered(&self) -> Vec<u8> {
        self.inner.lock().buffer.contents()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.inner.lock();
        SessionStatus {
            persistence: self.persistence,
            phase: inner.phase,
            pid: inner.process.as_ref().and_then(|p| p.pid()),
            attached_clients: inner.attached.len(),
            buffered_bytes: inner.buffer.len(),
            buffer_size: inner.buffer.capacity(),
            size: inner.size,
            generation: inner.generation,
        }
    }

    /// True when the registry is indistinguishable from a never-used one.
    pub fn is_pristine(&self) -> bool {
        let inner = self.inner.lock();
        inner.phase == SessionPhase::Empty
            && inner.process.is_none()
            && inner.attached.is_empty()
            && inner.buffer.is_empty()
            && !inner.data_listener_attached
            && inner.size.is_none()
    }

    /// Record output from the process of `generation` and fan it out.
    ///
    /// Returns `false` once that process is no longer the current one, which
    /// tells the listener to stop.
    pub(crate) fn handle_data(&self, generation: u64, text: String) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_current(generation) {
            return false;
        }
        inner.buffer.write(text.as_bytes());
        inner.fan_out(&ClientEvent::Stdout(text));
        true
    }

    /// Tear down after the process of `generation` exited on its own.
    ///
    /// Every attached client is told the exit code before state is cleared.
    /// Stale or repeated exits are no-ops; returns whether anything happened.
    pub(crate) fn handle_exit(&self, generation: u64, status: ExitStatus) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_current(generation) {
            debug!(generation, "ignoring exit of a session that is already gone");
            return false;
        }
        let code = status.exit_code();
        inner.fan_out(&ClientEvent::ProcessExit(code));
        info!(generation, code, clients = inner.attached.len(), "persistent shell exited");
        inner.phase = SessionPhase::Destroying;
        inner.reset();
        true
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").field("status", &self.status()).finish()
    }
}

impl RegistryState {
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.process.is_some() && self.generation == generation
    }

    /// Deliver `event` to every attached client, in one pass.
    ///
    /// A client whose queue is closed or full is detached on the spot; its
    /// gateway sees the end of its event stream and closes the socket.
    pub(crate) fn fan_out(&mut self, event: &ClientEvent) {
        let mut gone = Vec::new();
        for (id, tx) in &self.attached {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!(client = %id, "client connection closed, detaching");
                    gone.push(*id);
                }
                Err(TrySendError::Full(_)) => {
                    warn!(client = %id, "client is not keeping up with output, detaching");
                    gone.push(*id);
                }
            }
        }
        for id in gone {
            self.attached.remove(&id);
        }
    }

    /// Replay the buffer to a newly attached client as one stdout event.
    pub(crate) fn replay_to(&self, client: &ClientId, tx: &mpsc::Sender<ClientEvent>) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        let bytes = self.buffer.contents();
        let text = String::from_utf8_lossy(skip_partial_char(&bytes)).into_owned();
        match tx.try_send(ClientEvent::Stdout(text)) {
            Ok(()) => true,
            Err(e) => {
                warn!(client = %client, "replay to client failed: {e}");
                false
            }
        }
    }

    /// Return to the empty state, handing back the process for the caller to kill.
    pub(crate) fn reset(&mut self) -> Option<Arc<dyn ProcessHandle>> {
        let process = self.process.take();
        self.attached.clear();
        self.buffer.clear();
        self.data_listener_attached = false;
        self.size = None;
        self.phase = SessionPhase::Empty;
        process
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

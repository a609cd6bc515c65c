// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::{Attachment, ClientConnection};
use super::registry::SessionRegistry;
use super::transient::TransientSession;
use super::{ClientEvent, ClientId, SessionPhase, SessionStatus};
use crate::config::TerminalSettings;
use crate::error::{coded, ErrorCode};
use crate::pty::{ExitStatus, ProcessEvent, Spawner, TermSize};

/// Creates, attaches, detaches, and destroys terminal sessions.
///
/// In persistent mode every client shares one shell held by the
/// [`SessionRegistry`]. Otherwise each client gets its own
/// [`TransientSession`].
pub struct SessionManager {
    settings: TerminalSettings,
    spawner: Arc<dyn Spawner>,
    registry: Arc<SessionRegistry>,
}

impl SessionManager {
    pub fn new(settings: TerminalSettings, spawner: Arc<dyn Spawner>) -> Self {
        let registry = Arc::new(SessionRegistry::new(settings.buffer_size, settings.persistence));
        Self { settings, spawner, registry }
    }

    pub fn settings(&self) -> &TerminalSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// A new, detached client of this manager.
    pub fn connect(self: &Arc<Self>) -> ClientConnection {
        ClientConnection::new(Arc::clone(self))
    }

    /// Start (or restart) `client`'s terminal at `size`.
    ///
    /// Any previous attachment of the client is ended first.
    pub fn start_session(&self, client: &mut ClientConnection, size: TermSize) -> anyhow::Result<()> {
        if !self.settings.enabled {
            return Err(coded(ErrorCode::Unavailable, "terminal access is disabled"));
        }
        if !size.is_valid() {
            return Err(coded(ErrorCode::BadRequest, format!("invalid terminal size {size}")));
        }
        client.end();

        let (tx, rx) = mpsc::channel(self.settings.client_queue);
        let attachment = if self.settings.persistence {
            self.attach_to_persistent(client.id(), size, tx)?;
            Attachment::Persistent
        } else {
            Attachment::Transient(self.create_transient(client.id(), size, tx)?)
        };
        client.attach(attachment, size, rx);
        Ok(())
    }

    /// Attach `client` to the shared shell, spawning it if needed.
    ///
    /// Spawn, listener registration, replay, and insertion into the attached
    /// set all happen in one registry lock section, so a chunk of output is
    /// either part of the replay or delivered live afterwards.
    pub(crate) fn attach_to_persistent(
        &self,
        client: ClientId,
        size: TermSize,
        tx: mpsc::Sender<ClientEvent>,
    ) -> anyhow::Result<()> {
        let mut inner = self.registry.lock();
        match inner.process.clone() {
            Some(process) => {
                // Last attacher wins.
                if let Err(e) = process.resize(size) {
                    warn!(client = %client, "resize of persistent shell failed: {e:#}");
                }
                inner.size = Some(size);
            }
            None => {
                inner.phase = SessionPhase::Spawning;
                inner.generation += 1;
                let generation = inner.generation;
                let spawned = match self.spawner.spawn(&self.settings.spawn_spec(size)) {
                    Ok(spawned) => spawned,
                    Err(e) => {
                        inner.phase = SessionPhase::Empty;
                        warn!(client = %client, shell = %self.settings.shell, "spawn failed: {e:#}");
                        return Err(coded(
                            ErrorCode::SpawnFailed,
                            format!("failed to spawn {}: {e:#}", self.settings.shell),
                        ));
                    }
                };
                info!(
                    generation,
                    pid = ?spawned.handle.pid(),
                    cols = size.cols,
                    rows = size.rows,
                    "spawned persistent shell"
                );
                inner.process = Some(spawned.handle);
                inner.size = Some(size);
                if !inner.data_listener_attached {
                    inner.data_listener_attached = true;
                    tokio::spawn(listen(Arc::clone(&self.registry), generation, spawned.events));
                }
                inner.phase = SessionPhase::Active;
            }
        }

        inner.attached.remove(&client);
        if inner.replay_to(&client, &tx) {
            inner.attached.insert(client, tx);
        }
        info!(client = %client, clients = inner.attached.len(), "attached to persistent session");
        Ok(())
    }

    /// Spawn a shell owned by `client` alone.
    pub(crate) fn create_transient(
        &self,
        client: ClientId,
        size: TermSize,
        tx: mpsc::Sender<ClientEvent>,
    ) -> anyhow::Result<TransientSession> {
        let spawned = self.spawner.spawn(&self.settings.spawn_spec(size)).map_err(|e| {
            warn!(client = %client, shell = %self.settings.shell, "spawn failed: {e:#}");
            coded(ErrorCode::SpawnFailed, format!("failed to spawn {}: {e:#}", self.settings.shell))
        })?;
        info!(client = %client, pid = ?spawned.handle.pid(), cols = size.cols, rows = size.rows, "spawned transient shell");
        Ok(TransientSession::start(client, spawned, tx))
    }

    /// True iff a persistent shell currently exists.
    pub fn has_persistent_session(&self) -> bool {
        self.registry.has_process()
    }

    /// Kill the shared shell and return the registry to its empty state.
    ///
    /// Safe to call when nothing exists. Attached clients see their event
    /// stream end.
    pub fn destroy_persistent_session(&self) {
        let process = {
            let mut inner = self.registry.lock();
            inner.phase = SessionPhase::Destroying;
            let clients = inner.attached.len();
            let process = inner.reset();
            if process.is_some() {
                info!(generation = inner.generation, clients, "destroying persistent session");
            }
            process
        };
        let Some(process) = process else {
            debug!("no persistent session to destroy");
            return;
        };
        if let Err(e) = process.kill(Signal::SIGHUP) {
            warn!(pid = ?process.pid(), "failed to kill persistent shell: {e:#}");
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.registry.status()
    }

    /// Tear down the shared shell so nothing outlives the server.
    pub fn shutdown(&self) {
        self.destroy_persistent_session();
    }

    /// Write a client's input to the shared shell, if the client is attached.
    /// Returns whether the input reached the shell.
    pub(crate) fn write_persistent(&self, client: &ClientId, data: &str) -> bool {
        let inner = self.registry.lock();
        if !inner.attached.contains_key(client) {
            debug!(client = %client, "dropping input from client no longer attached");
            return false;
        }
        let Some(ref process) = inner.process else {
            return false;
        };
        match process.write(data.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!(client = %client, "write to persistent shell failed: {e:#}");
                false
            }
        }
    }

    /// Resize the shared shell on behalf of an attached client.
    pub(crate) fn resize_persistent(&self, client: &ClientId, size: TermSize) {
        let mut inner = self.registry.lock();
        if !inner.attached.contains_key(client) {
            return;
        }
        let Some(process) = inner.process.clone() else {
            return;
        };
        match process.resize(size) {
            Ok(()) => inner.size = Some(size),
            Err(e) => warn!(client = %client, "resize of persistent shell failed: {e:#}"),
        }
    }

    /// Remove `client` from the attached set. The shared shell is untouched.
    pub(crate) fn detach(&self, client: &ClientId) {
        let mut inner = self.registry.lock();
        if inner.attached.remove(client).is_some() {
            info!(client = %client, clients = inner.attached.len(), "detached from persistent session");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("persistence", &self.settings.persistence)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// The one output listener of the persistent shell of `generation`.
async fn listen(
    registry: Arc<SessionRegistry>,
    generation: u64,
    mut events: mpsc::Receiver<ProcessEvent>,
) {
    loop {
        match events.recv().await {
            Some(ProcessEvent::Data(text)) => {
                if !registry.handle_data(generation, text) {
                    break;
                }
            }
            Some(ProcessEvent::Exit(status)) => {
                registry.handle_exit(generation, status);
                break;
            }
            None => {
                // Output closed without an exit report.
                registry.handle_exit(generation, ExitStatus { code: None, signal: None });
                break;
            }
        }
    }
    debug!(generation, "persistent output listener stopped");
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ClientEvent, ClientId};
use crate::pty::{ProcessEvent, ProcessHandle, Spawned, TermSize};

/// A shell owned by exactly one client, killed when that client ends.
///
/// Output goes straight to the client; nothing is buffered for replay.
pub struct TransientSession {
    client: ClientId,
    process: Arc<dyn ProcessHandle>,
    /// Set once the client ends the session, so the resulting exit is not
    /// reported back to it.
    ending: Arc<AtomicBool>,
}

impl TransientSession {
    pub(crate) fn start(client: ClientId, spawned: Spawned, tx: mpsc::Sender<ClientEvent>) -> Self {
        let ending = Arc::new(AtomicBool::new(false));
        tokio::spawn(forward(client, spawned.events, tx, Arc::clone(&ending)));
        Self { client, process: spawned.handle, ending }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::Acquire)
    }

    /// Returns whether the input reached the shell.
    pub fn write(&self, data: &str) -> bool {
        match self.process.write(data.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!(client = %self.client, "write to transient shell failed: {e:#}");
                false
            }
        }
    }

    pub fn resize(&self, size: TermSize) {
        if let Err(e) = self.process.resize(size) {
            warn!(client = %self.client, "resize of transient shell failed: {e:#}");
        }
    }

    /// Kill the shell. Repeated calls are no-ops.
    pub fn end(&self) {
        if self.ending.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(client = %self.client, pid = ?self.process.pid(), "ending transient shell");
        if let Err(e) = self.process.kill(Signal::SIGHUP) {
            warn!(client = %self.client, "failed to kill transient shell: {e:#}");
        }
    }
}

impl Drop for TransientSession {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for TransientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientSession")
            .field("client", &self.client)
            .field("pid", &self.process.pid())
            .field("ending", &self.is_ending())
            .finish()
    }
}

/// Relay one shell's output to its client. Awaiting the send applies
/// backpressure to the shell instead of buffering.
async fn forward(
    client: ClientId,
    mut events: mpsc::Receiver<ProcessEvent>,
    tx: mpsc::Sender<ClientEvent>,
    ending: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Data(text) => {
                if tx.send(ClientEvent::Stdout(text)).await.is_err() {
                    debug!(client = %client, "client gone, dropping transient output");
                    break;
                }
            }
            ProcessEvent::Exit(status) => {
                if ending.swap(true, Ordering::AcqRel) {
                    debug!(client = %client, "transient shell ended by its client");
                } else {
                    let code = status.exit_code();
                    info!(client = %client, code, "transient shell exited");
                    let _ = tx.send(ClientEvent::ProcessExit(code)).await;
                }
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "transient_tests.rs"]
mod tests;

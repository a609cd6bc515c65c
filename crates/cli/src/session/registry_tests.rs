// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::mpsc;

use super::SessionRegistry;
use crate::pty::{ExitStatus, SpawnSpec, Spawner, TermSize};
use crate::session::{ClientEvent, SessionPhase};
use crate::test_support::{AnyhowExt, FakeSpawner};

fn spec() -> SpawnSpec {
    SpawnSpec {
        shell: "/bin/sh".into(),
        args: vec![],
        size: TermSize::new(80, 24),
        cwd: None,
        env: vec![],
    }
}

/// Registry with a fake process installed at generation 1.
fn active_registry(buffer: usize) -> anyhow::Result<SessionRegistry> {
    let registry = SessionRegistry::new(buffer, true);
    let spawned = FakeSpawner::new().spawn(&spec())?;
    {
        let mut inner = registry.lock();
        inner.generation = 1;
        inner.process = Some(spawned.handle);
        inner.phase = SessionPhase::Active;
        inner.data_listener_attached = true;
        inner.size = Some(TermSize::new(80, 24));
    }
    Ok(registry)
}

#[test]
fn new_registry_is_pristine() {
    let registry = SessionRegistry::new(100, true);
    assert!(registry.is_pristine());
    assert!(!registry.has_process());
    let status = registry.status();
    assert_eq!(status.phase, SessionPhase::Empty);
    assert_eq!(status.buffer_size, 100);
    assert_eq!(status.attached_clients, 0);
}

#[tokio::test]
async fn data_is_buffered_and_fanned_out() -> anyhow::Result<()> {
    let registry = active_registry(1000)?;
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    {
        let mut inner = registry.lock();
        inner.attached.insert(uuid::Uuid::new_v4(), tx_a);
        inner.attached.insert(uuid::Uuid::new_v4(), tx_b);
    }

    assert!(registry.handle_data(1, "hello".into()));
    assert_eq!(rx_a.try_recv().anyhow()?, ClientEvent::Stdout("hello".into()));
    assert_eq!(rx_b.try_recv().anyhow()?, ClientEvent::Stdout("hello".into()));
    assert_eq!(registry.buffered(), b"hello");
    Ok(())
}

#[tokio::test]
async fn stale_generation_data_is_ignored() -> anyhow::Result<()> {
    let registry = active_registry(1000)?;
    assert!(!registry.handle_data(0, "old".into()));
    assert!(registry.buffered().is_empty());
    Ok(())
}

#[tokio::test]
async fn closed_client_is_detached_on_fan_out() -> anyhow::Result<()> {
    let registry = active_registry(1000)?;
    let (tx_live, mut rx_live) = mpsc::channel(8);
    let (tx_gone, rx_gone) = mpsc::channel(8);
    drop(rx_gone);
    let live = uuid::Uuid::new_v4();
    let gone = uuid::Uuid::new_v4();
    {
        let mut inner = registry.lock();
        inner.attached.insert(live, tx_live);
        inner.attached.insert(gone, tx_gone);
    }

    registry.handle_data(1, "x".into());
    assert!(registry.is_attached(&live));
    assert!(!registry.is_attached(&gone));
    assert_eq!(rx_live.try_recv().anyhow()?, ClientEvent::Stdout("x".into()));
    assert!(registry.has_process(), "losing a client never touches the process");
    Ok(())
}

#[tokio::test]
async fn full_client_queue_detaches_only_that_client() -> anyhow::Result<()> {
    let registry = active_registry(1000)?;
    let (tx_slow, _rx_slow) = mpsc::channel(1);
    let (tx_fast, mut rx_fast) = mpsc::channel(8);
    let slow = uuid::Uuid::new_v4();
    let fast = uuid::Uuid::new_v4();
    {
        let mut inner = registry.lock();
        inner.attached.insert(slow, tx_slow);
        inner.attached.insert(fast, tx_fast);
    }

    registry.handle_data(1, "one".into());
    registry.handle_data(1, "two".into());

    assert!(!registry.is_attached(&slow));
    assert!(registry.is_attached(&fast));
    assert_eq!(rx_fast.try_recv().anyhow()?, ClientEvent::Stdout("one".into()));
    assert_eq!(rx_fast.try_recv().anyhow()?, ClientEvent::Stdout("two".into()));
    Ok(())
}

#[tokio::test]
async fn exit_notifies_then_resets() -> anyhow::Result<()> {
    let registry = active_registry(1000)?;
    let (tx, mut rx) = mpsc::channel(8);
    registry.lock().attached.insert(uuid::Uuid::new_v4(), tx);
    registry.handle_data(1, "bye".into());

    assert!(registry.handle_exit(1, ExitStatus { code: Some(3), signal: None }));

    assert_eq!(rx.try_recv().anyhow()?, ClientEvent::Stdout("bye".into()));
    assert_eq!(rx.try_recv().anyhow()?, ClientEvent::ProcessExit(3));
    assert!(registry.is_pristine());
    assert_eq!(registry.status().generation, 1, "generation survives reset");
    Ok(())
}

#[tokio::test]
async fn second_and_stale_exits_are_noops() -> anyhow::Result<()> {
    let registry = active_registry(1000)?;
    let status = ExitStatus { code: Some(0), signal: None };
    assert!(!registry.handle_exit(7, status), "wrong generation");
    assert!(registry.has_process());

    assert!(registry.handle_exit(1, status));
    assert!(!registry.handle_exit(1, status), "already handled");
    assert!(registry.is_pristine());
    Ok(())
}

#[tokio::test]
async fn buffer_never_exceeds_bound() -> anyhow::Result<()> {
    let registry = active_registry(1000)?;
    registry.handle_data(1, "a".repeat(1500));
    let status = registry.status();
    assert_eq!(status.buffered_bytes, 1000);
    assert_eq!(registry.buffered(), "a".repeat(1000).into_bytes());
    Ok(())
}

#[tokio::test]
async fn replay_skips_split_character() -> anyhow::Result<()> {
    // "xé" is 78 C3 A9; capacity 3 keeps only A9 of the é plus "ab".
    let registry = active_registry(3)?;
    registry.handle_data(1, "xé".into());
    registry.handle_data(1, "ab".into());
    assert_eq!(registry.buffered(), vec![0xA9, b'a', b'b']);

    let (tx, mut rx) = mpsc::channel(1);
    let id = uuid::Uuid::new_v4();
    assert!(registry.lock().replay_to(&id, &tx));
    assert_eq!(rx.try_recv().anyhow()?, ClientEvent::Stdout("ab".into()));
    Ok(())
}

#[tokio::test]
async fn reset_returns_process_and_clears_everything() -> anyhow::Result<()> {
    let registry = Arc::new(active_registry(100)?);
    let (tx, _rx) = mpsc::channel(8);
    registry.lock().attached.insert(uuid::Uuid::new_v4(), tx);
    registry.handle_data(1, "abc".into());

    let process = registry.lock().reset();
    assert!(process.is_some());
    assert!(registry.is_pristine());
    assert!(registry.lock().reset().is_none());
    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::error::{code_of, ErrorCode};
use crate::pty::TermSize;
use crate::session::{AttachmentState, ClientEvent};
use crate::test_support::{wait_until, AppStateBuilder, FakeSpawner};

#[tokio::test]
async fn new_client_is_detached_and_untyped() {
    let manager = AppStateBuilder::new().manager();
    let a = manager.connect();
    let b = manager.connect();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.state(), AttachmentState::Detached);
    assert!(!a.has_typed());
    assert_eq!(a.size(), None);
}

#[tokio::test]
async fn detached_client_never_receives_events() {
    let manager = AppStateBuilder::new().manager();
    let mut a = manager.connect();
    a.stdin("ignored");
    assert!(!a.has_typed(), "input while detached does not count as typing");
    let waited = tokio::time::timeout(Duration::from_millis(50), a.recv()).await;
    assert!(waited.is_err(), "recv pends while detached");
}

#[tokio::test]
async fn typing_is_tracked_per_client() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let manager = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).manager();
    let mut a = manager.connect();
    let mut b = manager.connect();
    a.start(TermSize::new(80, 24))?;
    b.start(TermSize::new(80, 24))?;
    a.stdin("x");
    assert!(a.has_typed());
    assert!(!b.has_typed());
    Ok(())
}

#[tokio::test]
async fn input_after_overrun_detach_is_not_typing() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let manager = AppStateBuilder::new()
        .persistence(true)
        .client_queue(1)
        .spawner(spawner.clone())
        .manager();
    let mut a = manager.connect();
    a.start(TermSize::new(80, 24))?;

    let shell = spawner.last()?;
    shell.emit("first").await?;
    shell.emit("second").await?;
    wait_until(|| !manager.registry().is_attached(&a.id())).await?;

    a.stdin("ls\r");
    assert!(!a.has_typed());
    assert_eq!(shell.written(), "");
    Ok(())
}

#[tokio::test]
async fn input_after_destroy_is_not_typing() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let manager = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).manager();
    let mut a = manager.connect();
    a.start(TermSize::new(80, 24))?;
    manager.destroy_persistent_session();

    a.stdin("x");
    assert!(!a.has_typed());
    Ok(())
}

#[tokio::test]
async fn resize_validates_and_records_size() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let manager = AppStateBuilder::new().persistence(false).spawner(spawner.clone()).manager();
    let mut a = manager.connect();
    a.start(TermSize::new(80, 24))?;

    let err = a.resize(TermSize::new(10, 0)).err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert_eq!(code_of(&err), ErrorCode::BadRequest);
    assert_eq!(a.size(), Some(TermSize::new(80, 24)));

    a.resize(TermSize::new(132, 43))?;
    assert_eq!(a.size(), Some(TermSize::new(132, 43)));
    assert_eq!(spawner.last()?.resizes(), vec![TermSize::new(132, 43)]);
    Ok(())
}

#[tokio::test]
async fn restart_ends_previous_transient_shell() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let manager = AppStateBuilder::new().persistence(false).spawner(spawner.clone()).manager();
    let mut a = manager.connect();
    a.start(TermSize::new(80, 24))?;
    let first = spawner.last()?;
    a.start(TermSize::new(80, 24))?;

    assert!(first.is_killed());
    assert_eq!(spawner.spawn_count(), 2);
    assert_eq!(a.state(), AttachmentState::Transient);

    spawner.last()?.emit("fresh").await?;
    let event = tokio::time::timeout(Duration::from_secs(2), a.recv()).await?;
    assert_eq!(event, Some(ClientEvent::Stdout("fresh".into())));
    Ok(())
}

#[tokio::test]
async fn end_is_idempotent() -> anyhow::Result<()> {
    let spawner = FakeSpawner::new();
    let manager = AppStateBuilder::new().persistence(true).spawner(spawner.clone()).manager();
    let mut a = manager.connect();
    a.start(TermSize::new(80, 24))?;
    a.end();
    a.end();
    assert_eq!(a.state(), AttachmentState::Detached);
    assert!(manager.has_persistent_session());
    assert_eq!(manager.status().attached_clients, 0);
    Ok(())
}

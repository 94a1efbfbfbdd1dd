//! Tests for runtime helpers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskfleet::core::Spawn;
use taskfleet::runtime::{Shutdown, TokioSpawner};

#[test]
fn test_current_spawner_requires_runtime() {
    assert!(TokioSpawner::current().is_none());
}

#[tokio::test]
async fn test_tokio_spawner_runs_future() {
    let spawner = TokioSpawner::current().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let c = Arc::clone(&counter);
    spawner.spawn(async move {
        c.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(());
    });
    tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_reaches_subscribers() {
    let shutdown = Shutdown::new();
    let mut rx = shutdown.subscribe();
    assert!(!*rx.borrow());
    shutdown.trigger();
    rx.changed().await.unwrap();
    assert!(*rx.borrow());
}

#[tokio::test]
async fn test_late_subscriber_sees_shutdown() {
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let rx = shutdown.subscribe();
    assert!(*rx.borrow());
}

#[test]
fn test_spawner_from_runtime_handle() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let spawner = TokioSpawner::new(rt.handle().clone());
    let (tx, rx) = std::sync::mpsc::channel();
    spawner.spawn(async move {
        let _ = tx.send(7);
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
}

//! Retention cleanup tests

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use ProvisionFlow::config::{RetentionConfig, StoreBackend};
use ProvisionFlow::models::{SessionFilter, SessionStatus};
use ProvisionFlow::services::RetentionWorker;

use crate::helpers::TestConfig;
use crate::integration::setup_integration_test;

async fn cleanup_removes_only_old_terminal_sessions(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();

    let active = ctx.manager.start_session(json!({})).await.unwrap();
    let paused = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.pause_session(&paused.id).await.unwrap();
    let cancelled = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.cancel_session(&cancelled.id, "stale").await.unwrap();
    let failed = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.handlers.data_collection.push_fatal("bad request");
    ctx.manager.advance_session(&failed.id, Value::Null).await.unwrap();

    let cutoff = Utc::now() + chrono::Duration::seconds(1);
    let removed = ctx.manager.cleanup_before(cutoff).await.unwrap();
    assert_eq!(removed, 2);

    // idempotent
    assert_eq!(ctx.manager.cleanup_before(cutoff).await.unwrap(), 0);

    let remaining = ctx.manager.list_sessions(SessionFilter::new()).collect().await.unwrap();
    let mut ids: Vec<_> = remaining.into_iter().map(|s| s.id).collect();
    ids.sort();
    let mut expected = vec![active.id.clone(), paused.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    assert!(!ctx.manager.cache().contains(&cancelled.id));
    assert!(!ctx.manager.cache().contains(&failed.id));
    assert!(ctx.store.load(&cancelled.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cleanup_removes_only_old_terminal_sessions_file() {
    cleanup_removes_only_old_terminal_sessions(StoreBackend::File).await;
}

#[tokio::test]
async fn test_cleanup_removes_only_old_terminal_sessions_sqlite() {
    cleanup_removes_only_old_terminal_sessions(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_cleanup_with_unbounded_age_removes_nothing() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.cancel_session(&session.id, "done").await.unwrap();

    assert_eq!(ctx.manager.cleanup(chrono::Duration::MAX).await.unwrap(), 0);
    assert!(ctx.store.load(&session.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cleanup_keeps_recent_terminal_sessions() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.cancel_session(&session.id, "done").await.unwrap();

    let removed = ctx.manager.cleanup(chrono::Duration::hours(24)).await.unwrap();
    assert_eq!(removed, 0);
    assert_eq!(
        ctx.manager.get_session(&session.id).await.unwrap().status,
        SessionStatus::Cancelled
    );
}

#[tokio::test]
async fn test_retention_worker_cleans_in_background() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.cancel_session(&session.id, "done").await.unwrap();

    let config = RetentionConfig {
        enabled: true,
        max_age_hours: 0,
        interval_seconds: 1,
    };
    let mut worker = RetentionWorker::new(&config).with_interval(Duration::from_millis(20));
    // make sure the session is strictly older than the cutoff
    tokio::time::sleep(Duration::from_millis(5)).await;
    worker.start(Arc::downgrade(&ctx.manager));
    assert!(worker.is_running());

    let mut gone = false;
    for _ in 0..100 {
        if ctx.store.load(&session.id).await.unwrap().is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    worker.stop();
    assert!(gone, "retention worker never removed the cancelled session");
}

#[tokio::test]
async fn test_disabled_retention_does_not_start() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let config = RetentionConfig {
        enabled: false,
        max_age_hours: 1,
        interval_seconds: 60,
    };
    assert!(!ctx.manager.start_retention(&config));
}

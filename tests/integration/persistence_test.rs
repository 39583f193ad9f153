//! Persistence tests
//!
//! Round trips through both backends, cache fallback and migration between
//! backends.

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::{json, Value};

use ProvisionFlow::config::StoreBackend;
use ProvisionFlow::database::SessionRepository;
use ProvisionFlow::models::{SessionFilter, SessionStatus, Stage};
use ProvisionFlow::services::SessionManager;
use ProvisionFlow::state::{copy_sessions, FileSessionStore, SessionStore};
use ProvisionFlow::FlowError;

use crate::helpers::{vm_request, FailingStore, TestConfig};
use crate::integration::setup_integration_test;

async fn snapshot_survives_reopen(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    let session = ctx.manager.start_session(vm_request("db-01")).await.unwrap();
    ctx.handlers.validation.push_retry("disk too small");
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    let expected = ctx.manager.get_session(&session.id).await.unwrap();
    assert_eq!(expected.errors.len(), 1);

    let reopened = ctx.reopen_store().await.unwrap();
    let loaded = reopened.load(&session.id).await.unwrap();
    assert_eq!(loaded, Some(expected));
}

#[tokio::test]
async fn test_snapshot_survives_reopen_file() {
    snapshot_survives_reopen(StoreBackend::File).await;
}

#[tokio::test]
async fn test_snapshot_survives_reopen_sqlite() {
    snapshot_survives_reopen(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_evicted_sessions_reload_from_store() {
    let config = TestConfig {
        cache_capacity: 2,
        ..TestConfig::default()
    };
    let ctx = setup_integration_test(config).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(ctx.manager.start_session(json!({})).await.unwrap().id);
    }
    assert_eq!(ctx.manager.cache().len(), 2);
    assert_eq!(ctx.manager.cache().ids(), ids[2..].to_vec());

    let outcome = ctx.manager.advance_session(&ids[0], Value::Null).await.unwrap();
    assert_eq!(outcome.session().stage, Stage::Validating);
    assert!(ctx.manager.cache().contains(&ids[0]));
    assert_eq!(ctx.manager.cache().len(), 2);
    assert!(ctx.manager.cache().stats().evictions >= 2);
}

#[tokio::test]
async fn test_clear_cache_keeps_store() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();

    assert_eq!(ctx.manager.clear_cache(), 1);
    let loaded = ctx.manager.get_session(&session.id).await.unwrap();
    assert_eq!(loaded, session);
}

#[tokio::test]
async fn test_copy_file_store_into_sqlite() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    for name in ["web-01", "web-02", "web-03"] {
        let session = ctx.manager.start_session(vm_request(name)).await.unwrap();
        ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    }

    let target = SessionRepository::open(ctx.temp_dir.path().join("migrated.db"), 1)
        .await
        .unwrap();
    let copied = copy_sessions(ctx.store.as_ref(), &target).await.unwrap();
    assert_eq!(copied, 3);

    let source = ctx.store.query(&SessionFilter::new()).await.unwrap();
    let migrated = target.query(&SessionFilter::new()).await.unwrap();
    assert_eq!(source, migrated);

    for summary in &source {
        assert_eq!(
            ctx.store.load(&summary.id).await.unwrap(),
            target.load(&summary.id).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_file_index_rebuilt_after_loss() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();

    let dir = ctx.temp_dir.path().join("sessions");
    std::fs::remove_file(dir.join("index.json")).unwrap();

    let store = FileSessionStore::open(&dir).await.unwrap();
    let summaries = store.query(&SessionFilter::new()).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, session.id);
    assert!(dir.join("index.json").exists());
}

#[tokio::test]
async fn test_stale_file_index_matches_documents_after_restart() {
    let mut ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();

    let index_path = ctx.temp_dir.path().join("sessions").join("index.json");
    let stale_index = std::fs::read(&index_path).unwrap();
    ctx.manager.cancel_session(&session.id, "abandoned").await.unwrap();
    std::fs::write(&index_path, stale_index).unwrap();

    ctx.restart().await.unwrap();

    let cancelled = ctx
        .manager
        .list_sessions(SessionFilter::new().with_status(SessionStatus::Cancelled))
        .collect()
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, session.id);

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    assert_eq!(ctx.manager.cleanup_before(cutoff).await.unwrap(), 1);
    assert!(ctx.store.load(&session.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_save_leaves_cache_unchanged_and_retry_succeeds() {
    let ctx = setup_integration_test(TestConfig::default()).await.unwrap();
    let store = Arc::new(FailingStore::new(Arc::clone(&ctx.store)));
    let manager = SessionManager::builder()
        .store(store.clone())
        .cache_capacity(4)
        .handlers(ctx.handlers.registry())
        .build()
        .unwrap();

    let session = manager.start_session(json!({})).await.unwrap();

    store.fail_saves(true);
    let err = manager.advance_session(&session.id, Value::Null).await.unwrap_err();
    assert_matches!(
        &err,
        FlowError::Persistence { session_id: Some(id), stage: Some(Stage::Collecting), .. } if id == &session.id
    );
    assert!(err.is_recoverable());
    assert_eq!(store.rejected(), 1);

    let cached = manager.cache().get(&session.id).unwrap();
    assert_eq!(cached.stage, Stage::Collecting);
    assert!(cached.history.is_empty());
    assert_eq!(ctx.store.load(&session.id).await.unwrap().unwrap().stage, Stage::Collecting);

    let err = manager.cancel_session(&session.id, "stop").await.unwrap_err();
    assert_eq!(err.session_id(), Some(session.id.as_str()));
    assert_eq!(manager.get_session(&session.id).await.unwrap().status, SessionStatus::Active);

    store.fail_saves(false);
    let outcome = manager.advance_session(&session.id, Value::Null).await.unwrap();
    assert_eq!(outcome.session().stage, Stage::Validating);
    assert_eq!(outcome.session().history.len(), 1);
    assert_eq!(ctx.store.load(&session.id).await.unwrap().unwrap().stage, Stage::Validating);
}

//! Session workflow integration tests
//!
//! Start, advance, retry, fail, cancel and restart journeys, each run on
//! the file and the SQLite backend.

use assert_matches::assert_matches;
use serde_json::{json, Value};

use ProvisionFlow::config::StoreBackend;
use ProvisionFlow::models::{SessionStatus, Stage, TransitionOutcome};
use ProvisionFlow::services::AdvanceOutcome;
use ProvisionFlow::FlowError;

use crate::helpers::TestConfig;
use crate::integration::setup_integration_test;

const HAPPY_PATH: [Stage; 5] = [
    Stage::Validating,
    Stage::Configuring,
    Stage::ProvisioningSoftware,
    Stage::Documenting,
    Stage::Completed,
];

async fn fresh_session_starts_collecting(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();

    let session = ctx.manager.start_session(json!({})).await.unwrap();

    assert_eq!(session.stage, Stage::Collecting);
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.history.is_empty());
    assert_eq!(session.context.get("collecting_done"), Some(&json!(true)));
    assert_eq!(ctx.handlers.data_collection.calls(), 1);
    assert_eq!(ctx.handlers.data_collection.inputs(), vec![json!({})]);

    let stored = ctx.store.load(&session.id).await.unwrap();
    assert_eq!(stored, Some(session));
}

async fn full_run_reaches_completed(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();

    for (index, expected) in HAPPY_PATH.iter().enumerate() {
        let outcome = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
        assert_matches!(&outcome, AdvanceOutcome::Advanced { rejected_keys, .. } if rejected_keys.is_empty());
        assert_eq!(outcome.session().stage, *expected);
        assert_eq!(outcome.session().history.len(), index + 1);
    }

    let finished = ctx.manager.get_session(&session.id).await.unwrap();
    assert_eq!(finished.stage, Stage::Completed);
    assert_eq!(finished.status, SessionStatus::Completed);
    assert_eq!(finished.history.len(), 5);
    assert!(finished
        .history
        .iter()
        .all(|record| record.outcome == TransitionOutcome::Advanced));
    // collecting ran twice: once at start and once for the first advance
    assert_eq!(ctx.handlers.data_collection.calls(), 2);
    for stage in &HAPPY_PATH[..4] {
        assert_eq!(ctx.handlers.for_stage(*stage).calls(), 1, "handler for {}", stage);
    }

    assert_matches!(
        ctx.manager.advance_session(&session.id, Value::Null).await,
        Err(FlowError::TerminalSession { status: SessionStatus::Completed, .. })
    );
}

async fn unknown_id_is_not_found(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();

    assert_matches!(
        ctx.manager.advance_session("no-such-session", Value::Null).await,
        Err(FlowError::SessionNotFound { session_id }) if session_id == "no-such-session"
    );
    assert_eq!(ctx.handlers.data_collection.calls(), 0);
}

async fn retry_at_validating_keeps_stage(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();

    ctx.handlers.validation.push_retry("memory_gb must be between 1 and 512, got 0");
    let outcome = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();

    assert_matches!(
        &outcome,
        AdvanceOutcome::Retry { reason, .. } if reason == "memory_gb must be between 1 and 512, got 0"
    );
    let retried = outcome.into_session();
    assert_eq!(retried.stage, Stage::Validating);
    assert_eq!(retried.status, SessionStatus::Active);
    assert_eq!(retried.history.len(), 1);
    assert_eq!(retried.errors.len(), 1);
    assert_eq!(retried.errors[0].stage, Stage::Validating);

    // the retry is durable
    let stored = ctx.store.load(&session.id).await.unwrap().unwrap();
    assert_eq!(stored, retried);

    let next = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    assert_eq!(next.session().stage, Stage::Configuring);
    assert_eq!(next.session().history.len(), 2);
}

async fn fatal_handler_fails_session(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();

    ctx.handlers.configuration.push_fatal("no node has capacity");
    let outcome = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();

    assert_matches!(&outcome, AdvanceOutcome::Failed { reason, .. } if reason == "no node has capacity");
    let failed = outcome.session();
    assert_eq!(failed.stage, Stage::Failed);
    assert_eq!(failed.status, SessionStatus::Failed);
    assert_eq!(failed.history.len(), 3);
    assert_eq!(failed.terminal_reason(), Some("no node has capacity"));

    assert_matches!(
        ctx.manager.advance_session(&session.id, Value::Null).await,
        Err(FlowError::TerminalSession { stage: Stage::Failed, .. })
    );
}

async fn cancel_at_configuring_is_terminal(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();

    let cancelled = ctx.manager.cancel_session(&session.id, "requester withdrew").await.unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert_eq!(cancelled.stage, Stage::Cancelled);
    assert_eq!(
        cancelled.history.last().map(|record| (record.from, record.to)),
        Some((Stage::Configuring, Stage::Cancelled))
    );
    assert_eq!(cancelled.terminal_reason(), Some("requester withdrew"));

    assert_matches!(
        ctx.manager.advance_session(&session.id, Value::Null).await,
        Err(FlowError::TerminalSession { status: SessionStatus::Cancelled, .. })
    );
    assert_eq!(ctx.handlers.configuration.calls(), 0);
}

async fn restart_resumes_from_store(backend: StoreBackend) {
    let mut ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();
    let before = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap().into_session();

    ctx.restart().await.unwrap();
    assert!(ctx.manager.cache().is_empty());

    let outcome = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    let after = outcome.session();
    assert_eq!(after.stage, Stage::Configuring);
    assert_eq!(after.history.len(), 2);
    assert_eq!(after.history[0], before.history[0]);
    assert_eq!(after.created_at, before.created_at);
    assert!(ctx.manager.cache().contains(&session.id));
}

async fn pause_blocks_advance(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    let session = ctx.manager.start_session(json!({})).await.unwrap();

    ctx.manager.pause_session(&session.id).await.unwrap();
    assert_matches!(
        ctx.manager.advance_session(&session.id, Value::Null).await,
        Err(FlowError::SessionPaused { stage: Stage::Collecting, .. })
    );

    let resumed = ctx.manager.resume_session(&session.id).await.unwrap();
    assert!(resumed.history.is_empty());
    let outcome = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    assert_eq!(outcome.session().stage, Stage::Validating);
}

async fn start_handler_failure_persists_session(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    ctx.handlers.data_collection.push_retry("request input must be a JSON object");

    let err = ctx.manager.start_session(json!("web-01")).await.unwrap_err();
    let session_id = match err {
        FlowError::Handler { session_id, stage, source } => {
            assert_eq!(stage, Stage::Collecting);
            assert!(source.is_retry());
            session_id
        }
        other => panic!("unexpected error: {other}"),
    };

    let stored = ctx.manager.get_session(&session_id).await.unwrap();
    assert_eq!(stored.stage, Stage::Collecting);
    assert_eq!(stored.status, SessionStatus::Active);
    assert!(stored.context.is_empty());

    let outcome = ctx.manager.advance_session(&session_id, json!({})).await.unwrap();
    assert_eq!(outcome.session().stage, Stage::Validating);
}

async fn foreign_keys_are_rejected(backend: StoreBackend) {
    let ctx = setup_integration_test(TestConfig::backend(backend)).await.unwrap();
    ctx.handlers
        .data_collection
        .push_output(&[("vm_name", json!("web-01")), ("software", json!(["nginx"]))]);
    let session = ctx.manager.start_session(json!({})).await.unwrap();

    // collecting owns both keys; validating may supersede vm_name but not software
    ctx.handlers.data_collection.push_output(&[("vm_name", json!("web-01"))]);
    ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    ctx.handlers
        .validation
        .push_output(&[("vm_name", json!("web-02")), ("software", json!(["redis"]))]);

    let outcome = ctx.manager.advance_session(&session.id, Value::Null).await.unwrap();
    assert_matches!(
        &outcome,
        AdvanceOutcome::Advanced { rejected_keys, .. } if rejected_keys == &vec!["software".to_string()]
    );
    let session = outcome.session();
    assert_eq!(session.get_string("vm_name"), Some("web-02".to_string()));
    assert_eq!(session.context.get("software"), Some(&json!(["nginx"])));
    assert_eq!(session.owner_of("vm_name"), Some(Stage::Validating));
    assert_eq!(session.owner_of("software"), Some(Stage::Collecting));
}

#[tokio::test]
async fn test_fresh_session_starts_collecting_file() {
    fresh_session_starts_collecting(StoreBackend::File).await;
}

#[tokio::test]
async fn test_fresh_session_starts_collecting_sqlite() {
    fresh_session_starts_collecting(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_full_run_reaches_completed_file() {
    full_run_reaches_completed(StoreBackend::File).await;
}

#[tokio::test]
async fn test_full_run_reaches_completed_sqlite() {
    full_run_reaches_completed(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_unknown_id_is_not_found_file() {
    unknown_id_is_not_found(StoreBackend::File).await;
}

#[tokio::test]
async fn test_unknown_id_is_not_found_sqlite() {
    unknown_id_is_not_found(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_retry_at_validating_keeps_stage_file() {
    retry_at_validating_keeps_stage(StoreBackend::File).await;
}

#[tokio::test]
async fn test_retry_at_validating_keeps_stage_sqlite() {
    retry_at_validating_keeps_stage(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_fatal_handler_fails_session_file() {
    fatal_handler_fails_session(StoreBackend::File).await;
}

#[tokio::test]
async fn test_fatal_handler_fails_session_sqlite() {
    fatal_handler_fails_session(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_cancel_at_configuring_is_terminal_file() {
    cancel_at_configuring_is_terminal(StoreBackend::File).await;
}

#[tokio::test]
async fn test_cancel_at_configuring_is_terminal_sqlite() {
    cancel_at_configuring_is_terminal(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_restart_resumes_from_store_file() {
    restart_resumes_from_store(StoreBackend::File).await;
}

#[tokio::test]
async fn test_restart_resumes_from_store_sqlite() {
    restart_resumes_from_store(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_pause_blocks_advance_file() {
    pause_blocks_advance(StoreBackend::File).await;
}

#[tokio::test]
async fn test_pause_blocks_advance_sqlite() {
    pause_blocks_advance(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_start_handler_failure_persists_session_file() {
    start_handler_failure_persists_session(StoreBackend::File).await;
}

#[tokio::test]
async fn test_start_handler_failure_persists_session_sqlite() {
    start_handler_failure_persists_session(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_foreign_keys_are_rejected_file() {
    foreign_keys_are_rejected(StoreBackend::File).await;
}

#[tokio::test]
async fn test_foreign_keys_are_rejected_sqlite() {
    foreign_keys_are_rejected(StoreBackend::Sqlite).await;
}

//! Session manager
//!
//! Drives sessions through the stage machine: loads them through the cache,
//! dispatches the current stage to its handler, applies the outcome and
//! commits the new snapshot to the store before the cache sees it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream};
use futures::TryStreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::gates::SessionGates;
use super::retention::RetentionWorker;
use crate::config::RetentionConfig;
use crate::handlers::{HandlerRegistry, StageHandler};
use crate::models::{
    timeline, ListCursor, ManagerStats, Session, SessionFilter, SessionStatus, SessionStatusReport,
    SessionSummary, Stage, TimelineEvent, TransitionOutcome,
};
use crate::state::{SessionCache, SessionStore, StageMachine};
use crate::utils::errors::{FlowError, HandlerError, Result};
use crate::utils::helpers;
use crate::utils::logging::{log_cleanup, log_handler_retry, log_transition};

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Summaries fetched per store query while streaming a listing
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Result of [`SessionManager::advance_session`]
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// Handler succeeded and the session moved to the next stage
    Advanced {
        session: Session,
        /// Output keys dropped because another stage owns them
        rejected_keys: Vec<String>,
    },
    /// Handler asked for a retry; stage and history are unchanged
    Retry { session: Session, reason: String },
    /// Handler failed fatally; the session is now `failed`
    Failed { session: Session, reason: String },
}

impl AdvanceOutcome {
    pub fn session(&self) -> &Session {
        match self {
            AdvanceOutcome::Advanced { session, .. }
            | AdvanceOutcome::Retry { session, .. }
            | AdvanceOutcome::Failed { session, .. } => session,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            AdvanceOutcome::Advanced { session, .. }
            | AdvanceOutcome::Retry { session, .. }
            | AdvanceOutcome::Failed { session, .. } => session,
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, AdvanceOutcome::Advanced { .. })
    }
}

/// Lazy, restartable listing of session summaries.
///
/// Nothing is read until [`stream`](Self::stream) is polled; every call to
/// `stream` starts again from the first page.
#[derive(Clone)]
pub struct SessionListing {
    store: Arc<dyn SessionStore>,
    filter: SessionFilter,
    page_size: usize,
}

impl SessionListing {
    pub fn new(store: Arc<dyn SessionStore>, filter: SessionFilter) -> Self {
        Self {
            store,
            filter,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn filter(&self) -> &SessionFilter {
        &self.filter
    }

    pub fn stream(&self) -> BoxStream<'static, Result<SessionSummary>> {
        Box::pin(summary_pages(Arc::clone(&self.store), self.filter.clone(), self.page_size))
    }

    /// Drain a fresh stream into a vector
    pub async fn collect(&self) -> Result<Vec<SessionSummary>> {
        self.stream().try_collect().await
    }
}

/// Page through `store` honouring the filter's own offset and limit.
///
/// Pages after the first continue from the last summary seen rather than
/// from an offset, so sessions updated mid-listing never shift the rest.
fn summary_pages(
    store: Arc<dyn SessionStore>,
    filter: SessionFilter,
    page_size: usize,
) -> impl Stream<Item = Result<SessionSummary>> + Send + 'static {
    try_stream! {
        let mut offset = filter.offset;
        let mut after = filter.after.clone();
        let mut remaining = filter.limit;

        loop {
            let take = match remaining {
                Some(0) => break,
                Some(left) => left.min(page_size),
                None => page_size,
            };

            let page_filter = SessionFilter {
                after: after.clone(),
                limit: Some(take),
                offset,
                ..filter.clone()
            };
            let page = store.query(&page_filter).await?;
            let fetched = page.len();
            after = page.last().map(ListCursor::of).or(after);

            for summary in page {
                yield summary;
            }

            if fetched < take {
                break;
            }
            offset = 0;
            if let Some(left) = remaining.as_mut() {
                *left -= fetched;
            }
        }
    }
}

impl std::fmt::Debug for SessionListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionListing")
            .field("backend", &self.store.backend_name())
            .field("filter", &self.filter)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Builder for [`SessionManager`]
#[derive(Default)]
pub struct SessionManagerBuilder {
    store: Option<Arc<dyn SessionStore>>,
    cache_capacity: Option<usize>,
    handlers: HandlerRegistry,
}

impl SessionManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.register(handler);
        self
    }

    /// Build the manager; every capability must have a handler
    pub fn build(self) -> Result<SessionManager> {
        let store = self
            .store
            .ok_or_else(|| FlowError::Config("a session store is required".to_string()))?;
        self.handlers.ensure_complete()?;

        let capacity = self.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
        if capacity == 0 {
            return Err(FlowError::Config("cache capacity must be at least 1".to_string()));
        }

        info!(
            backend = store.backend_name(),
            cache_capacity = capacity,
            handlers = self.handlers.len(),
            "Session manager built"
        );

        Ok(SessionManager {
            store,
            cache: SessionCache::new(capacity),
            handlers: self.handlers,
            machine: StageMachine::new(),
            gates: SessionGates::new(),
            retention: parking_lot::Mutex::new(None),
        })
    }
}

/// Workflow engine entry point
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: SessionCache,
    handlers: HandlerRegistry,
    machine: StageMachine,
    gates: SessionGates,
    retention: parking_lot::Mutex<Option<RetentionWorker>>,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::new()
    }

    pub fn machine(&self) -> &StageMachine {
        &self.machine
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Create a session and run data collection on `initial_input`.
    ///
    /// A handler failure still persists the new session at its first stage
    /// and returns a `Handler` error carrying its id, so the caller can
    /// retry with [`advance_session`](Self::advance_session).
    pub async fn start_session(&self, initial_input: Value) -> Result<Session> {
        let mut session = Session::new();
        let stage = session.stage;
        let handler = self.handlers.get(self.machine.handler_for(stage)?)?;

        let gate = self.gates.gate(&session.id);
        let _op = gate.op.lock().await;

        debug!(session_id = %session.id, stage = %stage, "Starting session");
        match handler.handle(stage, &session.context, &initial_input).await {
            Ok(output) => {
                let rejected = session.merge_output(stage, output);
                if !rejected.is_empty() {
                    warn!(session_id = %session.id, keys = ?rejected, "Dropped context keys owned by another stage");
                }
                let _commit = gate.commit.lock().await;
                self.commit(&session, stage).await?;
                info!(session_id = %session.id, stage = %stage, "Session started");
                Ok(session)
            }
            Err(source) => {
                let _commit = gate.commit.lock().await;
                self.commit(&session, stage).await?;
                warn!(session_id = %session.id, stage = %stage, error = %source, "Session started but data collection failed");
                Err(FlowError::Handler {
                    session_id: session.id,
                    stage,
                    source,
                })
            }
        }
    }

    /// Run the handler for the session's current stage and apply its outcome.
    ///
    /// Retry and fatal handler outcomes are reported through
    /// [`AdvanceOutcome`], not as errors.
    pub async fn advance_session(&self, id: &str, input: Value) -> Result<AdvanceOutcome> {
        let gate = self.gates.gate(id);
        let _op = gate.op.lock().await;

        let (stage, context) = {
            let _commit = gate.commit.lock().await;
            let session = self.load(id).await?;
            self.ensure_runnable(&session)?;
            (session.stage, session.context)
        };

        let handler = self.handlers.get(self.machine.handler_for(stage)?)?;
        debug!(session_id = id, stage = %stage, "Dispatching stage handler");
        let result = handler.handle(stage, &context, &input).await;

        let _commit = gate.commit.lock().await;
        // the session may have been cancelled or removed while the handler ran
        let mut session = self.load(id).await?;
        if session.is_terminal() {
            debug!(session_id = id, status = %session.status, "Discarding handler result for terminal session");
            return Err(terminal_error(&session));
        }

        match result {
            Ok(output) => {
                let rejected_keys = session.merge_output(stage, output);
                if !rejected_keys.is_empty() {
                    warn!(session_id = id, stage = %stage, keys = ?rejected_keys, "Dropped context keys owned by another stage");
                }
                let next = self.machine.successor(stage)?;
                session.transition(next, TransitionOutcome::Advanced)?;
                self.commit(&session, stage).await?;
                log_transition(id, stage, next, session.status);
                Ok(AdvanceOutcome::Advanced { session, rejected_keys })
            }
            Err(HandlerError::Retry { reason }) => {
                session.record_error(reason.clone());
                self.commit(&session, stage).await?;
                log_handler_retry(id, stage, &reason);
                Ok(AdvanceOutcome::Retry { session, reason })
            }
            Err(HandlerError::Fatal { reason }) => {
                session.transition(Stage::Failed, TransitionOutcome::Failed { reason: reason.clone() })?;
                self.commit(&session, stage).await?;
                log_transition(id, stage, Stage::Failed, session.status);
                Ok(AdvanceOutcome::Failed { session, reason })
            }
        }
    }

    /// Mark an active session paused; pausing a paused session is a no-op
    pub async fn pause_session(&self, id: &str) -> Result<Session> {
        self.set_paused(id, true).await
    }

    /// Mark a paused session active; resuming an active session is a no-op
    pub async fn resume_session(&self, id: &str) -> Result<Session> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: &str, paused: bool) -> Result<Session> {
        let gate = self.gates.gate(id);
        let _op = gate.op.lock().await;
        let _commit = gate.commit.lock().await;

        let mut session = self.load(id).await?;
        if session.is_terminal() {
            return Err(terminal_error(&session));
        }
        if session.is_paused() == paused {
            return Ok(session);
        }

        session.status = if paused {
            SessionStatus::Paused
        } else {
            SessionStatus::Active
        };
        session.touch();
        self.commit(&session, session.stage).await?;
        info!(session_id = id, stage = %session.stage, status = %session.status, "Session status changed");
        Ok(session)
    }

    /// Cancel a non-terminal session, paused ones included.
    ///
    /// Does not wait for an in-flight handler; its result is discarded.
    pub async fn cancel_session(&self, id: &str, reason: impl Into<String>) -> Result<Session> {
        let gate = self.gates.gate(id);
        let _commit = gate.commit.lock().await;

        let mut session = self.load(id).await?;
        if session.is_terminal() {
            return Err(terminal_error(&session));
        }

        let from = session.stage;
        session.transition(Stage::Cancelled, TransitionOutcome::Cancelled { reason: reason.into() })?;
        self.commit(&session, from).await?;
        log_transition(id, from, Stage::Cancelled, session.status);
        Ok(session)
    }

    /// Current snapshot of a session
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let gate = self.gates.gate(id);
        let _commit = gate.commit.lock().await;
        self.load(id).await
    }

    /// Remove a session regardless of its status
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let gate = self.gates.gate(id);
        let _commit = gate.commit.lock().await;
        let deleted = self
            .store
            .delete(id)
            .await
            .map_err(|source| FlowError::persistence(id, None, source))?;
        self.cache.remove(id);

        if deleted {
            info!(session_id = id, "Session deleted");
        }
        Ok(deleted)
    }

    /// Lazy listing of session summaries matching `filter`
    pub fn list_sessions(&self, filter: SessionFilter) -> SessionListing {
        SessionListing::new(Arc::clone(&self.store), filter)
    }

    /// Remove terminal sessions last updated more than `older_than` ago
    pub async fn cleanup(&self, older_than: chrono::Duration) -> Result<usize> {
        let Some(cutoff) = helpers::cutoff_for_age(older_than) else {
            debug!(older_than_secs = older_than.num_seconds(), "Cleanup age exceeds the clock range");
            return Ok(0);
        };
        self.cleanup_before(cutoff).await
    }

    /// Remove terminal sessions last updated strictly before `cutoff`
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let candidates: Vec<SessionSummary> = self
            .store
            .query(&SessionFilter::new().updated_before(cutoff))
            .await?
            .into_iter()
            .filter(|summary| summary.status.is_terminal())
            .collect();

        let mut removed = 0;
        let mut cache_evicted = 0;

        for summary in candidates {
            let gate = self.gates.gate(&summary.id);
            let _commit = gate.commit.lock().await;
            let deleted = self
                .store
                .delete(&summary.id)
                .await
                .map_err(|source| FlowError::persistence(&summary.id, Some(summary.stage), source))?;
            if deleted {
                removed += 1;
            }
            if self.cache.remove(&summary.id).is_some() {
                cache_evicted += 1;
            }
        }

        debug!(cutoff = %helpers::format_timestamp(cutoff), "Cleanup pass finished");
        log_cleanup(removed, cache_evicted);
        Ok(removed)
    }

    pub async fn status_report(&self, id: &str) -> Result<SessionStatusReport> {
        let session = self.get_session(id).await?;
        Ok(SessionStatusReport::new(&session, &self.machine))
    }

    pub async fn timeline(&self, id: &str) -> Result<Vec<TimelineEvent>> {
        let session = self.get_session(id).await?;
        Ok(timeline(&session))
    }

    pub async fn stats(&self) -> Result<ManagerStats> {
        let summaries = self.store.query(&SessionFilter::new()).await?;

        let mut by_status: BTreeMap<String, usize> = SessionStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        for summary in &summaries {
            *by_status.entry(summary.status.as_str().to_string()).or_insert(0) += 1;
        }

        Ok(ManagerStats {
            total_sessions: summaries.len(),
            by_status,
            cache: self.cache.stats(),
            backend: self.store.backend_name(),
        })
    }

    /// Drop every cached snapshot; the store is untouched
    pub fn clear_cache(&self) -> usize {
        let cleared = self.cache.clear();
        debug!(cleared = cleared, "Session cache cleared");
        cleared
    }

    /// Start periodic retention cleanup. Returns false when retention is
    /// disabled or a worker is already running.
    pub fn start_retention(self: &Arc<Self>, config: &RetentionConfig) -> bool {
        if !config.enabled {
            info!("Retention cleanup disabled");
            return false;
        }

        let mut slot = self.retention.lock();
        if slot.as_ref().is_some_and(RetentionWorker::is_running) {
            warn!("Retention worker is already running");
            return false;
        }

        let mut worker = RetentionWorker::new(config);
        worker.start(Arc::downgrade(self));
        *slot = Some(worker);
        true
    }

    /// Stop the retention worker and drop cached state.
    ///
    /// Every commit has already reached the store, so there is nothing to flush.
    pub fn shutdown(&self) {
        if let Some(mut worker) = self.retention.lock().take() {
            worker.stop();
        }
        let cleared = self.cache.clear();
        info!(cache_cleared = cleared, "Session manager shut down");
    }

    /// Cached snapshot, falling back to the store. Callers hold the
    /// session's `commit` lock so a stale store read never overwrites a
    /// newer cache entry.
    async fn load(&self, id: &str) -> Result<Session> {
        if let Some(session) = self.cache.get(id) {
            return Ok(session);
        }

        let loaded = self
            .store
            .load(id)
            .await
            .map_err(|source| FlowError::persistence(id, None, source))?;
        match loaded {
            Some(session) => {
                self.cache.put(session.clone());
                Ok(session)
            }
            None => Err(FlowError::SessionNotFound {
                session_id: id.to_string(),
            }),
        }
    }

    /// Persist, then publish to the cache. `stage` is the stage the operation
    /// acted on and is reported with a store failure; the cache keeps the
    /// previous snapshot in that case.
    async fn commit(&self, session: &Session, stage: Stage) -> Result<()> {
        self.store
            .save(session)
            .await
            .map_err(|source| FlowError::persistence(&session.id, Some(stage), source))?;
        self.cache.put(session.clone());
        Ok(())
    }

    fn ensure_runnable(&self, session: &Session) -> Result<()> {
        if session.is_terminal() {
            return Err(terminal_error(session));
        }
        if session.is_paused() {
            return Err(FlowError::SessionPaused {
                session_id: session.id.clone(),
                stage: session.stage,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("backend", &self.store.backend_name())
            .field("cache", &self.cache.stats())
            .field("handlers", &self.handlers)
            .finish()
    }
}

fn terminal_error(session: &Session) -> FlowError {
    FlowError::TerminalSession {
        session_id: session.id.clone(),
        stage: session.stage,
        status: session.status,
    }
}

//! Read-only views over sessions: status reports, timelines and engine stats

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{Session, StageError, TransitionOutcome};
use super::stage::{SessionStatus, Stage};
use crate::state::machine::StageMachine;
use crate::state::CacheStats;

/// Where a session stands in the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusReport {
    pub id: String,
    pub stage: Stage,
    pub stage_name: String,
    pub status: SessionStatus,
    pub completed_stages: Vec<Stage>,
    pub next_stage: Option<Stage>,
    /// Percentage of the happy path reached
    pub progress: f64,
    pub transitions: usize,
    pub errors: Vec<StageError>,
    pub terminal_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatusReport {
    pub fn new(session: &Session, machine: &StageMachine) -> Self {
        let next_stage = if session.is_terminal() {
            None
        } else {
            machine.spec(session.stage).successor
        };

        Self {
            id: session.id.clone(),
            stage: session.stage,
            stage_name: machine.spec(session.stage).name.to_string(),
            status: session.status,
            completed_stages: machine.completed_stages(session.stage),
            next_stage,
            progress: machine.progress(session.stage),
            transitions: session.history.len(),
            errors: session.errors.clone(),
            terminal_reason: session.terminal_reason().map(str::to_string),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEventKind {
    Created,
    StageCompleted { next: Stage },
    Cancelled { reason: String },
    Failed { reason: String },
    Error { reason: String },
}

/// One entry of a session's chronological timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub at: DateTime<Utc>,
    pub stage: Stage,
    #[serde(flatten)]
    pub kind: TimelineEventKind,
}

/// Creation, transitions and recorded errors, oldest first
pub fn timeline(session: &Session) -> Vec<TimelineEvent> {
    let mut events = Vec::with_capacity(1 + session.history.len() + session.errors.len());
    events.push(TimelineEvent {
        at: session.created_at,
        stage: StageMachine::initial_stage(),
        kind: TimelineEventKind::Created,
    });

    for record in &session.history {
        let kind = match &record.outcome {
            TransitionOutcome::Advanced => TimelineEventKind::StageCompleted { next: record.to },
            TransitionOutcome::Cancelled { reason } => TimelineEventKind::Cancelled { reason: reason.clone() },
            TransitionOutcome::Failed { reason } => TimelineEventKind::Failed { reason: reason.clone() },
        };
        events.push(TimelineEvent {
            at: record.at,
            stage: record.from,
            kind,
        });
    }

    for error in &session.errors {
        events.push(TimelineEvent {
            at: error.at,
            stage: error.stage,
            kind: TimelineEventKind::Error {
                reason: error.reason.clone(),
            },
        });
    }

    // stable: equal timestamps keep creation, history, error order
    events.sort_by_key(|event| event.at);
    events
}

/// Engine-wide counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub total_sessions: usize,
    pub by_status: BTreeMap<String, usize>,
    pub cache: CacheStats,
    pub backend: &'static str,
}

impl ManagerStats {
    pub fn count(&self, status: SessionStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

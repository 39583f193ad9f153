//! Session model
//!
//! A session is one run of the provisioning workflow: its current stage,
//! the context accumulated by stage handlers, and the append-only history
//! of transitions applied to it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::{SessionStatus, Stage};
use crate::state::machine::StageMachine;
use crate::utils::errors::{FlowError, Result};
use crate::utils::helpers;

/// Accumulated key/value data contributed by stage handlers
pub type Context = BTreeMap<String, serde_json::Value>;

/// Output produced by one handler invocation
pub type StageOutput = Context;

/// What a history record represents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Advanced,
    Cancelled { reason: String },
    Failed { reason: String },
}

impl TransitionOutcome {
    pub fn reason(&self) -> Option<&str> {
        match self {
            TransitionOutcome::Advanced => None,
            TransitionOutcome::Cancelled { reason } | TransitionOutcome::Failed { reason } => {
                Some(reason)
            }
        }
    }
}

/// One applied stage transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
    pub outcome: TransitionOutcome,
}

/// A handler retry recorded against a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Durable unit of workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub stage: Stage,
    pub status: SessionStatus,
    #[serde(default)]
    pub context: Context,
    /// Stage that last wrote each context key
    #[serde(default)]
    pub context_owners: BTreeMap<String, Stage>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    #[serde(default)]
    pub errors: Vec<StageError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session at the first stage
    pub fn new() -> Self {
        let now = helpers::now();
        Self {
            id: Uuid::new_v4().to_string(),
            stage: StageMachine::initial_stage(),
            status: SessionStatus::Active,
            context: Context::new(),
            context_owners: BTreeMap::new(),
            history: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_paused(&self) -> bool {
        self.status == SessionStatus::Paused
    }

    /// Refresh `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = helpers::now();
    }

    /// Apply a transition validated by the stage machine and append it to history
    pub fn transition(&mut self, to: Stage, outcome: TransitionOutcome) -> Result<()> {
        if self.is_terminal() {
            return Err(FlowError::TerminalSession {
                session_id: self.id.clone(),
                stage: self.stage,
                status: self.status,
            });
        }
        StageMachine.validate_transition(self.stage, to)?;

        let at = helpers::now();
        self.history.push(TransitionRecord {
            from: self.stage,
            to,
            at,
            outcome,
        });
        self.stage = to;
        if let Some(status) = SessionStatus::for_stage(to) {
            self.status = status;
        }
        self.updated_at = at;
        Ok(())
    }

    /// Merge a handler's output into the context following key ownership rules.
    ///
    /// Returns the keys that were rejected because another stage owns them.
    pub fn merge_output(&mut self, stage: Stage, output: StageOutput) -> Vec<String> {
        let supersedes = StageMachine.spec(stage).supersedes;
        let mut rejected = Vec::new();

        for (key, value) in output {
            let writable = match self.context_owners.get(&key) {
                None => true,
                Some(owner) if *owner == stage => true,
                Some(_) => supersedes.contains(&key.as_str()),
            };

            if writable {
                self.context_owners.insert(key.clone(), stage);
                self.context.insert(key, value);
            } else {
                rejected.push(key);
            }
        }

        self.touch();
        rejected
    }

    /// Record a recoverable handler failure; the stage is left unchanged
    pub fn record_error(&mut self, reason: impl Into<String>) {
        let at = helpers::now();
        self.errors.push(StageError {
            stage: self.stage,
            reason: reason.into(),
            at,
        });
        self.updated_at = at;
    }

    /// Get typed data from the context
    pub fn get_data<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        match self.context.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Get string data (convenience method)
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_data::<String>(key).unwrap_or(None)
    }

    /// Get integer data (convenience method)
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_data::<i64>(key).unwrap_or(None)
    }

    /// Stage that owns a context key
    pub fn owner_of(&self, key: &str) -> Option<Stage> {
        self.context_owners.get(key).copied()
    }

    /// Number of transitions that ended in an advance
    pub fn advances(&self) -> usize {
        self.history
            .iter()
            .filter(|record| record.outcome == TransitionOutcome::Advanced)
            .count()
    }

    /// Reason attached to the last terminal transition, if any
    pub fn terminal_reason(&self) -> Option<&str> {
        self.history.last().and_then(|record| record.outcome.reason())
    }

    /// Lightweight listing view without the context
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            stage: self.stage,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry returned by queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub stage: Stage,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

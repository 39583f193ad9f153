//! Session query filter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionSummary;
use super::stage::{SessionStatus, Stage};

/// Position in the listing order: everything strictly after it is returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor {
    pub updated_at: DateTime<Utc>,
    pub id: String,
}

impl ListCursor {
    pub fn of(summary: &SessionSummary) -> Self {
        Self {
            updated_at: summary.updated_at,
            id: summary.id.clone(),
        }
    }

    /// Whether `summary` sorts after this position
    pub fn precedes(&self, summary: &SessionSummary) -> bool {
        summary.updated_at < self.updated_at
            || (summary.updated_at == self.updated_at && summary.id > self.id)
    }
}

/// Listing filter shared by the manager and every store backend.
///
/// `updated_after` is inclusive, `updated_before` exclusive. Results are
/// ordered by `updated_at` descending, ties broken by id ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub stage: Option<Stage>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    /// Keyset position; applied before `offset`
    pub after: Option<ListCursor>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn updated_after(mut self, at: DateTime<Utc>) -> Self {
        self.updated_after = Some(at);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn starting_after(mut self, cursor: ListCursor) -> Self {
        self.after = Some(cursor);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Check a summary against the predicate part of the filter
    pub fn matches(&self, summary: &SessionSummary) -> bool {
        if self.status.is_some_and(|status| status != summary.status) {
            return false;
        }
        if self.stage.is_some_and(|stage| stage != summary.stage) {
            return false;
        }
        if self.updated_after.is_some_and(|after| summary.updated_at < after) {
            return false;
        }
        if self.updated_before.is_some_and(|before| summary.updated_at >= before) {
            return false;
        }
        if self.after.as_ref().is_some_and(|cursor| !cursor.precedes(summary)) {
            return false;
        }
        true
    }

    /// Filter, order and paginate an in-memory set of summaries
    pub fn apply(&self, summaries: impl IntoIterator<Item = SessionSummary>) -> Vec<SessionSummary> {
        let mut matching: Vec<SessionSummary> =
            summaries.into_iter().filter(|s| self.matches(s)).collect();

        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        let paged = matching.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => paged.take(limit).collect(),
            None => paged.collect(),
        }
    }
}

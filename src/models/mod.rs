//! Data models
//!
//! Session, stage, query and report types shared by the engine and its store backends.

pub mod filter;
pub mod report;
pub mod session;
pub mod stage;

pub use filter::{ListCursor, SessionFilter};
pub use report::{timeline, ManagerStats, SessionStatusReport, TimelineEvent, TimelineEventKind};
pub use session::{
    Context, Session, SessionSummary, StageError, StageOutput, TransitionOutcome, TransitionRecord,
};
pub use stage::{SessionStatus, Stage};

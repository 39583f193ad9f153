//! Stage and status enumerations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of a session in the provisioning workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collecting,
    Validating,
    Configuring,
    ProvisioningSoftware,
    Documenting,
    Completed,
    Cancelled,
    Failed,
}

impl Stage {
    /// Every stage, happy path first
    pub const ALL: [Stage; 8] = [
        Stage::Collecting,
        Stage::Validating,
        Stage::Configuring,
        Stage::ProvisioningSoftware,
        Stage::Documenting,
        Stage::Completed,
        Stage::Cancelled,
        Stage::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collecting => "collecting",
            Stage::Validating => "validating",
            Stage::Configuring => "configuring",
            Stage::ProvisioningSoftware => "provisioning_software",
            Stage::Documenting => "documenting",
            Stage::Completed => "completed",
            Stage::Cancelled => "cancelled",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Active,
        SessionStatus::Paused,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
        SessionStatus::Failed,
    ];

    pub const TERMINAL: [SessionStatus; 3] = [
        SessionStatus::Completed,
        SessionStatus::Cancelled,
        SessionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Status implied by entering `stage`; `None` for non-terminal stages,
    /// where the active/paused flag is kept as is
    pub fn for_stage(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Completed => Some(SessionStatus::Completed),
            Stage::Cancelled => Some(SessionStatus::Cancelled),
            Stage::Failed => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status: {}", s))
    }
}

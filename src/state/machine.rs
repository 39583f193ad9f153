//! Stage machine
//!
//! Defines the provisioning workflow: the ordered stages, which transitions
//! are legal between them, and which handler capability performs each stage.
//! Everything here is static data and pure functions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Stage;
use crate::utils::errors::{FlowError, Result};

/// Handler capability responsible for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DataCollection,
    Validation,
    Configuration,
    SoftwareProvisioning,
    Documentation,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::DataCollection,
        Capability::Validation,
        Capability::Configuration,
        Capability::SoftwareProvisioning,
        Capability::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::DataCollection => "data_collection",
            Capability::Validation => "validation",
            Capability::Configuration => "configuration",
            Capability::SoftwareProvisioning => "software_provisioning",
            Capability::Documentation => "documentation",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub stage: Stage,
    /// Human-readable name
    pub name: &'static str,
    /// What happens in this stage
    pub description: &'static str,
    /// Handler that performs the stage; `None` for terminal stages
    pub capability: Option<Capability>,
    /// Happy-path successor; `None` for terminal stages
    pub successor: Option<Stage>,
    /// Context keys owned by earlier stages that this stage may overwrite
    pub supersedes: &'static [&'static str],
}

const SPECS: [StageSpec; 8] = [
    StageSpec {
        stage: Stage::Collecting,
        name: "Data Collection",
        description: "Gather the VM requirements from the requester",
        capability: Some(Capability::DataCollection),
        successor: Some(Stage::Validating),
        supersedes: &[],
    },
    StageSpec {
        stage: Stage::Validating,
        name: "Validation",
        description: "Check the collected requirements against resource and naming rules",
        capability: Some(Capability::Validation),
        successor: Some(Stage::Configuring),
        supersedes: &["vm_name", "os_type", "cpu_cores", "memory_gb", "disk_gb"],
    },
    StageSpec {
        stage: Stage::Configuring,
        name: "Configuration",
        description: "Generate the virtual machine configuration",
        capability: Some(Capability::Configuration),
        successor: Some(Stage::ProvisioningSoftware),
        supersedes: &[],
    },
    StageSpec {
        stage: Stage::ProvisioningSoftware,
        name: "Software Provisioning",
        description: "Plan the software to install on the machine",
        capability: Some(Capability::SoftwareProvisioning),
        successor: Some(Stage::Documenting),
        supersedes: &["software"],
    },
    StageSpec {
        stage: Stage::Documenting,
        name: "Documentation",
        description: "Produce the setup guide and configuration summary",
        capability: Some(Capability::Documentation),
        successor: Some(Stage::Completed),
        supersedes: &[],
    },
    StageSpec {
        stage: Stage::Completed,
        name: "Completed",
        description: "Workflow finished successfully",
        capability: None,
        successor: None,
        supersedes: &[],
    },
    StageSpec {
        stage: Stage::Cancelled,
        name: "Cancelled",
        description: "Workflow stopped on request",
        capability: None,
        successor: None,
        supersedes: &[],
    },
    StageSpec {
        stage: Stage::Failed,
        name: "Failed",
        description: "Workflow stopped by an unrecoverable handler failure",
        capability: None,
        successor: None,
        supersedes: &[],
    },
];

/// Transition rules for the provisioning workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageMachine;

impl StageMachine {
    pub fn new() -> Self {
        Self
    }

    /// Stage every new session starts in
    pub const fn initial_stage() -> Stage {
        Stage::Collecting
    }

    /// Static metadata for a stage
    pub fn spec(&self, stage: Stage) -> &'static StageSpec {
        // SPECS is laid out in Stage::ALL order
        let index = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0);
        &SPECS[index]
    }

    /// Happy-path stages in order, ending with `completed`
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Self::initial_stage()];
        let mut current = Self::initial_stage();
        while let Some(next) = self.spec(current).successor {
            stages.push(next);
            current = next;
        }
        stages
    }

    /// Whether `from -> to` is a legal transition
    pub fn can_transition(&self, from: Stage, to: Stage) -> bool {
        if from.is_terminal() {
            return false;
        }
        match to {
            Stage::Cancelled | Stage::Failed => true,
            _ => self.spec(from).successor == Some(to),
        }
    }

    /// Same as [`can_transition`](Self::can_transition) but as an error
    pub fn validate_transition(&self, from: Stage, to: Stage) -> Result<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(FlowError::InvalidTransition { from, to })
        }
    }

    /// Designated successor of a non-terminal stage
    pub fn successor(&self, stage: Stage) -> Result<Stage> {
        self.spec(stage).successor.ok_or_else(|| FlowError::InvalidStage {
            stage,
            reason: "terminal stages have no successor".to_string(),
        })
    }

    /// Handler capability responsible for a non-terminal stage
    pub fn handler_for(&self, stage: Stage) -> Result<Capability> {
        self.spec(stage).capability.ok_or_else(|| FlowError::InvalidStage {
            stage,
            reason: "terminal stages have no handler".to_string(),
        })
    }

    /// Happy-path stages already completed when a session sits at `stage`
    pub fn completed_stages(&self, stage: Stage) -> Vec<Stage> {
        let path = self.stages();
        match path.iter().position(|s| *s == stage) {
            Some(index) => path[..index].to_vec(),
            None => Vec::new(),
        }
    }

    /// Percentage of the happy path reached, 100 at `completed`
    pub fn progress(&self, stage: Stage) -> f64 {
        let path = self.stages();
        let steps = (path.len() - 1) as f64;
        match path.iter().position(|s| *s == stage) {
            Some(index) => index as f64 / steps * 100.0,
            None => 0.0,
        }
    }
}

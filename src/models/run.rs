use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NodeRole;

/// Heuristic reachability verdict scraped from a host console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Reachable,
    Unreachable,
    Indeterminate,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Reachable => "reachable",
            Verdict::Unreachable => "unreachable",
            Verdict::Indeterminate => "indeterminate",
        }
    }

    /// Unreachable and Indeterminate results need a human to confirm
    pub fn needs_confirmation(&self) -> bool {
        !matches!(self, Verdict::Reachable)
    }
}

/// Orchestrator stage. `Aborted` is reachable from every non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Provisioning,
    AwaitingReadiness,
    Configuring,
    Validating,
    Done,
    Aborted,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Provisioning => "provisioning",
            RunStage::AwaitingReadiness => "awaiting_readiness",
            RunStage::Configuring => "configuring",
            RunStage::Validating => "validating",
            RunStage::Done => "done",
            RunStage::Aborted => "aborted",
        }
    }
}

/// Per-device configuration status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceStatus {
    Applied,
    Failed { reason: String },
    SkippedDegraded { reason: String },
    NotAttempted,
}

impl DeviceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceStatus::Applied => "applied",
            DeviceStatus::Failed { .. } => "failed",
            DeviceStatus::SkippedDegraded { .. } => "skipped-degraded",
            DeviceStatus::NotAttempted => "not-attempted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub name: String,
    pub role: NodeRole,
    #[serde(flatten)]
    pub status: DeviceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub source: String,
    pub destination: String,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Aborted { stage: RunStage, error: String },
}

/// RunResult is the terminal artifact of a run; every device appears exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub devices: Vec<DeviceOutcome>,
    pub probes: Vec<ProbeOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub provisioning_errors: Vec<String>,
}

impl RunResult {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    pub fn device(&self, name: &str) -> Option<&DeviceOutcome> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn count_status(&self, label: &str) -> usize {
        self.devices.iter().filter(|d| d.status.label() == label).count()
    }
}

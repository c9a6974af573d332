use std::time::Duration;

use crate::models::ConsoleEndpoint;

/// Typed error taxonomy for a lab run. Console and generation errors are
/// caught at the per-device boundary and recorded in the run report; only
/// `LabUnreachable` and plan errors abort a run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LabError {
    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("invalid lab plan: {0}")]
    InvalidPlan(String),

    #[error("incomplete plan: {0}")]
    IncompletePlan(String),

    #[error("console {endpoint} unavailable: {reason}")]
    ConsoleUnavailable {
        endpoint: ConsoleEndpoint,
        reason: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("console session already closed")]
    SessionClosed,

    #[error("provisioning of {target} failed: {reason}")]
    ProvisioningFailed { target: String, reason: String },

    #[error("lab service unreachable: {0}")]
    LabUnreachable(String),
}

impl LabError {
    pub fn console_unavailable(endpoint: &ConsoleEndpoint, reason: impl Into<String>) -> Self {
        Self::ConsoleUnavailable {
            endpoint: endpoint.clone(),
            reason: reason.into(),
        }
    }

    pub fn connect_timeout(endpoint: &ConsoleEndpoint, after: Duration) -> Self {
        Self::console_unavailable(endpoint, format!("no connection within {:?}", after))
    }

    pub fn provisioning(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the whole run rather than a single device.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LabUnreachable(_) | Self::InvalidPlan(_) | Self::InvalidSubnet(_)
        )
    }
}

/// Error returned by a lab-management service call. Keeps "the service is
/// down" apart from "the service said no" so callers can decide between
/// aborting and recording.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Unreachable(String),

    #[error("lab service error {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Rejected {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

impl ServiceError {
    /// Convert into the run taxonomy for the given target (project, node, link).
    pub fn into_lab_error(self, target: &str) -> LabError {
        match self {
            Self::Unreachable(reason) => LabError::LabUnreachable(reason),
            other => LabError::provisioning(target, other.to_string()),
        }
    }
}

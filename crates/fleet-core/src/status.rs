//! Status enums for Tasks, Hosts, and provider instances.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Task as seen by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting in a distro queue.
    #[default]
    Undispatched,
    /// Task was handed to a host but the agent has not started it.
    Dispatched,
    /// Agent reported the task as started.
    Started,
    /// Task finished successfully.
    Success,
    /// Task finished with a failure.
    Failed,
}

impl TaskStatus {
    /// Returns true if the task has finished.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undispatched => "undispatched",
            Self::Dispatched => "dispatched",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a Host record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// Intent written; no remote machine has been requested yet.
    #[default]
    Uninitialized,
    /// The provider accepted the request and the machine is booting.
    Initializing,
    /// Provisioning failed; the host will never run tasks.
    ProvisionFailed,
    /// Provisioned and able to run tasks.
    Running,
    /// Pulled out of rotation for inspection.
    Quarantined,
    /// Finishes its current task, then gets torn down.
    Decommissioned,
    /// The remote machine is gone.
    Terminated,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::ProvisionFailed => "provision_failed",
            Self::Running => "running",
            Self::Quarantined => "quarantined",
            Self::Decommissioned => "decommissioned",
            Self::Terminated => "terminated",
        }
    }

    /// Returns true once the host can never come back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns true while the remote machine has not finished provisioning.
    pub fn is_pre_running(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Initializing)
    }

    /// Returns true if the host may be handed new tasks.
    pub fn can_accept_tasks(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Staying in the same state is always allowed so that reconciliation
    /// can be replayed.
    pub fn can_transition_to(&self, next: HostStatus) -> bool {
        use HostStatus::*;

        if *self == next || next == Terminated {
            return true;
        }
        match self {
            Uninitialized => matches!(next, Initializing | ProvisionFailed | Running),
            Initializing => matches!(next, ProvisionFailed | Running),
            Running => matches!(next, Quarantined | Decommissioned),
            Quarantined => matches!(next, Running | Decommissioned),
            Decommissioned | ProvisionFailed | Terminated => false,
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance status as reported by a cloud provider.
///
/// `Unknown` is never terminal: callers retry later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudStatus {
    /// Catch-all for provider states the mapping does not recognise.
    #[default]
    Unknown,
    /// Not yet clear whether the instance will start (e.g. a pending spot request).
    Pending,
    /// Request fulfilled, machine still booting.
    Initializing,
    /// The attempt to start the instance failed (billing, capacity, ...).
    Failed,
    /// Booted and active.
    Running,
    Stopped,
    Terminated,
}

impl CloudStatus {
    /// Map a provider-reported state name onto the closed enumeration.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "initializing" | "starting" | "provisioning" | "staging" => Self::Initializing,
            "failed" => Self::Failed,
            "running" => Self::Running,
            "stopped" | "stopping" | "suspended" => Self::Stopped,
            "terminated" | "shutting-down" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Failed => "failed",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for CloudStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognised_provider_state_is_unknown() {
        assert_eq!(CloudStatus::from_provider("hibernating"), CloudStatus::Unknown);
        assert_eq!(CloudStatus::from_provider(""), CloudStatus::Unknown);
        assert_eq!(CloudStatus::from_provider("RUNNING"), CloudStatus::Running);
        assert_eq!(CloudStatus::from_provider("shutting-down"), CloudStatus::Terminated);
    }

    #[test]
    fn test_host_transitions() {
        use HostStatus::*;

        assert!(Uninitialized.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(ProvisionFailed));
        assert!(Running.can_transition_to(Decommissioned));
        assert!(Quarantined.can_transition_to(Running));
        assert!(ProvisionFailed.can_transition_to(Terminated));

        assert!(!Running.can_transition_to(ProvisionFailed));
        assert!(!Terminated.can_transition_to(Running));
        assert!(!Decommissioned.can_transition_to(Running));
    }

    #[test]
    fn test_host_status_serializes_snake_case() {
        let json = serde_json::to_string(&HostStatus::ProvisionFailed).unwrap();
        assert_eq!(json, "\"provision_failed\"");
        assert_eq!(HostStatus::ProvisionFailed.to_string(), "provision_failed");
    }
}

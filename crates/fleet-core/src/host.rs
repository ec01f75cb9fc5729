//! Host records and their creation options.

use crate::{CoreError, Distro, HostId, HostStatus, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A machine (or the intent to create one) that runs agent tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Instance tag; the host's identity for its whole life.
    pub id: HostId,

    /// Provider-assigned instance id, known once the spawn call returned.
    #[serde(default)]
    pub instance_id: Option<String>,

    /// DNS name, empty until resolved.
    #[serde(default)]
    pub dns_name: String,

    /// Login user on the machine.
    pub user: String,

    pub distro: Distro,

    /// Name of the CloudManager backing this host.
    pub provider: String,

    /// Secret the agent on this host presents with every request.
    pub secret: String,

    #[serde(default)]
    pub status: HostStatus,

    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub termination_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_communication_time: Option<DateTime<Utc>>,

    /// Task currently assigned to this host.
    #[serde(default)]
    pub running_task: Option<TaskId>,

    /// Pid of the agent process running the current task.
    #[serde(default)]
    pub task_pid: Option<String>,

    /// User who requested the host, empty for fleet hosts.
    #[serde(default)]
    pub started_by: String,

    /// Whether a user spawned this host by hand.
    #[serde(default)]
    pub user_host: bool,

    #[serde(default)]
    pub provisioned: bool,

    #[serde(default)]
    pub provision_options: Option<ProvisionOptions>,

    #[serde(default)]
    pub user_data: Option<String>,
}

impl Host {
    /// Returns true if no task is assigned.
    pub fn is_idle(&self) -> bool {
        self.running_task.is_none()
    }

    /// Whether this host is the one running `task_id`.
    pub fn runs(&self, task_id: &TaskId) -> bool {
        self.running_task.as_ref() == Some(task_id)
    }

    /// Returns true if the host has an expiration time that has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration_time, Some(exp) if exp <= now)
    }

    /// Move to `next`, returning the previous status.
    pub fn set_status(&mut self, next: HostStatus) -> Result<HostStatus, CoreError> {
        let prev = self.status;
        if !prev.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: prev,
                to: next,
            });
        }
        self.status = next;
        Ok(prev)
    }

    /// Mark the remote machine as gone.
    pub fn terminate(&mut self, now: DateTime<Utc>) -> HostStatus {
        let prev = self.status;
        self.status = HostStatus::Terminated;
        if self.termination_time.is_none() {
            self.termination_time = Some(now);
        }
        prev
    }
}

/// Extra provisioning steps requested with a spawn host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionOptions {
    /// Task whose data should be loaded onto the host.
    #[serde(default)]
    pub task_id: Option<TaskId>,
    /// Whether to install the CLI on the host.
    #[serde(default)]
    pub load_cli: bool,
    #[serde(default)]
    pub owner_id: String,
}

/// Immutable creation parameters bound into a host at intent time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostOptions {
    pub provision_options: Option<ProvisionOptions>,
    /// How long after creation the host expires; `None` means never.
    pub expiration_duration: Option<Duration>,
    pub user_name: String,
    pub user_data: String,
    pub user_host: bool,
}

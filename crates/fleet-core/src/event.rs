//! Audit events for hosts and task telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{HostId, HostStatus, TaskId, TaskStatus};

/// Kind of resource an event stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Host,
    Task,
}

/// Type of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    HostCreated,
    HostStatusChanged,
    #[serde(rename = "HOST_DNS_NAME_SET")]
    HostDnsNameSet,
    HostProvisionFailed,
    HostProvisioned,
    HostRunningTaskSet,
    HostRunningTaskCleared,
    HostTaskPidSet,
    HostMonitorFlag,
    HostTaskFinished,
    HostTeardown,
    TaskSystemInfo,
    TaskProcessInfo,
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub event_type: EventType,
    pub data: EventData,
}

/// Typed payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "r_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventData {
    Host(HostEventData),
    Task(TaskEventData),
}

impl EventData {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Host(_) => ResourceType::Host,
            Self::Task(_) => ResourceType::Task,
        }
    }
}

/// Host event payload. Each kind fills only the fields relevant to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostEventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<HostStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<HostStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Task telemetry payload, kept as the JSON the agent sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEventData {
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a host event stamped with the current time.
    pub fn host(host_id: &HostId, event_type: EventType, data: HostEventData) -> Self {
        Self {
            timestamp: Utc::now(),
            resource_id: host_id.to_string(),
            resource_type: ResourceType::Host,
            event_type,
            data: EventData::Host(data),
        }
    }

    /// Create a task telemetry event stamped with the current time.
    pub fn task(task_id: &TaskId, event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            resource_id: task_id.to_string(),
            resource_type: ResourceType::Task,
            event_type,
            data: EventData::Task(TaskEventData { payload }),
        }
    }

    /// The payload must belong to the resource type the event claims.
    pub fn is_valid(&self) -> bool {
        !self.resource_id.is_empty() && self.data.resource_type() == self.resource_type
    }

    pub fn host_data(&self) -> Option<&HostEventData> {
        match &self.data {
            EventData::Host(data) => Some(data),
            EventData::Task(_) => None,
        }
    }

    pub fn host_created(host_id: &HostId) -> Self {
        Self::host(host_id, EventType::HostCreated, HostEventData::default())
    }

    /// Returns `None` when nothing changed, so re-reconciliation does not spam the log.
    pub fn host_status_changed(
        host_id: &HostId,
        old_status: HostStatus,
        new_status: HostStatus,
    ) -> Option<Self> {
        if old_status == new_status {
            return None;
        }
        Some(Self::host(
            host_id,
            EventType::HostStatusChanged,
            HostEventData {
                old_status: Some(old_status),
                new_status: Some(new_status),
                ..Default::default()
            },
        ))
    }

    pub fn host_dns_name_set(host_id: &HostId, dns_name: &str) -> Self {
        Self::host(
            host_id,
            EventType::HostDnsNameSet,
            HostEventData {
                hostname: Some(dns_name.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn host_provisioned(host_id: &HostId) -> Self {
        Self::host(host_id, EventType::HostProvisioned, HostEventData::default())
    }

    pub fn host_provision_failed(host_id: &HostId, setup_logs: &str) -> Self {
        Self::host(
            host_id,
            EventType::HostProvisionFailed,
            HostEventData {
                logs: Some(setup_logs.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn host_running_task_set(host_id: &HostId, task_id: &TaskId) -> Self {
        Self::host(
            host_id,
            EventType::HostRunningTaskSet,
            HostEventData {
                task_id: Some(task_id.clone()),
                ..Default::default()
            },
        )
    }

    pub fn host_running_task_cleared(host_id: &HostId, task_id: &TaskId) -> Self {
        Self::host(
            host_id,
            EventType::HostRunningTaskCleared,
            HostEventData {
                task_id: Some(task_id.clone()),
                ..Default::default()
            },
        )
    }

    pub fn host_task_pid_set(host_id: &HostId, task_pid: &str) -> Self {
        Self::host(
            host_id,
            EventType::HostTaskPidSet,
            HostEventData {
                task_pid: Some(task_pid.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn host_monitor_flag(host_id: &HostId, op: &str) -> Self {
        Self::host(
            host_id,
            EventType::HostMonitorFlag,
            HostEventData {
                monitor_op: Some(op.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn host_task_finished(host_id: &HostId, task_id: &TaskId, status: TaskStatus) -> Self {
        Self::host(
            host_id,
            EventType::HostTaskFinished,
            HostEventData {
                task_id: Some(task_id.clone()),
                task_status: Some(status),
                ..Default::default()
            },
        )
    }

    pub fn host_teardown(host_id: &HostId, logs: &str, successful: bool, duration: Duration) -> Self {
        Self::host(
            host_id,
            EventType::HostTeardown,
            HostEventData {
                logs: Some(logs.to_string()),
                successful: Some(successful),
                duration_ms: Some(duration.as_millis() as u64),
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_changed_skipped_when_equal() {
        let id = HostId::new("h1");
        assert!(Event::host_status_changed(&id, HostStatus::Running, HostStatus::Running).is_none());
    }

    #[test]
    fn test_status_changed_records_both_sides() {
        let id = HostId::new("h1");
        let event =
            Event::host_status_changed(&id, HostStatus::Initializing, HostStatus::Running).unwrap();

        assert_eq!(event.event_type, EventType::HostStatusChanged);
        assert_eq!(event.resource_type, ResourceType::Host);
        let data = event.host_data().unwrap();
        assert_eq!(data.old_status, Some(HostStatus::Initializing));
        assert_eq!(data.new_status, Some(HostStatus::Running));
        assert!(data.logs.is_none());
    }

    #[test]
    fn test_provision_failed_keeps_logs_verbatim() {
        let id = HostId::new("h1");
        let event = Event::host_provision_failed(&id, "boot error: disk full\n");
        let data = event.host_data().unwrap();
        assert_eq!(data.logs.as_deref(), Some("boot error: disk full\n"));
        assert!(data.task_id.is_none());
    }

    #[test]
    fn test_mismatched_payload_is_invalid() {
        let mut event = Event::host_created(&HostId::new("h1"));
        assert!(event.is_valid());
        event.resource_type = ResourceType::Task;
        assert!(!event.is_valid());
    }

    #[test]
    fn test_serialized_field_names() {
        let event = Event::host_dns_name_set(&HostId::new("h1"), "h1.example.com");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "HOST_DNS_NAME_SET");
        assert_eq!(json["data"]["r_type"], "HOST");
        assert_eq!(json["data"]["payload"]["hostname"], "h1.example.com");
    }
}

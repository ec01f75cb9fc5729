//! Task types.

use crate::{CoreError, HostId, TaskId, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A Task is one unit of CI work executed by an agent on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Human-readable name, e.g. `compile`.
    pub display_name: String,

    /// Owning project identifier.
    pub project: String,

    /// Owning version id.
    pub version: String,

    #[serde(default)]
    pub build_id: String,

    /// Distro the task must run on.
    pub distro_id: String,

    /// Execution attempt counter, bumped on every restart.
    #[serde(default)]
    pub execution: u32,

    /// Shared secret handed to the agent running this task.
    pub secret: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// Whether the scheduler has activated the task.
    #[serde(default = "default_true")]
    pub activated: bool,

    /// Set by an external actor to ask the agent to stop.
    #[serde(default)]
    pub aborted: bool,

    /// Host the task was dispatched to.
    #[serde(default)]
    pub host_id: Option<HostId>,

    #[serde(default)]
    pub dispatch_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Results attached by the agent.
    #[serde(default)]
    pub test_results: Vec<TestResult>,

    /// Ids of test logs stored for this task.
    #[serde(default)]
    pub test_log_ids: Vec<String>,

    /// Details reported when the task ended.
    #[serde(default)]
    pub details: Option<TaskEndDetail>,
}

fn default_true() -> bool {
    true
}

impl Task {
    /// Create a new, activated, undispatched Task.
    pub fn new(
        display_name: impl Into<String>,
        project: impl Into<String>,
        version: impl Into<String>,
        distro_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            display_name: display_name.into(),
            project: project.into(),
            version: version.into(),
            build_id: String::new(),
            distro_id: distro_id.into(),
            execution: 0,
            secret: secret.into(),
            status: TaskStatus::Undispatched,
            activated: true,
            aborted: false,
            host_id: None,
            dispatch_time: None,
            start_time: None,
            finish_time: None,
            last_heartbeat: None,
            test_results: Vec::new(),
            test_log_ids: Vec::new(),
            details: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Whether the task can be handed to a host.
    pub fn is_dispatchable(&self) -> bool {
        self.activated && !self.aborted && self.status == TaskStatus::Undispatched
    }

    /// Record that the task was handed to `host_id`.
    pub fn dispatch(&mut self, host_id: HostId, now: DateTime<Utc>) {
        self.status = TaskStatus::Dispatched;
        self.host_id = Some(host_id);
        self.dispatch_time = Some(now);
        self.last_heartbeat = Some(now);
    }

    /// Mark the task as started by its agent.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != TaskStatus::Dispatched {
            return Err(CoreError::UnexpectedTaskStatus {
                task: self.id.to_string(),
                expected: TaskStatus::Dispatched,
                actual: self.status,
            });
        }
        self.status = TaskStatus::Started;
        self.start_time = Some(now);
        self.last_heartbeat = Some(now);
        Ok(())
    }

    /// Mark the task as finished with the agent's end details.
    ///
    /// An aborted task always ends as failed.
    pub fn finish(&mut self, detail: TaskEndDetail, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !matches!(self.status, TaskStatus::Dispatched | TaskStatus::Started) {
            return Err(CoreError::UnexpectedTaskStatus {
                task: self.id.to_string(),
                expected: TaskStatus::Started,
                actual: self.status,
            });
        }
        self.status = if self.aborted {
            TaskStatus::Failed
        } else {
            detail.status
        };
        self.finish_time = Some(now);
        self.details = Some(detail);
        Ok(())
    }

    /// Returns true if the agent has gone silent for longer than `timeout`.
    pub fn heartbeat_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if !matches!(self.status, TaskStatus::Dispatched | TaskStatus::Started) {
            return false;
        }
        match self.last_heartbeat {
            Some(last) => now - last > timeout,
            None => false,
        }
    }
}

/// A single test result attached by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub status: String,
    pub test_file: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub log_id: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

/// Batch wrapper the agent sends to `/results`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub results: Vec<TestResult>,
}

/// What the agent reports when a task ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEndDetail {
    pub status: TaskStatus,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, rename = "desc")]
    pub description: String,
    #[serde(default)]
    pub timed_out: bool,
}

impl TaskEndDetail {
    pub fn success() -> Self {
        Self {
            status: TaskStatus::Success,
            kind: String::new(),
            description: String::new(),
            timed_out: false,
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            kind: "test".to_string(),
            description: description.into(),
            timed_out: false,
        }
    }

    /// Only `success` and `failed` are valid end states.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.status.is_finished() {
            Ok(())
        } else {
            Err(CoreError::InvalidInput(format!(
                "'{}' is not a valid end status",
                self.status
            )))
        }
    }
}

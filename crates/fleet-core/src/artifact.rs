//! Execution artifacts an agent attaches to its task.

use crate::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output of one test file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestLog {
    /// Assigned by the control plane on insert.
    #[serde(default, rename = "_id")]
    pub id: String,
    pub name: String,
    /// Overwritten with the authenticated task on insert.
    #[serde(default)]
    pub task: Option<TaskId>,
    #[serde(default)]
    pub task_execution: u32,
    #[serde(default)]
    pub lines: Vec<String>,
}

/// A batch of agent log lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub execution: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub messages: Vec<LogMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(rename = "t", default)]
    pub kind: String,
    #[serde(rename = "s", default)]
    pub severity: String,
    #[serde(rename = "m")]
    pub message: String,
    #[serde(rename = "ts", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A file the task published (URL plus visibility).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub visibility: String,
}

/// All files published by a task. Upserted per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub task_id: TaskId,
    pub task_display_name: String,
    pub build_id: String,
    pub files: Vec<ArtifactFile>,
}

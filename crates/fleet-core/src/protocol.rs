//! Messages exchanged between agents and the control plane.

use serde::{Deserialize, Serialize};

/// Header carrying the task secret.
pub const TASK_SECRET_HEADER: &str = "Task-Secret";
/// Header identifying the calling host when the path does not.
pub const HOST_HEADER: &str = "Host-Id";
/// Header carrying the host secret.
pub const HOST_SECRET_HEADER: &str = "Host-Secret";

/// Path value the provisioning callback uses to report a failed boot.
pub const HOST_READY_FAILED: &str = "failed";

/// Reply to `/agent/next_task`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextTaskResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_secret: Option<String>,
    /// The agent should shut down instead of asking again.
    #[serde(default)]
    pub should_exit: bool,
}

/// Body of `/task/{id}/start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStartRequest {
    #[serde(default)]
    pub pid: String,
}

/// Reply to `/task/{id}/heartbeat`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub abort: bool,
}

/// Reply to `/task/{id}/end`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndTaskResponse {
    #[serde(default)]
    pub should_exit: bool,
    #[serde(default)]
    pub message: String,
}

/// Reply to `/task/{id}/test_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestLogReply {
    #[serde(rename = "_id")]
    pub id: String,
}

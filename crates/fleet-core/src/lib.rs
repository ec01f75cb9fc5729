//! Fleet Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Storage
//! - Cloud provider SDKs
//!
//! All types here represent the core business domain of the fleet: tasks,
//! hosts, distros, and the audit events recorded about them.

pub mod artifact;
pub mod distro;
pub mod error;
pub mod event;
pub mod host;
pub mod ids;
pub mod project;
pub mod protocol;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use artifact::{ArtifactEntry, ArtifactFile, LogMessage, TaskLog, TestLog};
pub use distro::Distro;
pub use error::CoreError;
pub use event::{Event, EventData, EventType, HostEventData, ResourceType};
pub use host::{Host, HostOptions, ProvisionOptions};
pub use ids::{HostId, TaskId};
pub use project::{ProjectRef, ProjectVars, Version};
pub use status::{CloudStatus, HostStatus, TaskStatus};
pub use task::{Task, TaskEndDetail, TestResult, TestResults};

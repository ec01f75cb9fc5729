//! HTTP request handlers.

mod agent;
mod artifacts;
mod context;
mod health;
mod host;
mod task;

pub use agent::next_task;
pub use artifacts::{
    append_log, attach_files, attach_results, attach_test_log, process_info, system_info,
};
pub use context::{fetch_distro, fetch_project_ref, fetch_task, fetch_vars, fetch_version};
pub use health::{health_check, metrics_handler};
pub use host::host_ready;
pub use task::{end_task, heartbeat, start_task};

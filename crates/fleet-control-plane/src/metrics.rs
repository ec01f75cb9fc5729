//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use fleet_core::{HostStatus, TaskStatus};

use crate::state::AppState;

const HOST_STATUSES: [HostStatus; 7] = [
    HostStatus::Uninitialized,
    HostStatus::Initializing,
    HostStatus::ProvisionFailed,
    HostStatus::Running,
    HostStatus::Quarantined,
    HostStatus::Decommissioned,
    HostStatus::Terminated,
];

const TASK_STATUSES: [TaskStatus; 5] = [
    TaskStatus::Undispatched,
    TaskStatus::Dispatched,
    TaskStatus::Started,
    TaskStatus::Success,
    TaskStatus::Failed,
];

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_host_metrics(state, &mut output).await;
    collect_task_metrics(state, &mut output).await;
    collect_event_metrics(state, &mut output).await;

    output
}

/// Collect host metrics by status.
async fn collect_host_metrics(state: &Arc<AppState>, output: &mut String) {
    let hosts = state.hosts.read().await;

    writeln!(output, "# HELP fleet_hosts_total Number of hosts by status").ok();
    writeln!(output, "# TYPE fleet_hosts_total gauge").ok();
    for status in HOST_STATUSES {
        let count = hosts.values().filter(|h| h.status == status).count();
        writeln!(output, "fleet_hosts_total{{status=\"{status}\"}} {count}").ok();
    }
}

/// Collect task metrics by status.
async fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) {
    let tasks = state.tasks.read().await;

    writeln!(output).ok();
    writeln!(output, "# HELP fleet_tasks_total Number of tasks by status").ok();
    writeln!(output, "# TYPE fleet_tasks_total gauge").ok();
    for status in TASK_STATUSES {
        let count = tasks.values().filter(|t| t.status == status).count();
        writeln!(output, "fleet_tasks_total{{status=\"{status}\"}} {count}").ok();
    }
}

async fn collect_event_metrics(state: &Arc<AppState>, output: &mut String) {
    let events = state.events.len().await;

    writeln!(output).ok();
    writeln!(output, "# HELP fleet_events_total Events recorded since start").ok();
    writeln!(output, "# TYPE fleet_events_total counter").ok();
    writeln!(output, "fleet_events_total {events}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::fixture;

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let fx = fixture();
        let output = collect_metrics(&fx.state).await;

        // Should contain host metrics
        assert!(output.contains("fleet_hosts_total"));
        assert!(output.contains("status=\"provision_failed\""));

        // Should contain task metrics
        assert!(output.contains("fleet_tasks_total"));
        assert!(output.contains("status=\"undispatched\""));

        // All counts should be 0
        assert!(output.contains("fleet_hosts_total{status=\"running\"} 0"));
        assert!(output.contains("fleet_tasks_total{status=\"success\"} 0"));
        assert!(output.contains("fleet_events_total 0"));
    }
}

//! Host monitor: reconciles stored hosts with what their providers report.
//!
//! Each pass looks at every live host once. It flags hosts whose running
//! task went quiet, terminates expired and idle decommissioned hosts, and
//! applies the provider's view of the instance to the host's status.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use fleet_core::{CloudStatus, Event, Host, HostId, HostStatus};

use crate::cloud::CloudHost;
use crate::hostinit::{HostInit, StartReport};
use crate::state::AppState;

/// Monitor operation recorded when a running task stops heartbeating.
pub const HEARTBEAT_TIMEOUT_OP: &str = "heartbeat_timeout";

/// What one monitor pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub checked: usize,
    pub updated: usize,
    pub terminated: usize,
    pub flagged: usize,
    pub errors: usize,
}

pub struct HostMonitor {
    state: Arc<AppState>,
}

impl HostMonitor {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run one pass over every live host.
    pub async fn run_once(&self) -> MonitorReport {
        let hosts: Vec<Host> = self
            .state
            .hosts
            .read()
            .await
            .values()
            .filter(|h| !h.status.is_terminal())
            // Intents that were never spawned belong to host init.
            .filter(|h| !(h.status == HostStatus::Uninitialized && h.instance_id.is_none()))
            .cloned()
            .collect();

        let now = Utc::now();
        let mut report = MonitorReport::default();
        for host in hosts {
            report.checked += 1;
            self.check_host(host, now, &mut report).await;
        }
        report
    }

    async fn check_host(&self, host: Host, now: DateTime<Utc>, report: &mut MonitorReport) {
        if self.flag_stale_task(&host, now).await {
            report.flagged += 1;
        }

        let config = &self.state.config;
        let cloud_host = match self.state.cloud.cloud_host(
            host.clone(),
            &config.ssh_key_path,
            config.provider_timeout(),
        ) {
            Ok(cloud_host) => cloud_host,
            Err(e) => {
                error!(host_id = %host.id, provider = %host.provider, error = %e, "Failed to get cloud manager");
                report.errors += 1;
                return;
            }
        };

        let expired = host.is_expired(now);
        if expired || (host.status == HostStatus::Decommissioned && host.is_idle()) {
            let reason = if expired { "expired" } else { "decommissioned" };
            if self.terminate(&cloud_host, reason).await {
                report.terminated += 1;
            } else {
                report.errors += 1;
            }
            return;
        }

        match cloud_host.get_instance_status().await {
            Ok(status) => {
                if self.reconcile(&host, status).await {
                    report.updated += 1;
                }
            }
            Err(e) => {
                warn!(host_id = %host.id, error = %e, "Error getting instance status");
                report.errors += 1;
            }
        }
    }

    /// Record a monitor flag if the host's task has not heartbeated in time.
    async fn flag_stale_task(&self, host: &Host, now: DateTime<Utc>) -> bool {
        let Some(task_id) = &host.running_task else {
            return false;
        };
        let Some(task) = self.state.get_task(task_id).await else {
            return false;
        };

        let Ok(timeout) = chrono::Duration::from_std(self.state.config.heartbeat_timeout()) else {
            return false;
        };
        if !task.heartbeat_expired(now, timeout) {
            return false;
        }

        warn!(host_id = %host.id, task_id = %task_id, "Task heartbeat timed out");
        self.state
            .events
            .record(Event::host_monitor_flag(&host.id, HEARTBEAT_TIMEOUT_OP))
            .await;
        true
    }

    /// Apply the provider's instance status. Returns true if the host changed.
    async fn reconcile(&self, host: &Host, cloud_status: CloudStatus) -> bool {
        let target = match cloud_status {
            CloudStatus::Stopped | CloudStatus::Terminated => {
                info!(host_id = %host.id, cloud_status = %cloud_status, "Provider reports host gone");
                return self.mark_terminated(&host.id).await;
            }
            CloudStatus::Initializing if host.status == HostStatus::Uninitialized => {
                HostStatus::Initializing
            }
            CloudStatus::Failed if host.status.is_pre_running() => HostStatus::ProvisionFailed,
            _ => {
                debug!(host_id = %host.id, cloud_status = %cloud_status, "No status change");
                return false;
            }
        };

        match self.state.update_host(&host.id, |h| h.set_status(target)).await {
            Some(Ok(previous)) => {
                self.state
                    .events
                    .log_host_status_changed(&host.id, previous, target)
                    .await;
                previous != target
            }
            Some(Err(e)) => {
                warn!(host_id = %host.id, error = %e, "Reconciled status rejected");
                false
            }
            None => false,
        }
    }

    /// Mark a host terminated and release its task. Returns false if it was gone already.
    async fn mark_terminated(&self, host_id: &HostId) -> bool {
        let now = Utc::now();
        let Some((previous, task)) = self
            .state
            .update_host(host_id, |h| {
                let previous = h.terminate(now);
                h.task_pid = None;
                (previous, h.running_task.take())
            })
            .await
        else {
            return false;
        };

        if let Some(task_id) = task {
            self.state
                .events
                .record(Event::host_running_task_cleared(host_id, &task_id))
                .await;
        }
        self.state
            .events
            .log_host_status_changed(host_id, previous, HostStatus::Terminated)
            .await;
        previous != HostStatus::Terminated
    }

    /// Terminate through the provider and record a teardown event either way.
    async fn terminate(&self, cloud_host: &CloudHost, reason: &str) -> bool {
        let host_id = &cloud_host.host.id;
        let started = Instant::now();
        let result = cloud_host.terminate_instance().await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                info!(host_id = %host_id, reason = %reason, "Host terminated");
                self.state
                    .events
                    .record(Event::host_teardown(host_id, reason, true, elapsed))
                    .await;
                self.mark_terminated(host_id).await;
                true
            }
            Err(e) => {
                error!(host_id = %host_id, reason = %reason, error = %e, "Error terminating host");
                self.state
                    .events
                    .record(Event::host_teardown(host_id, &e.to_string(), false, elapsed))
                    .await;
                false
            }
        }
    }
}

/// Start intent hosts and run the monitor every `monitor_interval`, forever.
pub async fn run_background(state: Arc<AppState>) {
    let init = HostInit::new(state.clone());
    let monitor = HostMonitor::new(state.clone());
    let mut ticker = tokio::time::interval(state.config.monitor_interval());

    info!(interval = ?state.config.monitor_interval(), "Host monitor started");
    loop {
        ticker.tick().await;

        let started = init.start_intent_hosts().await;
        if started != StartReport::default() {
            info!(
                started = started.started,
                failed = started.failed,
                deferred = started.deferred,
                "Intent hosts processed"
            );
        }

        let report = monitor.run_once().await;
        debug!(
            checked = report.checked,
            updated = report.updated,
            terminated = report.terminated,
            flagged = report.flagged,
            errors = report.errors,
            "Host monitor pass complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::*;
    use fleet_core::{EventType, TaskStatus};

    fn instance_of(host: &Host) -> String {
        host.instance_id.clone().unwrap()
    }

    async fn event_types(state: &AppState, id: &str) -> Vec<EventType> {
        state
            .events
            .for_resource(id)
            .await
            .iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[tokio::test]
    async fn test_reconciles_provider_status() {
        let fx = fixture();
        let starting = add_host(&fx, "h1", HostStatus::Uninitialized).await;
        let failing = add_host(&fx, "h2", HostStatus::Initializing).await;
        let pending = add_host(&fx, "h3", HostStatus::Initializing).await;
        fx.mock.set_status(&instance_of(&starting), CloudStatus::Initializing);
        fx.mock.set_status(&instance_of(&failing), CloudStatus::Failed);
        fx.mock.set_status(&instance_of(&pending), CloudStatus::Pending);

        let report = HostMonitor::new(fx.state.clone()).run_once().await;
        assert_eq!(report.checked, 3);
        assert_eq!(report.updated, 2);

        let status = |id: &'static str| {
            let state = fx.state.clone();
            async move { state.get_host(&HostId::new(id)).await.unwrap().status }
        };
        assert_eq!(status("h1").await, HostStatus::Initializing);
        assert_eq!(status("h2").await, HostStatus::ProvisionFailed);
        assert_eq!(status("h3").await, HostStatus::Initializing);
        assert!(fx.state.events.for_resource("h3").await.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_instance_terminates_host_and_frees_task() {
        let fx = fixture();
        let host = add_host(&fx, "h1", HostStatus::Running).await;
        let task = add_task(&fx, "t1").await;
        fx.state
            .update_host(&host.id, |h| h.running_task = Some(task.id.clone()))
            .await;
        fx.mock.set_status(&instance_of(&host), CloudStatus::Stopped);

        let report = HostMonitor::new(fx.state.clone()).run_once().await;
        assert_eq!(report.updated, 1);

        let stored = fx.state.get_host(&host.id).await.unwrap();
        assert_eq!(stored.status, HostStatus::Terminated);
        assert!(stored.termination_time.is_some());
        assert!(stored.is_idle());
        assert_eq!(
            event_types(&fx.state, "h1").await,
            vec![EventType::HostRunningTaskCleared, EventType::HostStatusChanged]
        );
    }

    #[tokio::test]
    async fn test_expired_and_decommissioned_hosts_are_torn_down() {
        let fx = fixture();
        let expired = add_host(&fx, "h1", HostStatus::Running).await;
        fx.state
            .update_host(&expired.id, |h| {
                h.expiration_time = Some(Utc::now() - chrono::Duration::minutes(1))
            })
            .await;
        let retired = add_host(&fx, "h2", HostStatus::Decommissioned).await;
        let busy = add_host(&fx, "h3", HostStatus::Decommissioned).await;
        let task = add_task(&fx, "t1").await;
        fx.state
            .update_host(&busy.id, |h| h.running_task = Some(task.id.clone()))
            .await;

        let report = HostMonitor::new(fx.state.clone()).run_once().await;
        assert_eq!(report.terminated, 2);

        for host in [&expired, &retired] {
            let stored = fx.state.get_host(&host.id).await.unwrap();
            assert_eq!(stored.status, HostStatus::Terminated);
            assert_eq!(
                fx.mock.instance(&instance_of(host)).unwrap().status,
                CloudStatus::Terminated
            );
            let events = fx.state.events.for_resource(host.id.as_str()).await;
            let teardown = events
                .iter()
                .find(|e| e.event_type == EventType::HostTeardown)
                .unwrap();
            assert_eq!(teardown.host_data().unwrap().successful, Some(true));
        }
        assert_eq!(
            fx.state.get_host(&busy.id).await.unwrap().status,
            HostStatus::Decommissioned
        );
    }

    #[tokio::test]
    async fn test_failed_teardown_is_recorded() {
        let fx = fixture();
        let host = add_host(&fx, "h1", HostStatus::Decommissioned).await;
        fx.mock.fail_operation("terminate_instance");

        let report = HostMonitor::new(fx.state.clone()).run_once().await;
        assert_eq!(report.errors, 1);
        assert_eq!(
            fx.state.get_host(&host.id).await.unwrap().status,
            HostStatus::Decommissioned
        );
        let events = fx.state.events.for_resource("h1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].host_data().unwrap().successful, Some(false));
    }

    #[tokio::test]
    async fn test_silent_task_is_flagged() {
        let fx = fixture();
        let host = add_host(&fx, "h1", HostStatus::Running).await;
        let task = add_task(&fx, "t1").await;
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        fx.state
            .update_task(&task.id, |t| t.dispatch(host.id.clone(), long_ago))
            .await;
        fx.state
            .update_host(&host.id, |h| h.running_task = Some(task.id.clone()))
            .await;

        let report = HostMonitor::new(fx.state.clone()).run_once().await;
        assert_eq!(report.flagged, 1);
        assert_eq!(event_types(&fx.state, "h1").await, vec![EventType::HostMonitorFlag]);
        assert_eq!(
            fx.state.get_task(&task.id).await.unwrap().status,
            TaskStatus::Dispatched
        );
    }
}

//! Per-host facade over a resolved cloud manager.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use fleet_core::{CloudStatus, Host};

use super::{with_timeout, CloudError, CloudManager};

/// A host bound to the manager of its provider and an SSH key.
///
/// Every call is delegated to the manager and bounded by `timeout`.
pub struct CloudHost {
    pub host: Host,
    pub key_path: String,
    manager: Arc<dyn CloudManager>,
    timeout: Duration,
}

impl CloudHost {
    pub fn new(host: Host, key_path: impl Into<String>, manager: Arc<dyn CloudManager>, timeout: Duration) -> Self {
        Self {
            host,
            key_path: key_path.into(),
            manager,
            timeout,
        }
    }

    pub fn provider(&self) -> &str {
        self.manager.name()
    }

    pub async fn is_ssh_reachable(&self) -> Result<bool, CloudError> {
        with_timeout(
            "is_ssh_reachable",
            self.timeout,
            self.manager.is_ssh_reachable(&self.host, &self.key_path),
        )
        .await
    }

    pub async fn is_up(&self) -> Result<bool, CloudError> {
        with_timeout("is_up", self.timeout, self.manager.is_up(&self.host)).await
    }

    pub async fn on_up(&self) -> Result<(), CloudError> {
        with_timeout("on_up", self.timeout, self.manager.on_up(&self.host)).await
    }

    pub async fn terminate_instance(&self) -> Result<(), CloudError> {
        with_timeout(
            "terminate_instance",
            self.timeout,
            self.manager.terminate_instance(&self.host),
        )
        .await
    }

    pub async fn get_instance_status(&self) -> Result<CloudStatus, CloudError> {
        with_timeout(
            "get_instance_status",
            self.timeout,
            self.manager.get_instance_status(&self.host),
        )
        .await
    }

    pub async fn get_dns_name(&self) -> Result<String, CloudError> {
        with_timeout("get_dns_name", self.timeout, self.manager.get_dns_name(&self.host)).await
    }

    pub fn get_ssh_options(&self) -> Result<Vec<String>, CloudError> {
        self.manager.get_ssh_options(&self.host, &self.key_path)
    }

    pub fn time_til_next_payment(&self) -> Duration {
        self.manager.time_til_next_payment(&self.host)
    }

    /// Cost of running this host between `start` and `end`, if the provider can tell.
    pub fn cost_for_duration(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Result<f64, CloudError>> {
        self.manager
            .cost_calculator()
            .map(|calc| calc.cost_for_duration(&self.host, start, end))
    }
}

//! In-memory provider for development and tests.
//!
//! Instances live in a map owned by the manager. Their status, DNS name and
//! reachability can be scripted, and individual operations can be made to
//! fail, so callers can exercise every reconciliation branch without a real
//! cloud.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use fleet_core::{CloudStatus, Distro, Host, HostOptions};

use super::{new_intent, CloudCostCalculator, CloudError, CloudManager, ProviderSettings};
use crate::config::Config;

pub const MOCK_PROVIDER: &str = "mock";

#[derive(Debug, Clone)]
pub struct MockSettings {
    /// Price of one instance-hour.
    pub hourly_cost: f64,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self { hourly_cost: 0.0 }
    }
}

impl ProviderSettings for MockSettings {
    fn validate(&self) -> Result<(), CloudError> {
        if !self.hourly_cost.is_finite() || self.hourly_cost < 0.0 {
            return Err(CloudError::InvalidSettings {
                provider: MOCK_PROVIDER.to_string(),
                reason: format!("hourly_cost must be a non-negative number, got {}", self.hourly_cost),
            });
        }
        Ok(())
    }
}

/// State of one fake instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MockInstance {
    pub status: CloudStatus,
    pub dns_name: String,
    pub ssh_reachable: bool,
}

#[derive(Default)]
struct Inner {
    instances: HashMap<String, MockInstance>,
    failing: HashSet<&'static str>,
    fail_next_spawn: bool,
    spawn_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockManager {
    settings: MockSettings,
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl MockManager {
    pub fn new(settings: MockSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Register an instance directly, e.g. for a host loaded from a seed file.
    pub fn insert_instance(&self, instance_id: impl Into<String>, instance: MockInstance) {
        self.with_inner(|inner| {
            inner.instances.insert(instance_id.into(), instance);
        });
    }

    pub fn instance(&self, instance_id: &str) -> Option<MockInstance> {
        self.with_inner(|inner| inner.instances.get(instance_id).cloned())
    }

    /// Change what `get_instance_status` reports. Returns false for unknown ids.
    pub fn set_status(&self, instance_id: &str, status: CloudStatus) -> bool {
        self.with_inner(|inner| match inner.instances.get_mut(instance_id) {
            Some(instance) => {
                instance.status = status;
                true
            }
            None => false,
        })
    }

    pub fn set_dns_name(&self, instance_id: &str, dns_name: impl Into<String>) -> bool {
        let dns_name = dns_name.into();
        self.with_inner(|inner| match inner.instances.get_mut(instance_id) {
            Some(instance) => {
                instance.dns_name = dns_name;
                true
            }
            None => false,
        })
    }

    /// Make the next `spawn_instance` call fail.
    pub fn fail_next_spawn(&self) {
        self.with_inner(|inner| inner.fail_next_spawn = true);
    }

    /// Make `spawn_instance` sleep before answering, or stop doing so with `None`.
    pub fn set_spawn_delay(&self, delay: Option<Duration>) {
        self.with_inner(|inner| inner.spawn_delay = delay);
    }

    /// Make every call to `operation` fail until cleared.
    pub fn fail_operation(&self, operation: &'static str) {
        self.with_inner(|inner| {
            inner.failing.insert(operation);
        });
    }

    pub fn clear_failures(&self) {
        self.with_inner(|inner| {
            inner.failing.clear();
            inner.fail_next_spawn = false;
        });
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn check(&self, operation: &'static str) -> Result<(), CloudError> {
        if self.with_inner(|inner| inner.failing.contains(operation)) {
            return Err(CloudError::Provider {
                provider: MOCK_PROVIDER.to_string(),
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    /// Instances are keyed by instance id; hosts seeded without one fall back to their tag.
    fn key(host: &Host) -> String {
        host.instance_id
            .clone()
            .unwrap_or_else(|| host.id.to_string())
    }

    fn lookup(&self, host: &Host) -> Result<MockInstance, CloudError> {
        let key = Self::key(host);
        self.instance(&key)
            .ok_or_else(|| CloudError::InstanceNotFound(host.id.to_string()))
    }
}

#[async_trait]
impl CloudManager for MockManager {
    fn name(&self) -> &str {
        MOCK_PROVIDER
    }

    fn settings(&self) -> &dyn ProviderSettings {
        &self.settings
    }

    fn configure(&mut self, config: &Config) -> Result<(), CloudError> {
        self.settings = config.mock_provider.clone();
        Ok(())
    }

    async fn can_spawn(&self) -> Result<bool, CloudError> {
        Ok(true)
    }

    async fn spawn_instance(&self, distro: &Distro, options: &HostOptions) -> Result<Host, CloudError> {
        if let Some(delay) = self.with_inner(|inner| inner.spawn_delay) {
            tokio::time::sleep(delay).await;
        }
        let fail = self.with_inner(|inner| std::mem::take(&mut inner.fail_next_spawn));
        if fail {
            return Err(CloudError::Provider {
                provider: MOCK_PROVIDER.to_string(),
                operation: "spawn_instance",
                message: "injected failure".to_string(),
            });
        }
        self.check("spawn_instance")?;

        let instance_id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let dns_name = format!("{}.mock.invalid", instance_id);
        self.insert_instance(
            instance_id.clone(),
            MockInstance {
                status: CloudStatus::Initializing,
                dns_name: dns_name.clone(),
                ssh_reachable: true,
            },
        );

        let mut host = new_intent(distro, &instance_id, MOCK_PROVIDER, options);
        host.instance_id = Some(instance_id.clone());
        host.dns_name = dns_name;

        info!(instance_id = %instance_id, distro = %distro.id, "Spawned mock instance");
        Ok(host)
    }

    async fn get_instance_status(&self, host: &Host) -> Result<CloudStatus, CloudError> {
        self.check("get_instance_status")?;
        Ok(self.lookup(host)?.status)
    }

    async fn terminate_instance(&self, host: &Host) -> Result<(), CloudError> {
        self.check("terminate_instance")?;
        let key = Self::key(host);
        if !self.set_status(&key, CloudStatus::Terminated) {
            return Err(CloudError::InstanceNotFound(host.id.to_string()));
        }
        info!(host_id = %host.id, instance_id = %key, "Terminated mock instance");
        Ok(())
    }

    async fn is_up(&self, host: &Host) -> Result<bool, CloudError> {
        self.check("is_up")?;
        Ok(self.lookup(host)?.status == CloudStatus::Running)
    }

    async fn on_up(&self, _host: &Host) -> Result<(), CloudError> {
        self.check("on_up")
    }

    async fn is_ssh_reachable(&self, host: &Host, _key_path: &str) -> Result<bool, CloudError> {
        self.check("is_ssh_reachable")?;
        Ok(self.lookup(host)?.ssh_reachable)
    }

    async fn get_dns_name(&self, host: &Host) -> Result<String, CloudError> {
        self.check("get_dns_name")?;
        Ok(self.lookup(host)?.dns_name)
    }

    /// Mock instances bill by the started hour.
    fn time_til_next_payment(&self, host: &Host) -> Duration {
        const HOUR: u64 = 60 * 60;
        let up = (Utc::now() - host.creation_time).num_seconds().max(0) as u64;
        Duration::from_secs(HOUR - up % HOUR)
    }

    fn cost_calculator(&self) -> Option<&dyn CloudCostCalculator> {
        Some(self)
    }
}

impl CloudCostCalculator for MockManager {
    fn cost_for_duration(&self, _host: &Host, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64, CloudError> {
        if end < start {
            return Err(CloudError::Provider {
                provider: MOCK_PROVIDER.to_string(),
                operation: "cost_for_duration",
                message: "end is before start".to_string(),
            });
        }
        let hours = (end - start).num_seconds() as f64 / 3600.0;
        Ok(hours * self.settings.hourly_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distro() -> Distro {
        Distro::new("ubuntu1604", MOCK_PROVIDER).with_user("admin")
    }

    #[tokio::test]
    async fn test_spawn_and_script_status() {
        let m = MockManager::default();
        let host = m.spawn_instance(&distro(), &HostOptions::default()).await.unwrap();

        let instance_id = host.instance_id.clone().unwrap();
        assert!(instance_id.starts_with("mock-"));
        assert_eq!(host.provider, MOCK_PROVIDER);
        assert_eq!(m.get_instance_status(&host).await.unwrap(), CloudStatus::Initializing);
        assert!(!m.is_up(&host).await.unwrap());

        assert!(m.set_status(&instance_id, CloudStatus::Running));
        assert!(m.set_dns_name(&instance_id, "h.example.com"));
        assert!(m.is_up(&host).await.unwrap());
        assert_eq!(m.get_dns_name(&host).await.unwrap(), "h.example.com");

        m.terminate_instance(&host).await.unwrap();
        assert_eq!(m.get_instance_status(&host).await.unwrap(), CloudStatus::Terminated);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let m = MockManager::default();
        m.fail_next_spawn();
        assert!(m.spawn_instance(&distro(), &HostOptions::default()).await.is_err());
        let host = m.spawn_instance(&distro(), &HostOptions::default()).await.unwrap();

        m.fail_operation("get_dns_name");
        assert!(matches!(
            m.get_dns_name(&host).await,
            Err(CloudError::Provider { operation: "get_dns_name", .. })
        ));
        m.clear_failures();
        assert!(m.get_dns_name(&host).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let m = MockManager::default();
        let host = new_intent(&distro(), "ghost", MOCK_PROVIDER, &HostOptions::default());
        assert!(matches!(
            m.get_instance_status(&host).await,
            Err(CloudError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_cost_for_duration() {
        let m = MockManager::new(MockSettings { hourly_cost: 0.5 });
        let host = new_intent(&distro(), "h", MOCK_PROVIDER, &HostOptions::default());
        let start = Utc::now();
        let end = start + chrono::Duration::hours(3);

        let calc = m.cost_calculator().unwrap();
        assert!((calc.cost_for_duration(&host, start, end).unwrap() - 1.5).abs() < 1e-9);
        assert!(calc.cost_for_duration(&host, end, start).is_err());
    }

    #[test]
    fn test_next_payment_within_an_hour() {
        let m = MockManager::default();
        let host = new_intent(&distro(), "h", MOCK_PROVIDER, &HostOptions::default());
        let left = m.time_til_next_payment(&host);
        assert!(left > Duration::ZERO && left <= Duration::from_secs(3600));
    }
}

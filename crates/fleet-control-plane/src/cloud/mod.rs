//! Provider-agnostic host lifecycle.
//!
//! Every provider backend implements [`CloudManager`]. The rest of the
//! control plane only ever sees `Arc<dyn CloudManager>` values looked up by
//! the provider name stored on a host, and never branches on which provider
//! it is talking to.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use fleet_core::{CloudStatus, Distro, Host, HostId, HostOptions, HostStatus};

use crate::config::Config;
use crate::crypto::generate_secret;

mod host;
mod mock;
mod static_hosts;

pub use host::CloudHost;
pub use mock::{MockInstance, MockManager, MockSettings, MOCK_PROVIDER};
pub use static_hosts::{StaticManager, StaticSettings, STATIC_PROVIDER};

/// Cloud provider errors. Provider-specific detail is kept in the message.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("No cloud manager registered for provider '{0}'")]
    UnknownProvider(String),

    #[error("Provider '{0}' does not support spawning hosts")]
    SpawnUnsupported(String),

    #[error("Invalid settings for provider '{provider}': {reason}")]
    InvalidSettings { provider: String, reason: String },

    #[error("No instance found for host '{0}'")]
    InstanceNotFound(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{provider} {operation} failed: {message}")]
    Provider {
        provider: String,
        operation: &'static str,
        message: String,
    },
}

/// Provider-specific configuration, validated independently of business logic.
pub trait ProviderSettings: fmt::Debug + Send + Sync {
    fn validate(&self) -> Result<(), CloudError>;
}

/// Capability set every provider backend implements.
#[async_trait]
pub trait CloudManager: Send + Sync {
    /// Provider name as stored on hosts.
    fn name(&self) -> &str;

    /// The manager's configuration settings.
    fn settings(&self) -> &dyn ProviderSettings;

    /// Load credentials or other settings from the control plane config.
    fn configure(&mut self, config: &Config) -> Result<(), CloudError>;

    /// Whether this provider can create new instances with `spawn_instance`.
    async fn can_spawn(&self) -> Result<bool, CloudError>;

    /// Request a new instance from the provider.
    ///
    /// The returned host carries the provider's instance id and whatever the
    /// provider already knows (DNS name, status).
    async fn spawn_instance(&self, distro: &Distro, options: &HostOptions) -> Result<Host, CloudError>;

    async fn get_instance_status(&self, host: &Host) -> Result<CloudStatus, CloudError>;

    /// Destroy the host in the underlying provider.
    async fn terminate_instance(&self, host: &Host) -> Result<(), CloudError>;

    /// True if the provider has not destroyed the host. That does not mean
    /// it is reachable over SSH.
    async fn is_up(&self, host: &Host) -> Result<bool, CloudError>;

    /// Called once the host reports itself ready, to set provider metadata.
    async fn on_up(&self, _host: &Host) -> Result<(), CloudError> {
        Ok(())
    }

    /// True if the host accepts and runs an ssh command.
    async fn is_ssh_reachable(&self, host: &Host, key_path: &str) -> Result<bool, CloudError>;

    async fn get_dns_name(&self, host: &Host) -> Result<String, CloudError>;

    /// Command line arguments for ssh to reach the machine.
    fn get_ssh_options(&self, host: &Host, key_path: &str) -> Result<Vec<String>, CloudError> {
        Ok(default_ssh_options(host, key_path))
    }

    /// Time left until the next billing increment for this host.
    fn time_til_next_payment(&self, host: &Host) -> Duration;

    /// Cost estimation, for providers that support it.
    fn cost_calculator(&self) -> Option<&dyn CloudCostCalculator> {
        None
    }
}

/// Optional capability: estimate what a span of time on a host costs.
pub trait CloudCostCalculator: Send + Sync {
    fn cost_for_duration(
        &self,
        host: &Host,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, CloudError>;
}

/// `-i <key>` followed by one `-o <opt>` pair per distro SSH option.
pub fn default_ssh_options(host: &Host, key_path: &str) -> Vec<String> {
    let mut opts = vec!["-i".to_string(), key_path.to_string()];
    for opt in &host.distro.ssh_options {
        opts.push("-o".to_string());
        opts.push(opt.clone());
    }
    opts
}

/// Build an intent host: a record of a host we mean to create, written
/// before any remote resource exists.
///
/// If the spawn never happens or its result is lost, the intent record is
/// what lets reconciliation notice.
pub fn new_intent(distro: &Distro, instance_name: &str, provider: &str, options: &HostOptions) -> Host {
    let creation_time = Utc::now();

    let expiration_time = options.expiration_duration.and_then(|d| {
        chrono::Duration::from_std(d)
            .ok()
            .and_then(|d| creation_time.checked_add_signed(d))
    });

    Host {
        id: HostId::new(instance_name),
        instance_id: None,
        dns_name: String::new(),
        user: distro.user.clone(),
        distro: distro.clone(),
        provider: provider.to_string(),
        secret: generate_secret(),
        status: HostStatus::Uninitialized,
        creation_time,
        termination_time: None,
        expiration_time,
        last_communication_time: None,
        running_task: None,
        task_pid: None,
        started_by: options.user_name.clone(),
        user_host: options.user_host,
        provisioned: false,
        provision_options: options.provision_options.clone(),
        user_data: (!options.user_data.is_empty()).then(|| options.user_data.clone()),
    }
}

/// Run a provider call with an upper bound on its duration.
pub async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T, CloudError>
where
    F: Future<Output = Result<T, CloudError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CloudError::Timeout { operation, timeout }),
    }
}

/// Cloud managers indexed by provider name.
#[derive(Default)]
pub struct CloudRegistry {
    managers: HashMap<String, Arc<dyn CloudManager>>,
}

impl CloudRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure and validate every built-in provider.
    ///
    /// The mock manager is passed in so it can be pre-loaded with instances.
    pub fn from_config(config: &Config, mut mock_manager: MockManager) -> Result<Self, CloudError> {
        let mut static_manager = StaticManager::default();
        static_manager.configure(config)?;
        mock_manager.configure(config)?;

        let mut registry = Self::new();
        registry.register(Arc::new(static_manager))?;
        registry.register(Arc::new(mock_manager))?;
        Ok(registry)
    }

    /// Add a manager after validating its settings.
    pub fn register(&mut self, manager: Arc<dyn CloudManager>) -> Result<(), CloudError> {
        manager.settings().validate()?;
        self.managers.insert(manager.name().to_string(), manager);
        Ok(())
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn CloudManager>, CloudError> {
        self.managers
            .get(provider)
            .cloned()
            .ok_or_else(|| CloudError::UnknownProvider(provider.to_string()))
    }

    /// Bind a host to the manager named by its provider field.
    pub fn cloud_host(&self, host: Host, key_path: &str, timeout: Duration) -> Result<CloudHost, CloudError> {
        let manager = self.get(&host.provider)?;
        Ok(CloudHost::new(host, key_path, manager, timeout))
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distro() -> Distro {
        Distro::new("ubuntu1604", MOCK_PROVIDER)
            .with_user("admin")
            .with_ssh_option("StrictHostKeyChecking=no")
    }

    #[test]
    fn test_new_intent_with_expiration() {
        let options = HostOptions {
            expiration_duration: Some(Duration::from_secs(5 * 60 * 60)),
            user_name: "alice".to_string(),
            user_host: true,
            ..Default::default()
        };
        let host = new_intent(&distro(), "ubuntu1604-abc", MOCK_PROVIDER, &options);

        assert_eq!(host.status, HostStatus::Uninitialized);
        assert_eq!(
            host.expiration_time,
            Some(host.creation_time + chrono::Duration::hours(5))
        );
        assert_eq!(host.id.as_str(), "ubuntu1604-abc");
        assert_eq!(host.user, "admin");
        assert_eq!(host.started_by, "alice");
        assert!(host.user_host);
        assert!(host.termination_time.is_none());
        assert!(!host.secret.is_empty());
    }

    #[test]
    fn test_new_intent_without_expiration_never_expires() {
        let host = new_intent(&distro(), "h", MOCK_PROVIDER, &HostOptions::default());
        assert!(host.expiration_time.is_none());
        assert!(host.user_data.is_none());
        assert!(host.provision_options.is_none());
    }

    #[test]
    fn test_default_ssh_options() {
        let host = new_intent(&distro(), "h", MOCK_PROVIDER, &HostOptions::default());
        assert_eq!(
            default_ssh_options(&host, "/keys/fleet.pem"),
            vec!["-i", "/keys/fleet.pem", "-o", "StrictHostKeyChecking=no"]
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CloudRegistry::from_config(&Config::default(), MockManager::default()).unwrap();
        assert_eq!(registry.providers(), vec![MOCK_PROVIDER, STATIC_PROVIDER]);
        assert!(registry.get(MOCK_PROVIDER).is_ok());
        assert!(matches!(
            registry.get("ec2"),
            Err(CloudError::UnknownProvider(name)) if name == "ec2"
        ));
    }

    #[test]
    fn test_registry_rejects_invalid_settings() {
        let mut config = Config::default();
        config.mock_provider.hourly_cost = -1.0;
        assert!(matches!(
            CloudRegistry::from_config(&config, MockManager::default()),
            Err(CloudError::InvalidSettings { .. })
        ));
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CloudError>(())
        };
        let result = with_timeout("get_dns_name", Duration::from_millis(10), slow).await;
        assert!(matches!(
            result,
            Err(CloudError::Timeout { operation: "get_dns_name", .. })
        ));
    }
}

//! Static provider: machines that already exist and are never created or
//! destroyed by the control plane. A static host's id is its hostname.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use fleet_core::{CloudStatus, Distro, Host, HostOptions};

use super::{CloudError, CloudManager, ProviderSettings};
use crate::config::Config;

pub const STATIC_PROVIDER: &str = "static";

/// Hostnames managed by the static provider.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    pub hosts: Vec<String>,
}

impl ProviderSettings for StaticSettings {
    fn validate(&self) -> Result<(), CloudError> {
        if let Some(bad) = self.hosts.iter().find(|h| h.trim().is_empty() || h.contains(char::is_whitespace)) {
            return Err(CloudError::InvalidSettings {
                provider: STATIC_PROVIDER.to_string(),
                reason: format!("invalid hostname '{}'", bad),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StaticManager {
    settings: StaticSettings,
}

impl StaticManager {
    pub fn new(settings: StaticSettings) -> Self {
        Self { settings }
    }

    fn manages(&self, host: &Host) -> bool {
        self.settings.hosts.iter().any(|h| h == host.id.as_str())
    }
}

#[async_trait]
impl CloudManager for StaticManager {
    fn name(&self) -> &str {
        STATIC_PROVIDER
    }

    fn settings(&self) -> &dyn ProviderSettings {
        &self.settings
    }

    fn configure(&mut self, config: &Config) -> Result<(), CloudError> {
        self.settings = config.static_provider.clone();
        Ok(())
    }

    async fn can_spawn(&self) -> Result<bool, CloudError> {
        Ok(false)
    }

    async fn spawn_instance(&self, _distro: &Distro, _options: &HostOptions) -> Result<Host, CloudError> {
        Err(CloudError::SpawnUnsupported(STATIC_PROVIDER.to_string()))
    }

    /// Hosts dropped from the configured list count as terminated.
    async fn get_instance_status(&self, host: &Host) -> Result<CloudStatus, CloudError> {
        if self.manages(host) {
            Ok(CloudStatus::Running)
        } else {
            Ok(CloudStatus::Terminated)
        }
    }

    async fn terminate_instance(&self, host: &Host) -> Result<(), CloudError> {
        Err(CloudError::Provider {
            provider: STATIC_PROVIDER.to_string(),
            operation: "terminate_instance",
            message: format!("cannot terminate static host '{}'", host.id),
        })
    }

    async fn is_up(&self, host: &Host) -> Result<bool, CloudError> {
        Ok(self.manages(host))
    }

    async fn is_ssh_reachable(&self, host: &Host, key_path: &str) -> Result<bool, CloudError> {
        let target = format!("{}@{}", host.user, self.get_dns_name(host).await?);
        let mut args = self.get_ssh_options(host, key_path)?;
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            target,
            "exit".to_string(),
        ]);

        debug!(host_id = %host.id, "Checking SSH reachability");
        let status = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| CloudError::Provider {
                provider: STATIC_PROVIDER.to_string(),
                operation: "is_ssh_reachable",
                message: e.to_string(),
            })?;

        Ok(status.success())
    }

    async fn get_dns_name(&self, host: &Host) -> Result<String, CloudError> {
        Ok(host.id.to_string())
    }

    /// Static hosts are not billed by the fleet.
    fn time_til_next_payment(&self, _host: &Host) -> Duration {
        Duration::ZERO
    }
}

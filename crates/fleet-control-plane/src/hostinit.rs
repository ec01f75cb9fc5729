//! Host creation: intent records first, provider instances second.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use fleet_core::{Event, Host, HostId, HostOptions, HostStatus};

use crate::cloud::{new_intent, with_timeout, CloudError};
use crate::state::AppState;

/// Host initialization errors.
#[derive(Debug, Error)]
pub enum HostInitError {
    #[error("Distro not found: {0}")]
    DistroNotFound(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Outcome of one [`HostInit::start_intent_hosts`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub started: usize,
    pub failed: usize,
    /// Spawns that timed out. The intent stays uninitialized and is retried.
    pub deferred: usize,
}

/// Creates intent hosts and asks their providers to spawn them.
pub struct HostInit {
    state: Arc<AppState>,
}

impl HostInit {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Write an intent host for `distro_id` and its `HostCreated` event.
    ///
    /// No provider call is made here; [`Self::start_intent_hosts`] does that.
    pub async fn create_intent_host(&self, distro_id: &str, options: &HostOptions) -> Result<Host, HostInitError> {
        let distro = self
            .state
            .distros
            .read()
            .await
            .get(distro_id)
            .cloned()
            .ok_or_else(|| HostInitError::DistroNotFound(distro_id.to_string()))?;

        let manager = self.state.cloud.get(&distro.provider)?;
        if !manager.can_spawn().await? {
            return Err(CloudError::SpawnUnsupported(distro.provider.clone()).into());
        }

        let tag = HostId::generate(&distro.id);
        let host = new_intent(&distro, tag.as_str(), &distro.provider, options);
        self.state.insert_host(host.clone()).await;
        self.state.events.record(Event::host_created(&host.id)).await;

        info!(host_id = %host.id, distro = %distro.id, provider = %distro.provider, "Intent host created");
        Ok(host)
    }

    /// Spawn every uninitialized host that has no provider instance yet.
    ///
    /// A provider rejection retires the intent. A timeout does not: the
    /// provider may have created the machine, so the intent is kept.
    pub async fn start_intent_hosts(&self) -> StartReport {
        let intents: Vec<Host> = self
            .state
            .hosts
            .read()
            .await
            .values()
            .filter(|h| h.status == HostStatus::Uninitialized && h.instance_id.is_none())
            .cloned()
            .collect();

        let mut report = StartReport::default();
        for host in intents {
            match self.start_host(&host).await {
                Ok(()) => report.started += 1,
                Err(e @ CloudError::Timeout { .. }) => {
                    warn!(host_id = %host.id, provider = %host.provider, error = %e, "Spawn timed out, keeping intent host");
                    report.deferred += 1;
                }
                Err(e) => {
                    error!(host_id = %host.id, provider = %host.provider, error = %e, "Error spawning intent host");
                    self.abandon(&host.id).await;
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn start_host(&self, host: &Host) -> Result<(), CloudError> {
        let manager = self.state.cloud.get(&host.provider)?;
        let options = spawn_options(host);
        let spawned = with_timeout(
            "spawn_instance",
            self.state.config.provider_timeout(),
            manager.spawn_instance(&host.distro, &options),
        )
        .await?;

        let updated = self
            .state
            .update_host(&host.id, |h| {
                h.instance_id = spawned.instance_id.clone();
                if !spawned.dns_name.is_empty() {
                    h.dns_name = spawned.dns_name.clone();
                }
                h.set_status(HostStatus::Initializing)
            })
            .await;

        match updated {
            Some(Ok(previous)) => {
                if !spawned.dns_name.is_empty() {
                    self.state
                        .events
                        .record(Event::host_dns_name_set(&host.id, &spawned.dns_name))
                        .await;
                }
                self.state
                    .events
                    .log_host_status_changed(&host.id, previous, HostStatus::Initializing)
                    .await;
                info!(
                    host_id = %host.id,
                    instance_id = ?spawned.instance_id,
                    "Intent host spawned"
                );
            }
            Some(Err(e)) => warn!(host_id = %host.id, error = %e, "Spawned host changed state meanwhile"),
            None => warn!(host_id = %host.id, "Intent host disappeared while spawning"),
        }
        Ok(())
    }

    /// A spawn that failed leaves nothing remote behind; retire the intent.
    async fn abandon(&self, host_id: &HostId) {
        let now = Utc::now();
        if let Some(previous) = self.state.update_host(host_id, |h| h.terminate(now)).await {
            self.state
                .events
                .log_host_status_changed(host_id, previous, HostStatus::Terminated)
                .await;
        }
    }
}

/// Rebuild the creation options bound into an intent host.
fn spawn_options(host: &Host) -> HostOptions {
    HostOptions {
        provision_options: host.provision_options.clone(),
        expiration_duration: host
            .expiration_time
            .and_then(|exp| (exp - host.creation_time).to_std().ok()),
        user_name: host.started_by.clone(),
        user_data: host.user_data.clone().unwrap_or_default(),
        user_host: host.user_host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MOCK_PROVIDER, STATIC_PROVIDER};
    use crate::config::Config;
    use crate::notify::testing::RecordingNotifier;
    use crate::state::testing::*;
    use fleet_core::{CloudStatus, Distro, EventType};
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_and_start_intent_host() {
        let fx = fixture();
        fx.state.insert_distro(distro()).await;
        let init = HostInit::new(fx.state.clone());

        let options = HostOptions {
            expiration_duration: Some(Duration::from_secs(3600)),
            user_name: "alice".to_string(),
            ..Default::default()
        };
        let intent = init.create_intent_host("ubuntu1604", &options).await.unwrap();
        assert_eq!(intent.status, HostStatus::Uninitialized);
        assert!(intent.id.as_str().starts_with("ubuntu1604-"));
        assert_eq!(intent.provider, MOCK_PROVIDER);

        let report = init.start_intent_hosts().await;
        assert_eq!(
            report,
            StartReport {
                started: 1,
                ..Default::default()
            }
        );

        let host = fx.state.get_host(&intent.id).await.unwrap();
        assert_eq!(host.status, HostStatus::Initializing);
        let instance_id = host.instance_id.clone().unwrap();
        assert_eq!(
            fx.mock.instance(&instance_id).unwrap().status,
            CloudStatus::Initializing
        );
        assert!(!host.dns_name.is_empty());

        let types: Vec<EventType> = fx
            .state
            .events
            .for_resource(intent.id.as_str())
            .await
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                EventType::HostCreated,
                EventType::HostDnsNameSet,
                EventType::HostStatusChanged
            ]
        );

        // Nothing left to start.
        assert_eq!(init.start_intent_hosts().await, StartReport::default());
    }

    #[tokio::test]
    async fn test_spawn_failure_terminates_intent() {
        let fx = fixture();
        fx.state.insert_distro(distro()).await;
        let init = HostInit::new(fx.state.clone());
        let intent = init
            .create_intent_host("ubuntu1604", &HostOptions::default())
            .await
            .unwrap();

        fx.mock.fail_next_spawn();
        let report = init.start_intent_hosts().await;
        assert_eq!(
            report,
            StartReport {
                failed: 1,
                ..Default::default()
            }
        );

        let host = fx.state.get_host(&intent.id).await.unwrap();
        assert_eq!(host.status, HostStatus::Terminated);
        assert!(host.termination_time.is_some());
    }

    #[tokio::test]
    async fn test_spawn_timeout_keeps_intent_for_retry() {
        let config = Config {
            provider_timeout_secs: 1,
            ..Config::default()
        };
        let fx = fixture_with(config, RecordingNotifier::default());
        fx.state.insert_distro(distro()).await;
        let init = HostInit::new(fx.state.clone());
        let intent = init
            .create_intent_host("ubuntu1604", &HostOptions::default())
            .await
            .unwrap();

        fx.mock.set_spawn_delay(Some(Duration::from_secs(5)));
        let report = init.start_intent_hosts().await;
        assert_eq!(
            report,
            StartReport {
                deferred: 1,
                ..Default::default()
            }
        );
        let host = fx.state.get_host(&intent.id).await.unwrap();
        assert_eq!(host.status, HostStatus::Uninitialized);
        assert!(host.instance_id.is_none());
        assert!(host.termination_time.is_none());

        // The next pass picks it up again.
        fx.mock.set_spawn_delay(None);
        let report = init.start_intent_hosts().await;
        assert_eq!(report.started, 1);
        assert_eq!(
            fx.state.get_host(&intent.id).await.unwrap().status,
            HostStatus::Initializing
        );
    }

    #[tokio::test]
    async fn test_intent_rejected_for_static_or_unknown_distro() {
        let fx = fixture();
        fx.state
            .insert_distro(Distro::new("static-linux", STATIC_PROVIDER))
            .await;
        let init = HostInit::new(fx.state.clone());

        assert!(matches!(
            init.create_intent_host("static-linux", &HostOptions::default()).await,
            Err(HostInitError::Cloud(CloudError::SpawnUnsupported(_)))
        ));
        assert!(matches!(
            init.create_intent_host("nope", &HostOptions::default()).await,
            Err(HostInitError::DistroNotFound(_))
        ));
        assert_eq!(fx.state.host_count().await, 0);
    }

    #[test]
    fn test_spawn_options_round_trip_expiration() {
        let distro = distro();
        let options = HostOptions {
            expiration_duration: Some(Duration::from_secs(5 * 3600)),
            user_data: "#!/bin/sh".to_string(),
            ..Default::default()
        };
        let host = new_intent(&distro, "h", MOCK_PROVIDER, &options);
        let rebuilt = spawn_options(&host);
        assert_eq!(rebuilt.expiration_duration, Some(Duration::from_secs(5 * 3600)));
        assert_eq!(rebuilt.user_data, "#!/bin/sh");
    }
}

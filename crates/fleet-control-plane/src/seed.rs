//! Start-up data loaded from a JSON file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use fleet_core::{
    CloudStatus, Distro, Host, ProjectRef, ProjectVars, Task, TaskId, TaskStatus, Version,
};

use crate::cloud::{MockInstance, MockManager, MOCK_PROVIDER};
use crate::state::AppState;

/// Seed file errors.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything a seed file may contain. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub distros: Vec<Distro>,
    pub hosts: Vec<Host>,
    pub tasks: Vec<Task>,
    pub versions: Vec<Version>,
    pub project_refs: Vec<ProjectRef>,
    pub project_vars: HashMap<String, ProjectVars>,
    /// Explicit per-distro queues. When absent, undispatched tasks are
    /// queued on their distro in file order.
    pub queues: Option<HashMap<String, Vec<TaskId>>>,
}

impl Seed {
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Give every seeded mock host a running instance, so the mock provider
    /// knows about hosts it never spawned.
    pub fn register_mock_instances(&self, mock: &MockManager) {
        for host in self.hosts.iter().filter(|h| h.provider == MOCK_PROVIDER) {
            let key = host.instance_id.clone().unwrap_or_else(|| host.id.to_string());
            let dns_name = if host.dns_name.is_empty() {
                format!("{}.mock.invalid", host.id)
            } else {
                host.dns_name.clone()
            };
            mock.insert_instance(
                key,
                MockInstance {
                    status: CloudStatus::Running,
                    dns_name,
                    ssh_reachable: true,
                },
            );
        }
    }

    /// Load everything into the store.
    pub async fn apply(self, state: &AppState) {
        let counts = (self.distros.len(), self.hosts.len(), self.tasks.len());

        let queues = match self.queues {
            Some(queues) => queues,
            None => {
                let mut queues: HashMap<String, Vec<TaskId>> = HashMap::new();
                for task in self.tasks.iter().filter(|t| t.status == TaskStatus::Undispatched) {
                    queues.entry(task.distro_id.clone()).or_default().push(task.id.clone());
                }
                queues
            }
        };

        for distro in self.distros {
            state.insert_distro(distro).await;
        }
        for host in self.hosts {
            state.insert_host(host).await;
        }
        for task in self.tasks {
            state.insert_task(task).await;
        }
        for (distro_id, task_ids) in queues {
            for task_id in task_ids {
                state.enqueue_task(&distro_id, task_id).await;
            }
        }

        state
            .versions
            .write()
            .await
            .extend(self.versions.into_iter().map(|v| (v.id.clone(), v)));
        state
            .project_refs
            .write()
            .await
            .extend(self.project_refs.into_iter().map(|p| (p.identifier.clone(), p)));
        state.project_vars.write().await.extend(self.project_vars);

        info!(
            distros = counts.0,
            hosts = counts.1,
            tasks = counts.2,
            "Seed data loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::fixture;
    use fleet_core::HostId;

    const SEED: &str = r#"{
        "distros": [{"id": "ubuntu1604", "provider": "mock", "user": "admin"}],
        "hosts": [{
            "id": "h1",
            "user": "admin",
            "distro": {"id": "ubuntu1604", "provider": "mock"},
            "provider": "mock",
            "secret": "hs",
            "status": "running",
            "creation_time": "2026-01-01T00:00:00Z"
        }],
        "tasks": [
            {"id": "t1", "display_name": "compile", "project": "mci", "version": "v1",
             "distro_id": "ubuntu1604", "secret": "ts"},
            {"id": "t2", "display_name": "test", "project": "mci", "version": "v1",
             "distro_id": "ubuntu1604", "secret": "ts", "status": "success"}
        ],
        "versions": [{"id": "v1", "project": "mci", "revision": "abc"}],
        "project_vars": {"mci": {"GOPATH": "/go"}}
    }"#;

    #[tokio::test]
    async fn test_apply_seed() {
        let fx = fixture();
        let seed = Seed::from_json(SEED).unwrap();
        seed.register_mock_instances(&fx.mock);
        seed.apply(&fx.state).await;

        assert_eq!(fx.state.host_count().await, 1);
        assert_eq!(fx.state.task_count().await, 2);
        let task = fx.state.get_task(&TaskId::new("t1")).await.unwrap();
        assert!(task.activated);

        // Only the undispatched task is queued.
        let queues = fx.state.task_queues.read().await;
        assert_eq!(queues["ubuntu1604"].len(), 1);
        assert_eq!(fx.state.project_vars.read().await["mci"]["GOPATH"], "/go");

        assert_eq!(
            fx.mock.instance("h1").unwrap().dns_name,
            "h1.mock.invalid"
        );
        assert!(fx.state.get_host(&HostId::new("h1")).await.is_some());
    }

    #[test]
    fn test_bad_seed() {
        assert!(matches!(Seed::from_json("{"), Err(SeedError::Parse(_))));
        assert!(Seed::from_json("{}").unwrap().tasks.is_empty());
    }
}

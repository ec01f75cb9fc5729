//! Shared application state.
//!
//! Every collection sits behind its own tokio `RwLock`. Handlers that need
//! more than one write lock take them in field order (tasks, hosts, task
//! queues) so concurrent requests cannot deadlock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use fleet_core::{
    ArtifactEntry, Distro, Host, HostId, ProjectRef, ProjectVars, Task, TaskId, TaskLog, TestLog,
    Version,
};

use crate::cloud::CloudRegistry;
use crate::config::Config;
use crate::events::EventLog;
use crate::lock::GlobalLocks;
use crate::notify::Notifier;

/// Shared application state.
pub struct AppState {
    pub config: Config,

    /// Tasks indexed by TaskId.
    pub tasks: RwLock<HashMap<TaskId, Task>>,

    /// Hosts indexed by their instance tag.
    pub hosts: RwLock<HashMap<HostId, Host>>,

    /// Per-distro queues of tasks waiting for a host, in dispatch order.
    pub task_queues: RwLock<HashMap<String, VecDeque<TaskId>>>,

    pub distros: RwLock<HashMap<String, Distro>>,
    pub versions: RwLock<HashMap<String, Version>>,

    /// Project refs indexed by project identifier.
    pub project_refs: RwLock<HashMap<String, ProjectRef>>,
    pub project_vars: RwLock<HashMap<String, ProjectVars>>,

    /// Test logs indexed by their generated id.
    pub test_logs: RwLock<HashMap<String, TestLog>>,
    pub task_logs: RwLock<Vec<TaskLog>>,
    pub artifacts: RwLock<HashMap<TaskId, ArtifactEntry>>,

    pub events: EventLog,
    pub locks: GlobalLocks,
    pub cloud: CloudRegistry,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: Config, cloud: CloudRegistry, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self {
            config,
            tasks: RwLock::new(HashMap::new()),
            hosts: RwLock::new(HashMap::new()),
            task_queues: RwLock::new(HashMap::new()),
            distros: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            project_refs: RwLock::new(HashMap::new()),
            project_vars: RwLock::new(HashMap::new()),
            test_logs: RwLock::new(HashMap::new()),
            task_logs: RwLock::new(Vec::new()),
            artifacts: RwLock::new(HashMap::new()),
            events: EventLog::new(),
            locks: GlobalLocks::new(),
            cloud,
            notifier,
        })
    }

    pub async fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn get_host(&self, id: &HostId) -> Option<Host> {
        self.hosts.read().await.get(id).cloned()
    }

    pub async fn insert_task(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    pub async fn insert_host(&self, host: Host) {
        self.hosts.write().await.insert(host.id.clone(), host);
    }

    pub async fn insert_distro(&self, distro: Distro) {
        self.distros.write().await.insert(distro.id.clone(), distro);
    }

    /// Append a task to the back of its distro's queue.
    pub async fn enqueue_task(&self, distro_id: &str, task_id: TaskId) {
        self.task_queues
            .write()
            .await
            .entry(distro_id.to_string())
            .or_default()
            .push_back(task_id);
    }

    /// Apply `f` to a stored host. Returns `None` if the host does not exist.
    pub async fn update_host<T>(&self, id: &HostId, f: impl FnOnce(&mut Host) -> T) -> Option<T> {
        self.hosts.write().await.get_mut(id).map(f)
    }

    pub async fn update_task<T>(&self, id: &TaskId, f: impl FnOnce(&mut Task) -> T) -> Option<T> {
        self.tasks.write().await.get_mut(id).map(f)
    }

    /// Stamp the host's last-communication time. Failures are only logged.
    pub async fn touch_host(&self, id: &HostId) {
        let now = Utc::now();
        if self
            .update_host(id, |host| host.last_communication_time = Some(now))
            .await
            .is_none()
        {
            warn!(host_id = %id, "Could not update host last communication time");
        }
    }

    /// Ask the agent running `id` to stop. It learns of this on its next heartbeat.
    ///
    /// Returns false if the task is unknown or already finished.
    pub async fn abort_task(&self, id: &TaskId) -> bool {
        let aborted = self
            .update_task(id, |task| {
                if task.status.is_finished() {
                    return false;
                }
                task.aborted = true;
                true
            })
            .await
            .unwrap_or(false);

        if aborted {
            info!(task_id = %id, "Task marked for abort");
        }
        aborted
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn host_count(&self) -> usize {
        self.hosts.read().await.len()
    }
}

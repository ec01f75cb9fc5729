//! HTTP client for the agent protocol.

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleet_core::protocol::{
    EndTaskResponse, HeartbeatResponse, NextTaskResponse, TaskStartRequest, HOST_HEADER,
    HOST_SECRET_HEADER, TASK_SECRET_HEADER,
};
use fleet_core::{TaskEndDetail, TaskLog, TestResults};

use crate::error::ClientError;

/// Prefix every agent route lives under.
const API_PREFIX: &str = "/api/2";

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// A task the agent was handed, with the secret it must present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCredentials {
    pub task_id: String,
    pub task_secret: String,
}

/// Client an agent uses to talk to the control plane as one host.
pub struct AgentClient {
    inner: reqwest::Client,
    base_url: String,
    host_id: String,
    host_secret: String,
}

impl AgentClient {
    /// Create a new client for the host `host_id`.
    pub fn new(base_url: &str, host_id: impl Into<String>, host_secret: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            host_id: host_id.into(),
            host_secret: host_secret.into(),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Check if the control plane is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        debug!(url = %url, "Checking health");

        let response = self.inner.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    /// Ask for work. An empty reply means nothing is queued for this host.
    pub async fn next_task(&self) -> Result<NextTaskResponse, ClientError> {
        let request = self.post("/agent/next_task", None);
        self.send_json(request).await
    }

    /// Like [`Self::next_task`], but `None` when no task was assigned.
    pub async fn next_task_credentials(&self) -> Result<Option<TaskCredentials>, ClientError> {
        let reply = self.next_task().await?;
        Ok(match (reply.task_id, reply.task_secret) {
            (Some(task_id), Some(task_secret)) => Some(TaskCredentials {
                task_id,
                task_secret,
            }),
            _ => None,
        })
    }

    pub async fn start_task(&self, task: &TaskCredentials, pid: &str) -> Result<(), ClientError> {
        let body = TaskStartRequest {
            pid: pid.to_string(),
        };
        let request = self.post(&task_path(task, "start"), Some(task)).json(&body);
        self.send_ok(request).await
    }

    /// Report liveness. Returns true when the task has been aborted.
    pub async fn heartbeat(&self, task: &TaskCredentials) -> Result<bool, ClientError> {
        let request = self.post(&task_path(task, "heartbeat"), Some(task));
        let reply: HeartbeatResponse = self.send_json(request).await?;
        Ok(reply.abort)
    }

    pub async fn end_task(
        &self,
        task: &TaskCredentials,
        detail: &TaskEndDetail,
    ) -> Result<EndTaskResponse, ClientError> {
        let request = self.post(&task_path(task, "end"), Some(task)).json(detail);
        self.send_json(request).await
    }

    pub async fn send_log(&self, task: &TaskCredentials, log: &TaskLog) -> Result<(), ClientError> {
        let request = self.post(&task_path(task, "log"), Some(task)).json(log);
        self.send_ok(request).await
    }

    pub async fn attach_results(&self, task: &TaskCredentials, results: &TestResults) -> Result<(), ClientError> {
        let request = self.post(&task_path(task, "results"), Some(task)).json(results);
        self.send_ok(request).await
    }

    /// Post any JSON body to a task sub-route, e.g. `system_info`.
    pub async fn post_task_json<B: Serialize>(
        &self,
        task: &TaskCredentials,
        route: &str,
        body: &B,
    ) -> Result<(), ClientError> {
        let request = self.post(&task_path(task, route), Some(task)).json(body);
        self.send_ok(request).await
    }

    fn post(&self, path: &str, task: Option<&TaskCredentials>) -> RequestBuilder {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        debug!(url = %url, host_id = %self.host_id, "POST request");

        let mut request = self
            .inner
            .post(url)
            .header(ACCEPT, "application/json")
            .header(HOST_HEADER, &self.host_id)
            .header(HOST_SECRET_HEADER, &self.host_secret);
        if let Some(task) = task {
            request = request.header(TASK_SECRET_HEADER, &task.task_secret);
        }
        request
    }

    async fn send_ok(&self, request: RequestBuilder) -> Result<(), ClientError> {
        check_status(request.send().await?).await?;
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = check_status(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

fn task_path(task: &TaskCredentials, route: &str) -> String {
    format!("/task/{}/{}", task.task_id, route)
}

/// Turn a non-success reply into [`ClientError::Api`], keeping the server's message.
async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fleet_control_plane::cloud::{new_intent, MockManager, MOCK_PROVIDER};
    use fleet_control_plane::{create_router, AppState, CloudRegistry, Config, LogNotifier};
    use fleet_core::{Distro, HostOptions, HostStatus, Task, TaskId, TaskStatus};

    /// Serve a control plane with one running host and one queued task.
    async fn serve() -> (String, Arc<AppState>, AgentClient) {
        let config = Config::default();
        let cloud = CloudRegistry::from_config(&config, MockManager::default()).unwrap();
        let state = AppState::new(config, cloud, Arc::new(LogNotifier));

        let distro = Distro::new("ubuntu1604", MOCK_PROVIDER);
        let mut host = new_intent(&distro, "h1", MOCK_PROVIDER, &HostOptions::default());
        host.status = HostStatus::Running;
        state.insert_distro(distro.clone()).await;
        state.insert_host(host.clone()).await;

        let task = Task::new("compile", "mci", "v1", "ubuntu1604", "t1-secret").with_id(TaskId::new("t1"));
        state.insert_task(task).await;
        state.enqueue_task("ubuntu1604", TaskId::new("t1")).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let router = create_router(state.clone());
        tokio::spawn(async move { axum::serve(listener, router).await });

        let client = AgentClient::new(&base_url, "h1", host.secret);
        (base_url, state, client)
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let (_, state, client) = serve().await;
        assert!(client.health().await.unwrap());

        let task = client.next_task_credentials().await.unwrap().unwrap();
        assert_eq!(task.task_id, "t1");
        assert_eq!(task.task_secret, "t1-secret");

        client.start_task(&task, "4242").await.unwrap();
        assert!(!client.heartbeat(&task).await.unwrap());

        let reply = client.end_task(&task, &TaskEndDetail::success()).await.unwrap();
        assert!(!reply.should_exit);

        let stored = state.get_task(&TaskId::new("t1")).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Success);

        // Queue is drained now.
        assert_eq!(client.next_task_credentials().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_heartbeat_reports_abort() {
        let (_, state, client) = serve().await;
        let task = client.next_task_credentials().await.unwrap().unwrap();
        client.start_task(&task, "1").await.unwrap();

        assert!(state.abort_task(&TaskId::new("t1")).await);
        assert!(client.heartbeat(&task).await.unwrap());
    }

    #[tokio::test]
    async fn test_api_errors_carry_message() {
        let (base_url, _, client) = serve().await;
        let task = client.next_task_credentials().await.unwrap().unwrap();

        let forged = TaskCredentials {
            task_secret: "nope".to_string(),
            ..task
        };
        let err = client.heartbeat(&forged).await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("Wrong secret sent for task t1"));

        let stranger = AgentClient::new(&base_url, "h1", "bad-secret");
        let err = stranger.next_task().await.unwrap_err();
        assert_eq!(err.status(), Some(409));
    }
}

use crate::error::{MesosError, Result};
use crate::traits::{ClusterState, ExecutorStateInfo, Sandbox};
use async_trait::async_trait;
use jobmesh_core::context::app_name_from_executor_id;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the cluster state reader
#[derive(Debug, Clone)]
pub struct StateClientConfig {
    /// Master base URL (e.g., "http://127.0.0.1:5050")
    pub master_url: String,
    /// Port of the agents' HTTP endpoint
    pub agent_state_port: u16,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for StateClientConfig {
    fn default() -> Self {
        Self {
            master_url: "http://127.0.0.1:5050".to_string(),
            agent_state_port: 5051,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MasterState {
    #[serde(default)]
    frameworks: Vec<FrameworkState>,
    #[serde(default)]
    slaves: Vec<AgentSummary>,
}

#[derive(Debug, Deserialize)]
struct FrameworkState {
    id: String,
    #[serde(default)]
    executors: Vec<ExecutorState>,
}

#[derive(Debug, Deserialize)]
struct ExecutorState {
    /// Agents report `id`, the master reports `executor_id`
    #[serde(alias = "executor_id")]
    id: String,
    #[serde(default)]
    slave_id: String,
    #[serde(default)]
    directory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentSummary {
    id: String,
    #[serde(default)]
    hostname: String,
    /// `slave(1)@10.0.0.1:5051`
    #[serde(default)]
    pid: String,
}

impl AgentSummary {
    /// Address the agent's HTTP endpoint listens on
    fn host(&self) -> &str {
        self.pid
            .split_once('@')
            .and_then(|(_, addr)| addr.split(':').next())
            .filter(|host| !host.is_empty())
            .unwrap_or(&self.hostname)
    }
}

#[derive(Debug, Deserialize)]
struct AgentFlags {
    work_dir: String,
}

#[derive(Debug, Deserialize)]
struct AgentState {
    flags: AgentFlags,
    #[serde(default)]
    frameworks: Vec<FrameworkState>,
}

/// HTTP reader of the master's and agents' `/state` endpoints
pub struct StateClient {
    client: Client,
    config: StateClientConfig,
    master_url: RwLock<String>,
    framework_id: RwLock<Option<String>>,
}

impl StateClient {
    pub fn new(config: StateClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MesosError::internal_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            master_url: RwLock::new(config.master_url.trim_end_matches('/').to_string()),
            framework_id: RwLock::new(None),
            config,
        })
    }

    pub fn with_framework_id(self, framework_id: impl Into<String>) -> Self {
        *self.framework_id.write() = Some(framework_id.into());
        self
    }

    pub fn master_url(&self) -> String {
        self.master_url.read().clone()
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MesosError::http_error(url, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MesosError::unexpected_status(
                format!("GET {}", url),
                status.as_u16(),
                body,
            ));
        }

        resp.json::<T>()
            .await
            .map_err(|e| MesosError::decode_error(format!("state from {}", url), e.to_string()))
    }

    async fn master_state(&self) -> Result<(String, MasterState)> {
        let framework_id = self
            .framework_id
            .read()
            .clone()
            .ok_or_else(|| MesosError::state_unavailable("framework id is not known yet"))?;
        let url = format!("{}/state", self.master_url());
        let state = self.fetch::<MasterState>(&url).await?;
        Ok((framework_id, state))
    }

    fn framework_executors<'a>(
        frameworks: &'a [FrameworkState],
        framework_id: &str,
        app_name: Option<&'a str>,
    ) -> impl Iterator<Item = &'a ExecutorState> + 'a {
        let framework_id = framework_id.to_string();
        frameworks
            .iter()
            .filter(move |framework| framework.id == framework_id)
            .flat_map(|framework| framework.executors.iter())
            .filter(move |executor| match app_name {
                Some(app) => app_name_from_executor_id(&executor.id) == app,
                None => true,
            })
    }
}

#[async_trait]
impl ClusterState for StateClient {
    async fn executors(&self, app_name: Option<&str>) -> Result<Vec<ExecutorStateInfo>> {
        let (framework_id, state) = self.master_state().await?;

        let executors: Vec<ExecutorStateInfo> =
            Self::framework_executors(&state.frameworks, &framework_id, app_name)
                .map(|executor| ExecutorStateInfo {
                    id: executor.id.clone(),
                    slave_id: executor.slave_id.clone(),
                })
                .collect();

        debug!(
            framework_id = %framework_id,
            app = ?app_name,
            "Found {} executors",
            executors.len()
        );
        Ok(executors)
    }

    async fn sandbox(&self, app_name: &str) -> Result<Vec<Sandbox>> {
        let (framework_id, state) = match self.master_state().await {
            Ok(found) => found,
            Err(e) => {
                warn!(app = %app_name, "Sandbox lookup without master state: {}", e);
                return Ok(Vec::new());
            }
        };
        let agents: HashMap<&str, &AgentSummary> =
            state.slaves.iter().map(|agent| (agent.id.as_str(), agent)).collect();

        // `None` marks an agent that could not be read this lookup
        let mut agent_states: HashMap<String, Option<AgentState>> = HashMap::new();
        let mut sandboxes = Vec::new();

        for executor in Self::framework_executors(&state.frameworks, &framework_id, Some(app_name)) {
            let Some(agent) = agents.get(executor.slave_id.as_str()) else {
                warn!(
                    "Executor {} references unknown agent {}",
                    executor.id, executor.slave_id
                );
                continue;
            };

            let host = agent.host().to_string();
            if !agent_states.contains_key(&host) {
                let url = format!("http://{}:{}/state", host, self.config.agent_state_port);
                let agent_state = match self.fetch::<AgentState>(&url).await {
                    Ok(agent_state) => Some(agent_state),
                    Err(e) => {
                        warn!(agent_id = %agent.id, "Skipping sandboxes on unreadable agent: {}", e);
                        None
                    }
                };
                agent_states.insert(host.clone(), agent_state);
            }
            let Some(Some(agent_state)) = agent_states.get(&host) else {
                continue;
            };

            let directory = Self::framework_executors(&agent_state.frameworks, &framework_id, None)
                .find(|candidate| candidate.id == executor.id)
                .and_then(|candidate| candidate.directory.as_deref());

            if let Some(directory) = directory {
                let path = directory
                    .strip_prefix(agent_state.flags.work_dir.as_str())
                    .unwrap_or(directory);
                sandboxes.push(Sandbox {
                    hostname: agent.hostname.clone(),
                    path: path.to_string(),
                });
            }
        }

        Ok(sandboxes)
    }

    fn on_subscribed(&self, framework_id: &str, master: Option<&str>) {
        *self.framework_id.write() = Some(framework_id.to_string());
        if let Some(master) = master {
            *self.master_url.write() = master.trim_end_matches('/').to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn master_state(agent_port: u16) -> serde_json::Value {
        json!({
            "frameworks": [
                {
                    "id": "fw-1",
                    "executors": [
                        {"executor_id": "app_a@-@S0", "slave_id": "S0", "framework_id": "fw-1"},
                        {"executor_id": "app_b@-@S1", "slave_id": "S1", "framework_id": "fw-1"}
                    ]
                },
                {
                    "id": "other",
                    "executors": [{"executor_id": "app_a@-@S1", "slave_id": "S1"}]
                }
            ],
            "slaves": [
                {"id": "S0", "hostname": "node0", "pid": format!("slave(1)@127.0.0.1:{}", agent_port)},
                {"id": "S1", "hostname": "node1", "pid": "slave(1)@127.0.0.2:5051"}
            ]
        })
    }

    async fn client_for(master: &MockServer, agent_port: u16) -> StateClient {
        StateClient::new(StateClientConfig {
            master_url: master.uri(),
            agent_state_port: agent_port,
            timeout: Duration::from_millis(500),
        })
        .unwrap()
        .with_framework_id("fw-1")
    }

    #[tokio::test]
    async fn test_executors_filters_by_framework_and_app() {
        let master = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(master_state(5051)))
            .mount(&master)
            .await;

        let client = client_for(&master, 5051).await;

        let all = client.executors(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let app_a = client.executors(Some("app_a")).await.unwrap();
        assert_eq!(
            app_a,
            vec![ExecutorStateInfo {
                id: "app_a@-@S0".to_string(),
                slave_id: "S0".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_sandbox_strips_work_dir() {
        let master = MockServer::start().await;
        let agent = MockServer::start().await;
        let agent_port = agent.address().port();

        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(master_state(agent_port)))
            .mount(&master)
            .await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "flags": {"work_dir": "/var/lib/mesos"},
                "frameworks": [{
                    "id": "fw-1",
                    "executors": [{
                        "id": "app_a@-@S0",
                        "directory": "/var/lib/mesos/slaves/S0/frameworks/fw-1/executors/app_a@-@S0/runs/r1"
                    }]
                }]
            })))
            .mount(&agent)
            .await;

        let client = client_for(&master, agent_port).await;
        let sandboxes = client.sandbox("app_a").await.unwrap();

        assert_eq!(
            sandboxes,
            vec![Sandbox {
                hostname: "node0".to_string(),
                path: "/slaves/S0/frameworks/fw-1/executors/app_a@-@S0/runs/r1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_framework_id_is_unavailable() {
        let client = StateClient::new(StateClientConfig::default()).unwrap();
        let err = client.executors(None).await.unwrap_err();
        assert!(matches!(err, MesosError::StateUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_error_status_and_timeout() {
        let master = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(503).set_body_string("electing"))
            .mount(&master)
            .await;

        let client = client_for(&master, 5051).await;
        let err = client.executors(None).await.unwrap_err();
        assert!(matches!(err, MesosError::UnexpectedStatus { status: 503, .. }));

        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(master_state(5051))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&slow)
            .await;

        let client = client_for(&slow, 5051).await;
        let err = client.executors(None).await.unwrap_err();
        assert!(matches!(err, MesosError::HttpError { .. }));
    }

    #[tokio::test]
    async fn test_on_subscribed_updates_master_and_framework() {
        let master = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(master_state(5051)))
            .mount(&master)
            .await;

        let client = StateClient::new(StateClientConfig::default()).unwrap();
        client.on_subscribed("fw-1", Some(&format!("{}/", master.uri())));

        assert_eq!(client.master_url(), master.uri());
        assert_eq!(client.executors(Some("app_b")).await.unwrap().len(), 1);
    }

    fn agent_state(executor_id: &str) -> serde_json::Value {
        json!({
            "flags": {"work_dir": "/var/lib/mesos"},
            "frameworks": [{
                "id": "fw-1",
                "executors": [{
                    "id": executor_id,
                    "directory": format!("/var/lib/mesos/runs/{}", executor_id)
                }]
            }]
        })
    }

    #[tokio::test]
    async fn test_sandbox_skips_unreadable_agents() {
        let master = MockServer::start().await;
        let agent = MockServer::start().await;
        let agent_port = agent.address().port();

        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "frameworks": [{
                    "id": "fw-1",
                    "executors": [
                        {"executor_id": "app_a@-@S0", "slave_id": "S0"},
                        {"executor_id": "app_a@-@S1", "slave_id": "S1"}
                    ]
                }],
                "slaves": [
                    {"id": "S0", "hostname": "node0", "pid": format!("slave(1)@127.0.0.1:{}", agent_port)},
                    {"id": "S1", "hostname": "node1", "pid": format!("slave(1)@127.0.0.2:{}", agent_port)}
                ]
            })))
            .mount(&master)
            .await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(agent_state("app_a@-@S0")))
            .mount(&agent)
            .await;

        let client = client_for(&master, agent_port).await;
        let sandboxes = client.sandbox("app_a").await.unwrap();

        assert_eq!(
            sandboxes,
            vec![Sandbox {
                hostname: "node0".to_string(),
                path: "/runs/app_a@-@S0".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_sandbox_agent_error_status_is_empty() {
        let master = MockServer::start().await;
        let agent = MockServer::start().await;
        let agent_port = agent.address().port();

        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(master_state(agent_port)))
            .mount(&master)
            .await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(500).set_body_string("agent overloaded"))
            .mount(&agent)
            .await;

        let client = client_for(&master, agent_port).await;
        assert!(client.sandbox("app_a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_without_master_is_empty() {
        let master = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(503).set_body_string("electing"))
            .mount(&master)
            .await;

        let client = client_for(&master, 5051).await;
        assert!(client.sandbox("app_a").await.unwrap().is_empty());
    }
}

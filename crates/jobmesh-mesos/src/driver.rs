use crate::error::{MesosError, Result};
use crate::protocol::{AgentId, FrameworkId, OfferId, SchedulerEvent, TaskId, TaskInfo, TaskStatus};
use crate::recordio::RecordIoDecoder;
use crate::traits::SchedulerDriver;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STREAM_ID_HEADER: &str = "Mesos-Stream-Id";

/// Framework registration and connection settings
#[derive(Debug, Clone)]
pub struct FrameworkConfig {
    /// Master base URL (e.g., "http://127.0.0.1:5050")
    pub master_url: String,
    pub name: String,
    /// OS user tasks run as; empty lets the master pick the scheduler's user
    pub user: String,
    pub role: Option<String>,
    pub hostname: Option<String>,
    /// How long the master keeps tasks alive while the scheduler is away
    pub failover_timeout: Duration,
    pub checkpoint: bool,
    /// Timeout for individual calls
    pub request_timeout: Duration,
    /// Reconnect when the subscription stream is silent this long
    pub heartbeat_timeout: Duration,
    /// Delay between subscription attempts
    pub reconnect_delay: Duration,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            master_url: "http://127.0.0.1:5050".to_string(),
            name: "jobmesh".to_string(),
            user: String::new(),
            role: None,
            hostname: None,
            failover_timeout: Duration::from_secs(7 * 24 * 3600),
            checkpoint: true,
            request_timeout: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(45),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Scheduler driver speaking the v1 scheduler HTTP API
///
/// `run` keeps one SUBSCRIBE stream open, decoding RecordIO records into
/// `SchedulerEvent`s for the engine. Calls made through `SchedulerDriver`
/// reuse the stream id of the current subscription.
pub struct HttpSchedulerDriver {
    client: Client,
    stream_client: Client,
    config: FrameworkConfig,
    endpoint: String,
    stream_id: RwLock<Option<String>>,
    framework_id: RwLock<Option<FrameworkId>>,
}

impl HttpSchedulerDriver {
    pub fn new(config: FrameworkConfig, framework_id: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MesosError::internal_error(format!("Failed to build HTTP client: {}", e)))?;
        // The subscription is a long-lived response; only bound the connect
        let stream_client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| MesosError::internal_error(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = format!("{}/api/v1/scheduler", config.master_url.trim_end_matches('/'));

        Ok(Self {
            client,
            stream_client,
            endpoint,
            stream_id: RwLock::new(None),
            framework_id: RwLock::new(framework_id.map(FrameworkId::new)),
            config,
        })
    }

    pub fn framework_id(&self) -> Option<FrameworkId> {
        self.framework_id.read().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.stream_id.read().is_some()
    }

    /// Keep the subscription open until cancelled, reconnecting after errors
    pub async fn run(
        &self,
        events: mpsc::Sender<SchedulerEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        info!("Subscribing to master at {}", self.endpoint);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler driver shutting down");
                    return Ok(());
                }
                result = self.subscribe_once(&events) => {
                    match result {
                        Ok(()) => info!("Subscription stream closed by master"),
                        Err(e) => warn!("Subscription failed: {}, will retry", e),
                    }
                }
            }

            *self.stream_id.write() = None;
            if events.send(SchedulerEvent::Disconnected).await.is_err() {
                debug!("Event receiver dropped, stopping driver");
                return Ok(());
            }

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler driver shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    fn subscribe_body(&self) -> Value {
        let framework_id = self.framework_id();
        let mut framework_info = json!({
            "user": self.config.user,
            "name": self.config.name,
            "failover_timeout": self.config.failover_timeout.as_secs_f64(),
            "checkpoint": self.config.checkpoint,
        });
        if let Some(role) = &self.config.role {
            framework_info["roles"] = json!([role]);
            framework_info["capabilities"] = json!([{"type": "MULTI_ROLE"}]);
        }
        if let Some(hostname) = &self.config.hostname {
            framework_info["hostname"] = json!(hostname);
        }

        let mut body = json!({
            "type": "SUBSCRIBE",
            "subscribe": {"framework_info": framework_info},
        });
        if let Some(id) = framework_id {
            body["subscribe"]["framework_info"]["id"] = json!(id);
            body["framework_id"] = json!(id);
        }
        body
    }

    async fn subscribe_once(&self, events: &mpsc::Sender<SchedulerEvent>) -> Result<()> {
        let resp = self
            .stream_client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&self.subscribe_body())
            .send()
            .await
            .map_err(|e| MesosError::http_error(&self.endpoint, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MesosError::unexpected_status("SUBSCRIBE", status.as_u16(), body));
        }

        let stream_id = resp
            .headers()
            .get(STREAM_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                MesosError::decode_error("SUBSCRIBE response", "missing Mesos-Stream-Id header")
            })?;
        debug!(stream_id = %stream_id, "Subscription stream opened");
        *self.stream_id.write() = Some(stream_id);

        let mut stream = Box::pin(resp.bytes_stream());
        let mut decoder = RecordIoDecoder::new();

        loop {
            let next = tokio::time::timeout(self.config.heartbeat_timeout, stream.next())
                .await
                .map_err(|_| {
                    MesosError::http_error(&self.endpoint, "no heartbeat from master")
                })?;
            let Some(chunk) = next else {
                return Ok(());
            };
            let chunk = chunk.map_err(|e| MesosError::http_error(&self.endpoint, e.to_string()))?;
            decoder.push(&chunk);

            while let Some(record) = decoder.next_record()? {
                let event = match SchedulerEvent::decode(&record) {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        debug!("Ignoring unhandled event type");
                        continue;
                    }
                    Err(e) => {
                        warn!("Skipping undecodable event: {}", e);
                        continue;
                    }
                };

                if let SchedulerEvent::Subscribed { framework_id, .. } = &event {
                    info!(framework_id = %framework_id, "Subscribed to master");
                    *self.framework_id.write() = Some(framework_id.clone());
                }

                events
                    .send(event)
                    .await
                    .map_err(|_| MesosError::internal_error("event receiver dropped"))?;
            }
        }
    }

    async fn call(&self, kind: &str, mut body: Value) -> Result<()> {
        let stream_id = self.stream_id.read().clone().ok_or(MesosError::NotSubscribed)?;
        let framework_id = self.framework_id().ok_or(MesosError::NotSubscribed)?;

        body["type"] = json!(kind);
        body["framework_id"] = json!(framework_id);

        debug!("POST {} {}", self.endpoint, kind);
        let resp = self
            .client
            .post(&self.endpoint)
            .header(STREAM_ID_HEADER, stream_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| MesosError::http_error(&self.endpoint, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MesosError::unexpected_status(kind, status.as_u16(), body));
        }

        Ok(())
    }
}

#[async_trait]
impl SchedulerDriver for HttpSchedulerDriver {
    async fn launch_tasks(&self, offer_ids: &[OfferId], tasks: Vec<TaskInfo>) -> Result<()> {
        self.call(
            "ACCEPT",
            json!({
                "accept": {
                    "offer_ids": offer_ids,
                    "operations": [{"type": "LAUNCH", "launch": {"task_infos": tasks}}],
                }
            }),
        )
        .await
    }

    async fn decline_offers(&self, offer_ids: &[OfferId]) -> Result<()> {
        if offer_ids.is_empty() {
            return Ok(());
        }
        self.call("DECLINE", json!({"decline": {"offer_ids": offer_ids}}))
            .await
    }

    async fn kill_task(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> Result<()> {
        let mut kill = json!({"task_id": task_id});
        if let Some(agent_id) = agent_id {
            kill["agent_id"] = json!(agent_id);
        }
        self.call("KILL", json!({"kill": kill})).await
    }

    async fn reconcile_tasks(&self, statuses: Vec<TaskStatus>) -> Result<()> {
        let tasks: Vec<Value> = statuses
            .iter()
            .map(|status| {
                let mut task = json!({"task_id": status.task_id});
                if let Some(agent_id) = &status.agent_id {
                    task["agent_id"] = json!(agent_id);
                }
                task
            })
            .collect();
        self.call("RECONCILE", json!({"reconcile": {"tasks": tasks}}))
            .await
    }

    async fn acknowledge(&self, agent_id: &AgentId, task_id: &TaskId, uuid: &[u8]) -> Result<()> {
        self.call(
            "ACKNOWLEDGE",
            json!({
                "acknowledge": {
                    "agent_id": agent_id,
                    "task_id": task_id,
                    "uuid": STANDARD.encode(uuid),
                }
            }),
        )
        .await
    }
}

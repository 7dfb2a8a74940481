//! Wire types of the Mesos v1 scheduler HTTP API (JSON encoding).
//!
//! Only the subset the scheduler reads or writes is modelled; unknown JSON
//! fields are ignored on input.

use crate::error::{MesosError, Result};
use jobmesh_core::TraceState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines a `{"value": "..."}` identifier newtype.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name {
            pub value: String,
        }

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self {
                    value: value.into(),
                }
            }

            pub fn as_str(&self) -> &str {
                &self.value
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

define_id!(OfferId);
define_id!(AgentId);
define_id!(FrameworkId);
define_id!(TaskId);
define_id!(ExecutorId);

/// Protobuf `bytes` fields travel as base64 strings in the JSON encoding
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Scalar,
    Ranges,
    Set,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    pub value: f64,
}

/// A named resource inside an offer or a task/executor request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Scalar>,
}

impl Resource {
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: ValueType::Scalar,
            scalar: Some(Scalar { value }),
        }
    }
}

/// A time-bounded grant of resources on one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    #[serde(default)]
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Offer {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        hostname: impl Into<String>,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            id: OfferId::new(id),
            framework_id: FrameworkId::default(),
            agent_id: AgentId::new(agent_id),
            hostname: hostname.into(),
            resources,
        }
    }

    /// Sum of the scalar resources with this name; 0 when absent
    pub fn scalar(&self, name: &str) -> f64 {
        self.resources
            .iter()
            .filter(|r| r.name == name)
            .filter_map(|r| r.scalar.map(|s| s.value))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandUri {
    pub value: String,
    pub executable: bool,
    pub extract: bool,
    pub cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<CommandUri>,
    pub shell: bool,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub command: CommandInfo,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Launch descriptor for one task, bound to the agent of the offer it uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorInfo>,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    TaskStaging,
    TaskStarting,
    TaskRunning,
    TaskKilling,
    TaskFinished,
    TaskFailed,
    TaskKilled,
    TaskError,
    TaskLost,
    TaskDropped,
    TaskUnreachable,
    TaskGone,
    TaskGoneByOperator,
    TaskUnknown,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::TaskStaging => "TASK_STAGING",
            TaskState::TaskStarting => "TASK_STARTING",
            TaskState::TaskRunning => "TASK_RUNNING",
            TaskState::TaskKilling => "TASK_KILLING",
            TaskState::TaskFinished => "TASK_FINISHED",
            TaskState::TaskFailed => "TASK_FAILED",
            TaskState::TaskKilled => "TASK_KILLED",
            TaskState::TaskError => "TASK_ERROR",
            TaskState::TaskLost => "TASK_LOST",
            TaskState::TaskDropped => "TASK_DROPPED",
            TaskState::TaskUnreachable => "TASK_UNREACHABLE",
            TaskState::TaskGone => "TASK_GONE",
            TaskState::TaskGoneByOperator => "TASK_GONE_BY_OPERATOR",
            TaskState::TaskUnknown => "TASK_UNKNOWN",
        };
        f.write_str(name)
    }
}

impl From<TaskState> for TraceState {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::TaskStaging => TraceState::TaskStaging,
            TaskState::TaskStarting => TraceState::TaskStarting,
            TaskState::TaskRunning => TraceState::TaskRunning,
            TaskState::TaskKilling => TraceState::TaskKilling,
            TaskState::TaskFinished => TraceState::TaskFinished,
            TaskState::TaskFailed => TraceState::TaskFailed,
            TaskState::TaskKilled => TraceState::TaskKilled,
            TaskState::TaskError => TraceState::TaskError,
            TaskState::TaskLost => TraceState::TaskLost,
            TaskState::TaskDropped => TraceState::TaskDropped,
            TaskState::TaskUnreachable => TraceState::TaskUnreachable,
            TaskState::TaskGone => TraceState::TaskGone,
            TaskState::TaskGoneByOperator => TraceState::TaskGoneByOperator,
            TaskState::TaskUnknown => TraceState::TaskUnknown,
        }
    }
}

/// Status of one task as reported by (or reconciled with) the master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,
    /// Present when the update must be acknowledged
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskStatus {
    pub fn new(task_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            task_id: TaskId::new(task_id),
            state,
            message: None,
            agent_id: None,
            executor_id: None,
            uuid: None,
            reason: None,
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(AgentId::new(agent_id));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_uuid(mut self, uuid: Vec<u8>) -> Self {
        self.uuid = Some(uuid);
        self
    }
}

/// Event delivered to the scheduler, decoded from the subscription stream
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Registered or re-registered with the master
    Subscribed {
        framework_id: FrameworkId,
        /// `http://host:port` of the master that accepted the subscription
        master: Option<String>,
    },
    Offers(Vec<Offer>),
    Rescind(OfferId),
    Update(TaskStatus),
    AgentLost(AgentId),
    ExecutorLost {
        executor_id: ExecutorId,
        agent_id: AgentId,
        status: Option<i32>,
    },
    Message {
        agent_id: AgentId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    Error(String),
    Heartbeat,
    /// The subscription stream ended; the driver is reconnecting
    Disconnected,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    port: u32,
}

#[derive(Debug, Deserialize)]
struct MasterInfo {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    port: Option<u32>,
    #[serde(default)]
    address: Option<Address>,
}

impl MasterInfo {
    fn url(&self) -> Option<String> {
        if let Some(address) = &self.address {
            let host = address.hostname.as_ref().or(address.ip.as_ref())?;
            return Some(format!("http://{}:{}", host, address.port));
        }
        match (&self.hostname, self.port) {
            (Some(host), Some(port)) => Some(format!("http://{}:{}", host, port)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubscribedBody {
    framework_id: FrameworkId,
    #[serde(default)]
    master_info: Option<MasterInfo>,
}

#[derive(Debug, Deserialize)]
struct OffersBody {
    #[serde(default)]
    offers: Vec<Offer>,
}

#[derive(Debug, Deserialize)]
struct RescindBody {
    offer_id: OfferId,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    agent_id: AgentId,
    executor_id: ExecutorId,
    #[serde(default, with = "base64_bytes")]
    data: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct FailureBody {
    #[serde(default)]
    agent_id: Option<AgentId>,
    #[serde(default)]
    executor_id: Option<ExecutorId>,
    #[serde(default)]
    status: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum RawEvent {
    Subscribed { subscribed: SubscribedBody },
    Offers { offers: OffersBody },
    Rescind { rescind: RescindBody },
    Update { update: UpdateBody },
    Message { message: MessageBody },
    Failure { failure: FailureBody },
    Error { error: ErrorBody },
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl SchedulerEvent {
    /// Decode one RecordIO record. Event types the scheduler does not
    /// handle decode to `None`.
    pub fn decode(record: &[u8]) -> Result<Option<Self>> {
        let raw: RawEvent = serde_json::from_slice(record)
            .map_err(|e| MesosError::decode_error("scheduler event", e.to_string()))?;

        let event = match raw {
            RawEvent::Subscribed { subscribed } => Some(SchedulerEvent::Subscribed {
                framework_id: subscribed.framework_id,
                master: subscribed.master_info.as_ref().and_then(MasterInfo::url),
            }),
            RawEvent::Offers { offers } => Some(SchedulerEvent::Offers(offers.offers)),
            RawEvent::Rescind { rescind } => Some(SchedulerEvent::Rescind(rescind.offer_id)),
            RawEvent::Update { update } => Some(SchedulerEvent::Update(update.status)),
            RawEvent::Message { message } => Some(SchedulerEvent::Message {
                agent_id: message.agent_id,
                executor_id: message.executor_id,
                data: message.data.unwrap_or_default(),
            }),
            RawEvent::Failure { failure } => match (failure.executor_id, failure.agent_id) {
                (Some(executor_id), agent_id) => Some(SchedulerEvent::ExecutorLost {
                    executor_id,
                    agent_id: agent_id.unwrap_or_default(),
                    status: failure.status,
                }),
                (None, Some(agent_id)) => Some(SchedulerEvent::AgentLost(agent_id)),
                (None, None) => None,
            },
            RawEvent::Error { error } => Some(SchedulerEvent::Error(error.message)),
            RawEvent::Heartbeat => Some(SchedulerEvent::Heartbeat),
            RawEvent::Unknown => None,
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_offers() {
        let record = br#"{
            "type": "OFFERS",
            "offers": {"offers": [{
                "id": {"value": "o1"},
                "framework_id": {"value": "fw"},
                "agent_id": {"value": "S0"},
                "hostname": "host0",
                "resources": [
                    {"name": "cpus", "type": "SCALAR", "scalar": {"value": 4.0}, "role": "*"},
                    {"name": "mem", "type": "SCALAR", "scalar": {"value": 1024.0}},
                    {"name": "ports", "type": "RANGES", "ranges": {"range": [{"begin": 31000, "end": 32000}]}}
                ]
            }]}
        }"#;

        let event = SchedulerEvent::decode(record).unwrap().unwrap();
        let SchedulerEvent::Offers(offers) = event else {
            panic!("expected offers, got {:?}", event);
        };
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].agent_id.as_str(), "S0");
        assert_eq!(offers[0].scalar("cpus"), 4.0);
        assert_eq!(offers[0].scalar("mem"), 1024.0);
        assert_eq!(offers[0].scalar("disk"), 0.0);
    }

    #[test]
    fn test_decode_update_with_uuid() {
        let record = br#"{
            "type": "UPDATE",
            "update": {"status": {
                "task_id": {"value": "job@-@0@-@READY@-@S0@-@u1"},
                "state": "TASK_RUNNING",
                "message": "BEGIN",
                "agent_id": {"value": "S0"},
                "uuid": "AQID"
            }}
        }"#;

        let event = SchedulerEvent::decode(record).unwrap().unwrap();
        let SchedulerEvent::Update(status) = event else {
            panic!("expected update, got {:?}", event);
        };
        assert_eq!(status.state, TaskState::TaskRunning);
        assert_eq!(status.message.as_deref(), Some("BEGIN"));
        assert_eq!(status.uuid, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_decode_subscribed_master_address() {
        let record = br#"{
            "type": "SUBSCRIBED",
            "subscribed": {
                "framework_id": {"value": "fw-1"},
                "heartbeat_interval_seconds": 15,
                "master_info": {
                    "id": "m", "ip": 16777343, "port": 5050,
                    "address": {"hostname": "master.local", "ip": "127.0.0.1", "port": 5050}
                }
            }
        }"#;

        let event = SchedulerEvent::decode(record).unwrap().unwrap();
        assert_eq!(
            event,
            SchedulerEvent::Subscribed {
                framework_id: FrameworkId::new("fw-1"),
                master: Some("http://master.local:5050".to_string()),
            }
        );
    }

    #[test]
    fn test_decode_failure_variants() {
        let agent_lost = br#"{"type": "FAILURE", "failure": {"agent_id": {"value": "S1"}}}"#;
        assert_eq!(
            SchedulerEvent::decode(agent_lost).unwrap(),
            Some(SchedulerEvent::AgentLost(AgentId::new("S1")))
        );

        let executor_lost = br#"{"type": "FAILURE", "failure": {
            "agent_id": {"value": "S1"}, "executor_id": {"value": "app@-@S1"}, "status": 137}}"#;
        assert!(matches!(
            SchedulerEvent::decode(executor_lost).unwrap(),
            Some(SchedulerEvent::ExecutorLost { status: Some(137), .. })
        ));
    }

    #[test]
    fn test_unknown_event_type_is_skipped() {
        let record = br#"{"type": "INVERSE_OFFERS", "inverse_offers": {}}"#;
        assert_eq!(SchedulerEvent::decode(record).unwrap(), None);
        assert!(SchedulerEvent::decode(b"not json").is_err());
    }

    #[test]
    fn test_task_info_data_is_base64() {
        let info = TaskInfo {
            name: "t".to_string(),
            task_id: TaskId::new("t1"),
            agent_id: AgentId::new("S0"),
            resources: vec![Resource::scalar("cpus", 1.0)],
            command: None,
            executor: None,
            data: Some(b"{}".to_vec()),
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["data"], "e30=");
        assert!(json.get("command").is_none());
        assert_eq!(json["resources"][0]["type"], "SCALAR");
    }

    #[test]
    fn test_task_state_to_trace_state() {
        assert_eq!(
            TraceState::from(TaskState::TaskGoneByOperator),
            TraceState::TaskGoneByOperator
        );
        assert_eq!(TaskState::TaskLost.to_string(), "TASK_LOST");
    }
}

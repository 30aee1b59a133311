//! Wire protocol for agent and dashboard WebSocket connections.
//!
//! Every frame is a MessagePack map `{ "type": <tag>, "data": <payload> }`
//! carried in a binary WebSocket message. Both directions use the same
//! envelope. Inbound frames are decoded into closed sum types
//! ([`AgentFrame`], [`MonitorCommand`]) and outbound pushes are built from
//! [`ServerMessage`].

use serde::{Deserialize, Serialize};

use crate::types::DbId;

// ---------------------------------------------------------------------------
// Message type tags
// ---------------------------------------------------------------------------

/// Agent -> server: periodic telemetry sample.
pub const MSG_TYPE_METRICS: &str = "metrics";
/// Agent -> server: VM metadata, persisted verbatim.
pub const MSG_TYPE_VM_INFO: &str = "vm_info";
/// User -> server: subscribe to live metrics for VMs or a page.
pub const MSG_TYPE_START_MONITOR: &str = "startMonitor";
/// User -> server: drop some or all subscriptions.
pub const MSG_TYPE_STOP_MONITOR: &str = "stopMonitor";
/// User -> server: one-shot historical metrics query.
pub const MSG_TYPE_GET_MONITOR_METRICS: &str = "getMonitorMetrics";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A frame that could not be turned into a known message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

/// Untyped envelope; `data` is resolved once the tag is known.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl RawFrame {
    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    data: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Encode an arbitrary `{type, data}` frame.
///
/// The server uses [`ServerMessage::encode`]; this is the generic form used
/// by agents and dashboard clients.
pub fn encode_frame<T: Serialize>(kind: &str, data: &T) -> Result<Vec<u8>, ProtocolError> {
    #[derive(Serialize)]
    struct Envelope<'a, T> {
        #[serde(rename = "type")]
        kind: &'a str,
        data: &'a T,
    }

    Ok(rmp_serde::to_vec_named(&Envelope { kind, data })?)
}

// ---------------------------------------------------------------------------
// Agent -> server
// ---------------------------------------------------------------------------

/// Telemetry sample as reported by an agent.
///
/// Numbers are accepted as either integers or floats; missing sections
/// default to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentMetrics {
    /// Seconds since the VM booted.
    pub uptime: f64,
    pub system: SystemStats,
    pub network: NetworkStats,
    pub disk: DiskStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemStats {
    /// CPU usage percentage (0-100).
    pub cpu_usage: f64,
    pub memory_used: f64,
    pub memory_total: f64,
    pub swap_used: f64,
    pub swap_total: f64,
    pub process_count: f64,
    pub load_avg: LoadAvg,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkStats {
    /// Outbound bytes.
    pub upload_traffic: f64,
    /// Inbound bytes.
    pub download_traffic: f64,
    pub tcp_count: f64,
    pub udp_count: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskStats {
    pub space_used: f64,
    pub space_total: f64,
    pub read: f64,
    pub write: f64,
}

/// A decoded frame received on an agent connection.
#[derive(Debug, Clone)]
pub enum AgentFrame {
    Metrics(AgentMetrics),
    /// Free-form metadata object, stored as-is on the VM record.
    VmInfo(serde_json::Value),
}

impl AgentFrame {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw = RawFrame::decode(bytes)?;
        match raw.kind.as_str() {
            MSG_TYPE_METRICS => payload(MSG_TYPE_METRICS, raw.data).map(Self::Metrics),
            MSG_TYPE_VM_INFO => {
                if !raw.data.is_object() {
                    return Err(ProtocolError::InvalidPayload {
                        kind: MSG_TYPE_VM_INFO,
                        reason: "expected a map".to_string(),
                    });
                }
                Ok(Self::VmInfo(raw.data))
            }
            _ => Err(ProtocolError::UnknownType(raw.kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// User -> server
// ---------------------------------------------------------------------------

/// What a `startMonitor` command subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MonitorTarget {
    VmIds {
        #[serde(rename = "vmIds")]
        vm_ids: Vec<DbId>,
    },
    Page {
        #[serde(rename = "pageId")]
        page_id: DbId,
    },
}

/// Payload of `getMonitorMetrics`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRequest {
    pub vm_ids: Vec<DbId>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl MetricsRequest {
    /// The row cap to apply. `None` returns the full retained history.
    pub fn effective_limit(&self) -> Option<i64> {
        self.limit.map(|limit| limit.max(1))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopMonitorPayload {
    #[serde(default)]
    vm_ids: Option<Vec<DbId>>,
}

/// A decoded command received on a dashboard connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    StartMonitor(MonitorTarget),
    /// `None` drops every subscription held by the connection.
    StopMonitor(Option<Vec<DbId>>),
    GetMonitorMetrics(MetricsRequest),
}

impl MonitorCommand {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw = RawFrame::decode(bytes)?;
        match raw.kind.as_str() {
            MSG_TYPE_START_MONITOR => {
                payload(MSG_TYPE_START_MONITOR, raw.data).map(Self::StartMonitor)
            }
            MSG_TYPE_STOP_MONITOR => {
                if raw.data.is_null() {
                    return Ok(Self::StopMonitor(None));
                }
                let p: StopMonitorPayload = payload(MSG_TYPE_STOP_MONITOR, raw.data)?;
                Ok(Self::StopMonitor(p.vm_ids))
            }
            MSG_TYPE_GET_MONITOR_METRICS => {
                payload(MSG_TYPE_GET_MONITOR_METRICS, raw.data).map(Self::GetMonitorMetrics)
            }
            _ => Err(ProtocolError::UnknownType(raw.kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Server -> user: acknowledges `startMonitor`.
pub const MSG_TYPE_MONITORING: &str = "monitoring";
/// Server -> user: one sample pushed to subscribers.
pub const MSG_TYPE_LIVE_METRICS: &str = "liveMetrics";
/// Server -> user: reply to `getMonitorMetrics`.
pub const MSG_TYPE_MONITOR_METRICS: &str = "monitorMetrics";
/// Server -> agent or user: per-message failure.
pub const MSG_TYPE_ERROR: &str = "error";

/// Frames pushed by the server. `M` is the persisted metrics row type.
#[derive(Debug)]
pub enum ServerMessage<M> {
    /// Acknowledges `startMonitor` with the resolved VM ids.
    Monitoring { vm_ids: Vec<DbId> },
    LiveMetrics { vm_id: DbId, metrics: M },
    MonitorMetrics(Vec<M>),
    Error { message: String },
}

#[derive(Serialize)]
struct VmIdsPayload<'a> {
    #[serde(rename = "vmIds")]
    vm_ids: &'a [DbId],
}

#[derive(Serialize)]
struct LiveMetricsPayload<'a, M> {
    #[serde(rename = "vmId")]
    vm_id: DbId,
    metrics: &'a M,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    message: &'a str,
}

impl<M: Serialize> ServerMessage<M> {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Monitoring { vm_ids } => {
                encode_frame(MSG_TYPE_MONITORING, &VmIdsPayload { vm_ids })
            }
            Self::LiveMetrics { vm_id, metrics } => encode_frame(
                MSG_TYPE_LIVE_METRICS,
                &LiveMetricsPayload {
                    vm_id: *vm_id,
                    metrics,
                },
            ),
            Self::MonitorMetrics(rows) => encode_frame(MSG_TYPE_MONITOR_METRICS, rows),
            Self::Error { message } => encode_frame(MSG_TYPE_ERROR, &ErrorPayload { message }),
        }
    }
}

/// Encode an `error` frame.
pub fn error_frame(message: impl Into<String>) -> Result<Vec<u8>, ProtocolError> {
    ServerMessage::<()>::Error {
        message: message.into(),
    }
    .encode()
}

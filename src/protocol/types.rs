//! Gateway protocol types
//!
//! Handshake and error shapes carried inside frames.

use serde::{Deserialize, Serialize};

/// Error shape carried in failed responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Machine-readable code, see [`crate::protocol::error_codes`]
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorShape {
    /// Create a new error shape
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorShape {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Parameters of the initial `connect` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version the client speaks
    pub min_protocol: u32,
    /// Highest protocol version the client speaks
    pub max_protocol: u32,
    /// Client identity metadata
    pub client: ClientInfo,
    /// Requested role (`operator` or `node`)
    pub role: String,
    /// Requested scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Capability flags
    #[serde(default)]
    pub caps: Vec<String>,
    /// Credentials, when the deployment requires them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthParams>,
    /// BCP 47 locale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Free-form user agent string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Client identity block of the connect request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Stable client identifier, e.g. `opengate-cli`
    pub id: String,
    /// Client version
    pub version: String,
    /// Platform, e.g. `linux`, `browser`
    pub platform: String,
    /// Connection mode, e.g. `operator`
    pub mode: String,
    /// Instance identifier distinguishing multiple copies of one client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Credentials block of the connect request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthParams {
    /// Bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shared password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Handshake success payload, delivered as the `payload` of the `res`
/// frame answering `connect`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    /// Negotiated protocol version
    pub protocol: u32,
    /// Server identity
    pub server: ServerInfo,
    /// Methods and events this server supports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
    /// Full-state snapshot for (re)synchronization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<GatewaySnapshot>,
    /// Granted auth metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,
    /// Connection policy limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
}

/// Server identity block of hello-ok
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server version
    pub version: String,
    /// Build commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Hostname
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Server-assigned connection ID
    pub conn_id: String,
}

/// Advertised server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    /// Registered method names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Known event names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

/// Granted auth metadata in hello-ok
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAuth {
    /// Token the client may present on future connects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    /// Granted role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Granted scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Issue timestamp, epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at_ms: Option<u64>,
}

/// Connection policy limits in hello-ok
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Maximum frame payload in bytes
    pub max_payload: usize,
    /// Maximum buffered outbound bytes before disconnect
    pub max_buffered_bytes: usize,
    /// Interval between tick events in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            max_payload: super::MAX_PAYLOAD_BYTES,
            max_buffered_bytes: super::MAX_BUFFERED_BYTES,
            tick_interval_ms: super::TICK_INTERVAL_MS,
        }
    }
}

/// Per-domain monotonic version counters.
///
/// Consumers compare these against the versions stamped on later events to
/// tell whether an event stream has been superseded by a newer snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
    /// Presence domain version
    pub presence: u64,
    /// Health domain version
    pub health: u64,
}

/// Full-state snapshot delivered at handshake completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySnapshot {
    /// Currently connected clients
    #[serde(default)]
    pub presence: Vec<PresenceEntry>,
    /// Opaque health blob
    #[serde(default)]
    pub health: serde_json::Value,
    /// Version counters matching this snapshot
    #[serde(default)]
    pub state_version: StateVersion,
    /// Server uptime in milliseconds
    #[serde(default)]
    pub uptime_ms: u64,
    /// Auth mode the server is running in
    #[serde(default)]
    pub auth_mode: String,
}

/// One connected client in the presence list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// Server-assigned connection ID
    pub conn_id: String,
    /// Client identifier from the handshake
    pub client_id: String,
    /// Client platform
    pub platform: String,
    /// Granted role
    pub role: String,
    /// Connect timestamp, epoch milliseconds
    pub connected_at_ms: i64,
}

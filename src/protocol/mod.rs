//! Gateway wire protocol
//!
//! The gateway speaks JSON frames over a single ordered, reliable text
//! transport (WebSocket in production). Three frame kinds exist on the
//! wire, discriminated by a `type` field:
//!
//! - `req`   — client → server RPC call
//! - `res`   — server → client RPC result, correlated by `id`
//! - `event` — server → client push, sequenced per connection
//!
//! The `hello-ok` handshake payload travels as the `payload` of the `res`
//! frame answering the initial `connect` request. The reserved event
//! `connect.challenge` is pushed by the server right after the transport
//! opens and is never sequenced.

pub mod frame;
pub mod types;

pub use frame::{decode, encode, EventFrame, Frame, RequestFrame, ResponseFrame};
pub use types::{
    AuthParams, ClientInfo, ConnectParams, ErrorShape, Features, GatewaySnapshot, HelloAuth,
    HelloOk, Policy, PresenceEntry, ServerInfo, StateVersion,
};

/// Protocol version spoken by this crate (min and max of the supported
/// range in the `connect` request).
pub const PROTOCOL_VERSION: u32 = 3;

/// Close code sent when the client abandons a rejected handshake.
///
/// Participates in normal backoff reconnection; it is not a ban signal.
pub const CLOSE_CONNECT_FAILED: u16 = 4008;

/// Maximum accepted frame payload, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 524_288;

/// Maximum bytes buffered per connection before the server disconnects it.
pub const MAX_BUFFERED_BYTES: usize = 1_572_864;

/// Interval between server `tick` events.
pub const TICK_INTERVAL_MS: u64 = 30_000;

/// How long the server waits for the `connect` request after accepting a
/// socket, and how long the client waits for the `connect` response.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Reserved and well-known event names.
pub mod events {
    /// Auth challenge pushed by the server after transport open (unsequenced)
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
    /// Periodic liveness event
    pub const TICK: &str = "tick";
    /// Presence list changed
    pub const PRESENCE: &str = "presence";
    /// Health blob changed
    pub const HEALTH: &str = "health";
    /// Server is shutting down
    pub const SHUTDOWN: &str = "shutdown";
}

/// Standard error codes carried in `res` error shapes.
pub mod error_codes {
    /// Authentication failed during handshake
    pub const BAD_AUTH: &str = "bad_auth";
    /// Handshake malformed or protocol range unsupported
    pub const BAD_HANDSHAKE: &str = "bad_handshake";
    /// Method name not registered
    pub const UNKNOWN_METHOD: &str = "unknown_method";
    /// Parameters failed validation
    pub const INVALID_PARAMS: &str = "invalid_params";
    /// Caller lacks the required role or scope
    pub const FORBIDDEN: &str = "forbidden";
    /// Frame exceeded the payload policy
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    /// Server-side failure
    pub const INTERNAL: &str = "internal";
    /// Server-side handler timed out
    pub const TIMEOUT: &str = "timeout";
}

/// Client roles requested at connect time.
pub mod roles {
    /// Human operator (web UI, CLI)
    pub const OPERATOR: &str = "operator";
    /// Automation node (channel bridge, worker)
    pub const NODE: &str = "node";
}

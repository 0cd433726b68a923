//! Frame codec
//!
//! Serializes and deserializes the gateway's wire frames. Decoding is
//! deliberately tolerant at the call site: the engine drops frames that
//! fail to decode (malformed JSON, missing or unknown `type`) instead of
//! surfacing an error, so a client stays connected through transient
//! server bugs.

use serde::{Deserialize, Serialize};

use super::types::{ErrorShape, StateVersion};
use crate::error::{Error, Result};

/// Top-level wire frame, discriminated by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client → server RPC call
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Server → client RPC result
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Server → client push
    #[serde(rename = "event")]
    Event(EventFrame),
}

/// RPC request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Unique request ID (never reused while pending)
    pub id: String,
    /// Method name, e.g. `cron.add`
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// RPC response frame, correlated to a request by `id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Request ID this responds to
    pub id: String,
    /// Whether the call succeeded
    pub ok: bool,
    /// Result payload (success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Error shape (failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Server-push event frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name, e.g. `presence` or `connect.challenge`
    pub event: String,
    /// Event payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Per-connection monotonic sequence number; absent on unsequenced
    /// events such as the challenge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Per-domain state version counters, when the event supersedes state
    #[serde(rename = "stateVersion", skip_serializing_if = "Option::is_none")]
    pub state_version: Option<StateVersion>,
}

impl RequestFrame {
    /// Create a request frame
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        RequestFrame {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl ResponseFrame {
    /// Create a success response
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        ResponseFrame {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create an error response
    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        ResponseFrame {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

impl EventFrame {
    /// Create a sequenced event
    pub fn new(event: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        EventFrame {
            event: event.into(),
            payload: Some(payload),
            seq: Some(seq),
            state_version: None,
        }
    }

    /// Create an unsequenced event (e.g. the connect challenge)
    pub fn unsequenced(event: impl Into<String>, payload: serde_json::Value) -> Self {
        EventFrame {
            event: event.into(),
            payload: Some(payload),
            seq: None,
            state_version: None,
        }
    }

    /// Attach state-version counters
    pub fn with_state_version(mut self, version: StateVersion) -> Self {
        self.state_version = Some(version);
        self
    }
}

/// Decode one transport text message into a frame.
///
/// Fails on malformed JSON, a missing `type`, or an unknown `type`; the
/// caller decides whether to drop or report.
pub fn decode(raw: &str) -> Result<Frame> {
    serde_json::from_str(raw).map_err(Error::from)
}

/// Encode a frame into one transport text message
pub fn encode(frame: &Frame) -> Result<String> {
    serde_json::to_string(frame).map_err(Error::from)
}

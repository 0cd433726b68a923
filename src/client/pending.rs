//! Pending-request table
//!
//! Correlates outstanding RPC calls with their responses. The table is
//! single-owner state confined to the engine's connection task, so it
//! needs no lock. Each entry holds the caller's continuation and an
//! abortable timeout timer; an entry is removed by exactly one of:
//! a matching response, its timeout firing, or a flush on disconnect.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::protocol::ErrorShape;

/// Default request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Continuation type resolved when a response arrives
pub type PendingReply = oneshot::Sender<crate::error::Result<serde_json::Value>>;

struct PendingRequest {
    method: String,
    reply: PendingReply,
    timeout: JoinHandle<()>,
}

/// Map of in-flight request IDs to waiting callers
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<String, PendingRequest>,
}

impl PendingTable {
    /// Create an empty table
    pub fn new() -> Self {
        PendingTable {
            entries: HashMap::new(),
        }
    }

    /// Generate a request ID. UUIDv4, unique for the lifetime of the
    /// process; at most one entry per ID can ever be pending.
    pub fn next_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Fallback ID generator (random base36), kept for environments where
    /// UUID generation is undesirable
    pub fn next_id_base36() -> String {
        use rand::Rng;
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::rng();
        (0..16)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// Register an in-flight request together with its timeout handle
    pub fn insert(&mut self, id: String, method: String, reply: PendingReply, timeout: JoinHandle<()>) {
        debug_assert!(!self.entries.contains_key(&id));
        self.entries.insert(
            id,
            PendingRequest {
                method,
                reply,
                timeout,
            },
        );
    }

    /// Resolve an entry from a `res` frame. Unknown, duplicate or late
    /// IDs are a no-op. Returns whether an entry was consumed.
    pub fn resolve(
        &mut self,
        id: &str,
        ok: bool,
        payload: Option<serde_json::Value>,
        error: Option<ErrorShape>,
    ) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        entry.timeout.abort();
        let outcome = if ok {
            Ok(payload.unwrap_or(serde_json::Value::Null))
        } else {
            let shape = error.unwrap_or_else(|| {
                ErrorShape::new(crate::protocol::error_codes::INTERNAL, "request failed")
            });
            Err(Error::Request {
                code: shape.code,
                message: shape.message,
                details: shape.details,
            })
        };
        let _ = entry.reply.send(outcome);
        true
    }

    /// Fail one entry with a local timeout. No-op when the entry already
    /// resolved (a stale timer firing is indistinguishable from a race).
    pub fn fail_timeout(&mut self, id: &str, timeout_ms: u64) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        let _ = entry.reply.send(Err(Error::Timeout(format!(
            "request '{}' timed out after {}ms",
            entry.method, timeout_ms
        ))));
        true
    }

    /// Reject every pending entry with the given reason and clear the
    /// table. The only path by which a request fails due to disconnection.
    pub fn flush(&mut self, reason: &str) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.timeout.abort();
            let _ = entry.reply.send(Err(Error::Closed(reason.to_string())));
        }
        count
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an ID is currently pending
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }
}

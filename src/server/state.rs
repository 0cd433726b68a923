//! Shared gateway state
//!
//! One [`GatewayState`] per server: the session table, the broadcast
//! bus carrying unsequenced events to every connection task (each task
//! stamps its own per-connection `seq` when forwarding), and the
//! monotonic state-version counters bumped whenever presence or health
//! changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::protocol::{events, AuthParams, GatewaySnapshot, StateVersion};
use crate::server::methods::MethodRegistry;
use crate::server::session::SessionEntry;

/// How connections must authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Accept every connection
    #[default]
    None,
    /// Require a token from the configured set
    Token,
    /// Require the shared password
    Password,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Token => "token",
            AuthMode::Password => "password",
        }
    }
}

/// Server-side auth material
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub mode: AuthMode,
    pub tokens: Vec<SecretString>,
    pub password: Option<SecretString>,
}

impl AuthSettings {
    /// Check handshake credentials against the configured mode.
    /// Returns the wire error code on rejection.
    pub fn verify(&self, auth: Option<&AuthParams>) -> std::result::Result<(), &'static str> {
        match self.mode {
            AuthMode::None => Ok(()),
            AuthMode::Token => {
                let presented = auth.and_then(|a| a.token.as_deref());
                match presented {
                    Some(token)
                        if self
                            .tokens
                            .iter()
                            .any(|t| t.expose_secret() == token) =>
                    {
                        Ok(())
                    }
                    _ => Err(crate::protocol::error_codes::BAD_AUTH),
                }
            }
            AuthMode::Password => {
                let presented = auth.and_then(|a| a.password.as_deref());
                match (presented, &self.password) {
                    (Some(given), Some(expected)) if given == expected.expose_secret() => Ok(()),
                    _ => Err(crate::protocol::error_codes::BAD_AUTH),
                }
            }
        }
    }
}

/// One fan-out item on the broadcast bus. Sequencing is deliberately
/// absent here; each connection task numbers its own stream.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub event: String,
    pub payload: Value,
    pub state_version: Option<StateVersion>,
}

pub struct GatewayState {
    auth: AuthSettings,
    methods: MethodRegistry,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    bus: broadcast::Sender<Broadcast>,
    presence_version: AtomicU64,
    health_version: AtomicU64,
    started: Instant,
    tick_interval: Duration,
}

impl GatewayState {
    pub fn new(auth: AuthSettings, methods: MethodRegistry) -> Self {
        Self::with_tick_interval(
            auth,
            methods,
            Duration::from_millis(crate::protocol::TICK_INTERVAL_MS),
        )
    }

    pub fn with_tick_interval(
        auth: AuthSettings,
        methods: MethodRegistry,
        tick_interval: Duration,
    ) -> Self {
        let (bus, _) = broadcast::channel(1024);
        GatewayState {
            auth,
            methods,
            sessions: RwLock::new(HashMap::new()),
            bus,
            presence_version: AtomicU64::new(0),
            health_version: AtomicU64::new(0),
            started: Instant::now(),
            tick_interval,
        }
    }

    pub fn auth(&self) -> &AuthSettings {
        &self.auth
    }

    /// How often connection tasks emit the sequenced tick event
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn state_version(&self) -> StateVersion {
        StateVersion {
            presence: self.presence_version.load(Ordering::SeqCst),
            health: self.health_version.load(Ordering::SeqCst),
        }
    }

    /// Subscribe to the fan-out bus. Connection tasks subscribe before
    /// sending hello-ok so nothing published after the snapshot is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.bus.subscribe()
    }

    /// Publish an application event to every connection
    pub fn publish(&self, event: impl Into<String>, payload: Value) {
        let _ = self.bus.send(Broadcast {
            event: event.into(),
            payload,
            state_version: None,
        });
    }

    /// Publish a health change, bumping the health version
    pub fn publish_health(&self, payload: Value) {
        self.health_version.fetch_add(1, Ordering::SeqCst);
        let _ = self.bus.send(Broadcast {
            event: events::HEALTH.to_string(),
            payload,
            state_version: Some(self.state_version()),
        });
    }

    /// Add a session to the table and announce the new presence list
    pub async fn register_session(&self, entry: SessionEntry) {
        let conn_id = entry.conn_id.clone();
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(conn_id.clone(), entry);
        }
        debug!(%conn_id, "session registered");
        self.announce_presence().await;
    }

    /// Drop a session and announce the new presence list. Idempotent.
    pub async fn remove_session(&self, conn_id: &str) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(conn_id).is_some()
        };
        if removed {
            debug!(%conn_id, "session removed");
            self.announce_presence().await;
        }
    }

    pub async fn session(&self, conn_id: &str) -> Option<SessionEntry> {
        self.sessions.read().await.get(conn_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Full-state payload delivered inside hello-ok
    pub async fn snapshot(&self) -> GatewaySnapshot {
        let sessions = self.sessions.read().await;
        let mut presence: Vec<_> = sessions.values().map(|s| s.to_presence()).collect();
        presence.sort_by(|a, b| a.connected_at_ms.cmp(&b.connected_at_ms));
        GatewaySnapshot {
            presence,
            health: json!({ "ok": true }),
            state_version: self.state_version(),
            uptime_ms: self.uptime_ms(),
            auth_mode: self.auth.mode.as_str().to_string(),
        }
    }

    async fn announce_presence(&self) {
        self.presence_version.fetch_add(1, Ordering::SeqCst);
        let sessions = self.sessions.read().await;
        let list: Vec<_> = sessions.values().map(|s| s.to_presence()).collect();
        drop(sessions);
        let _ = self.bus.send(Broadcast {
            event: events::PRESENCE.to_string(),
            payload: json!({ "sessions": list }),
            state_version: Some(self.state_version()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientInfo;

    fn entry(conn_id: &str) -> SessionEntry {
        SessionEntry::new(
            conn_id.to_string(),
            ClientInfo {
                id: "test".to_string(),
                version: "0.0.0".to_string(),
                platform: "linux".to_string(),
                mode: "operator".to_string(),
                instance_id: None,
            },
            "operator".to_string(),
            vec![],
        )
    }

    #[test]
    fn test_auth_none_accepts_anything() {
        let auth = AuthSettings::default();
        assert!(auth.verify(None).is_ok());
    }

    #[test]
    fn test_auth_token_matches_configured_set() {
        let auth = AuthSettings {
            mode: AuthMode::Token,
            tokens: vec![SecretString::from("t-1"), SecretString::from("t-2")],
            password: None,
        };
        let good = AuthParams {
            token: Some("t-2".to_string()),
            password: None,
        };
        let bad = AuthParams {
            token: Some("t-3".to_string()),
            password: None,
        };
        assert!(auth.verify(Some(&good)).is_ok());
        assert_eq!(auth.verify(Some(&bad)), Err("bad_auth"));
        assert_eq!(auth.verify(None), Err("bad_auth"));
    }

    #[test]
    fn test_auth_password() {
        let auth = AuthSettings {
            mode: AuthMode::Password,
            tokens: vec![],
            password: Some(SecretString::from("hunter2")),
        };
        let good = AuthParams {
            token: None,
            password: Some("hunter2".to_string()),
        };
        assert!(auth.verify(Some(&good)).is_ok());
        assert_eq!(auth.verify(None), Err("bad_auth"));
    }

    #[tokio::test]
    async fn test_register_bumps_presence_version_and_broadcasts() {
        let state = GatewayState::new(AuthSettings::default(), MethodRegistry::new());
        let mut bus = state.subscribe();
        state.register_session(entry("a")).await;
        state.register_session(entry("b")).await;
        assert_eq!(state.session_count().await, 2);
        assert_eq!(state.state_version().presence, 2);

        let first = bus.recv().await.unwrap();
        assert_eq!(first.event, "presence");
        assert_eq!(first.state_version.unwrap().presence, 1);

        state.remove_session("a").await;
        // Removing an unknown session announces nothing
        state.remove_session("a").await;
        assert_eq!(state.session_count().await, 1);
        assert_eq!(state.state_version().presence, 3);
    }

    #[tokio::test]
    async fn test_snapshot_orders_presence_by_connect_time() {
        let state = GatewayState::new(AuthSettings::default(), MethodRegistry::new());
        let mut a = entry("a");
        let mut b = entry("b");
        a.connected_at_ms = 200;
        b.connected_at_ms = 100;
        state.register_session(a).await;
        state.register_session(b).await;
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.presence[0].conn_id, "b");
        assert_eq!(snapshot.presence[1].conn_id, "a");
        assert_eq!(snapshot.auth_mode, "none");
    }
}

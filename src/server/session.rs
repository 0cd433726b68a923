//! Connected-session records

use chrono::Utc;

use crate::protocol::{ClientInfo, PresenceEntry};

/// One authenticated connection, as tracked in the gateway's session table
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Server-assigned connection ID, unique per accepted socket
    pub conn_id: String,
    /// Client identity from the handshake
    pub client: ClientInfo,
    /// Role granted to this session
    pub role: String,
    /// Scopes requested in the handshake
    pub scopes: Vec<String>,
    /// Wall-clock accept time
    pub connected_at_ms: i64,
}

impl SessionEntry {
    pub fn new(conn_id: String, client: ClientInfo, role: String, scopes: Vec<String>) -> Self {
        SessionEntry {
            conn_id,
            client,
            role,
            scopes,
            connected_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Presence-list representation sent to clients
    pub fn to_presence(&self) -> PresenceEntry {
        PresenceEntry {
            conn_id: self.conn_id.clone(),
            client_id: self.client.id.clone(),
            platform: self.client.platform.clone(),
            role: self.role.clone(),
            connected_at_ms: self.connected_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_projection() {
        let entry = SessionEntry::new(
            "c-9".to_string(),
            ClientInfo {
                id: "opengate".to_string(),
                version: "1.0.0".to_string(),
                platform: "linux".to_string(),
                mode: "operator".to_string(),
                instance_id: None,
            },
            "operator".to_string(),
            vec![],
        );
        let presence = entry.to_presence();
        assert_eq!(presence.conn_id, "c-9");
        assert_eq!(presence.client_id, "opengate");
        assert!(presence.connected_at_ms > 0);
    }
}

//! Configuration types

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::server::AuthMode;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway server configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Client connection configuration
    #[serde(default)]
    pub client: ClientConfig,
}

/// Gateway server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Interval between tick events
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind: default_bind(),
            port: default_port(),
            auth: AuthConfig::default(),
            tick_interval: default_tick_interval(),
        }
    }
}

impl GatewayConfig {
    /// Address string suitable for binding
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Server-side authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How connections must authenticate
    #[serde(default)]
    pub mode: AuthMode,

    /// Shared password (password mode)
    #[serde(skip_serializing, default)]
    pub password: Option<SecretString>,

    /// Accepted tokens (token mode)
    #[serde(skip_serializing, default)]
    pub tokens: Vec<SecretString>,
}

impl AuthConfig {
    /// Materialize into the server's runtime auth settings
    pub fn to_settings(&self) -> crate::server::AuthSettings {
        crate::server::AuthSettings {
            mode: self.mode,
            tokens: self.tokens.clone(),
            password: self.password.clone(),
        }
    }
}

/// Client connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway WebSocket URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Token presented in the handshake
    #[serde(skip_serializing, default)]
    pub token: Option<SecretString>,

    /// Password presented in the handshake
    #[serde(skip_serializing, default)]
    pub password: Option<SecretString>,

    /// Instance identifier sent as handshake metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Locale sent in the handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Default request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: default_url(),
            token: None,
            password: None,
            instance_id: None,
            locale: None,
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18789
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(crate::protocol::TICK_INTERVAL_MS)
}

fn default_url() -> String {
    "ws://127.0.0.1:18789/".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.listen_addr(), "127.0.0.1:18789");
        assert_eq!(config.gateway.tick_interval, Duration::from_secs(30));
        assert_eq!(config.client.url, "ws://127.0.0.1:18789/");
        assert_eq!(config.gateway.auth.mode, AuthMode::None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = json5::from_str(
            r#"{
                gateway: { port: 9000, auth: { mode: "token", tokens: ["t-1"] } },
            }"#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.bind, "127.0.0.1");
        assert_eq!(config.gateway.auth.mode, AuthMode::Token);
        assert_eq!(config.gateway.auth.tokens.len(), 1);
        assert_eq!(config.client.request_timeout, Duration::from_secs(30));
    }
}

//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use secrecy::SecretString;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json) if it exists, otherwise defaults
/// 2. Environment variable overrides
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Environment variables have the highest precedence
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().map_or(false, |ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` if present, then overlays any set variables. Precedence:
/// defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();

    // Gateway overrides
    if let Ok(bind) = std::env::var("OPENGATE_BIND") {
        config.gateway.bind = bind;
    }
    if let Ok(port) = std::env::var("OPENGATE_PORT") {
        if let Ok(port) = port.parse() {
            config.gateway.port = port;
        }
    }
    if let Ok(mode) = std::env::var("OPENGATE_AUTH_MODE") {
        if let Ok(mode) = serde_json::from_value(serde_json::Value::String(mode)) {
            config.gateway.auth.mode = mode;
        }
    }
    if let Ok(password) = std::env::var("OPENGATE_PASSWORD") {
        config.gateway.auth.password = Some(SecretString::from(password));
    }
    if let Ok(tokens) = std::env::var("OPENGATE_TOKENS") {
        config.gateway.auth.tokens = tokens
            .split(',')
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
            .collect();
    }

    // Client overrides
    if let Ok(url) = std::env::var("OPENGATE_URL") {
        config.client.url = url;
    }
    if let Ok(token) = std::env::var("OPENGATE_TOKEN") {
        config.client.token = Some(SecretString::from(token));
    }
    if let Ok(instance_id) = std::env::var("OPENGATE_INSTANCE_ID") {
        config.client.instance_id = Some(instance_id);
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_config.json");

        let config = Config::default();
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.gateway.port, config.gateway.port);
        assert_eq!(loaded.client.url, config.client.url);
    }

    #[test]
    fn test_load_toml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[gateway]\nport = 9999\n\n[client]\nurl = \"ws://example:9999/\"\n",
        )
        .unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.gateway.port, 9999);
        assert_eq!(loaded.client.url, "ws://example:9999/");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(load_config_from_path(&path).is_err());
    }
}

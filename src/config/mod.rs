//! Configuration module
//!
//! Split into focused modules:
//! - types.rs: Core configuration types (Config, GatewayConfig, ClientConfig)
//! - io.rs: Configuration loading and saving
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use types::{AuthConfig, ClientConfig, Config, GatewayConfig};

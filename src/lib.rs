//! # OpenGate
//!
//! A gateway session protocol engine built with Rust: the JSON-over-WebSocket
//! wire protocol and connection-lifecycle machinery of a multi-channel
//! agent-orchestration gateway.
//!
//! ## Features
//!
//! - **Resilient Client:** challenge-aware handshake, request correlation,
//!   event sequencing with gap detection, and exponential-backoff reconnect
//! - **Gateway Server:** challenge issuance, session table, per-connection
//!   broadcast sequencing, and pluggable method dispatch
//! - **Typed Wire Contract:** one frame codec shared by both sides

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{EngineEvent, GatewayClient, WsTransport};
pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");

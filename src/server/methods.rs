//! Method dispatch
//!
//! The seam between the protocol engine and application business logic.
//! Handlers are registered by name; the connection task dispatches each
//! `req` frame here and turns the outcome into a `res` frame. Handlers
//! see the shared state and the calling session, never the socket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::protocol::error_codes;
use crate::server::session::SessionEntry;
use crate::server::state::GatewayState;

/// One callable gateway method
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(
        &self,
        state: &GatewayState,
        session: &SessionEntry,
        params: Option<Value>,
    ) -> Result<Value>;
}

/// Adapter wrapping a synchronous function as a handler
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(&GatewayState, &SessionEntry, Option<Value>) -> Result<Value> + Send + Sync,
{
    async fn call(
        &self,
        state: &GatewayState,
        session: &SessionEntry,
        params: Option<Value>,
    ) -> Result<Value> {
        (self.0)(state, session, params)
    }
}

/// Name-to-handler table consulted for every `req` frame
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Registry with the built-in introspection methods
    pub fn new() -> Self {
        let mut registry = MethodRegistry {
            handlers: HashMap::new(),
        };
        registry.register("ping", Arc::new(FnHandler(ping)));
        registry.register("health", Arc::new(Health));
        registry.register("status", Arc::new(Status));
        registry.register("presence.list", Arc::new(PresenceList));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Registered method names, sorted, for the hello-ok features block
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up and invoke a handler. An unregistered method rejects with
    /// `unknown_method`.
    pub async fn dispatch(
        &self,
        state: &GatewayState,
        session: &SessionEntry,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let handler = self.handlers.get(method).cloned().ok_or_else(|| Error::Request {
            code: error_codes::UNKNOWN_METHOD.to_string(),
            message: format!("unknown method '{method}'"),
            details: None,
        })?;
        handler.call(state, session, params).await
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn ping(_state: &GatewayState, _session: &SessionEntry, params: Option<Value>) -> Result<Value> {
    Ok(json!({ "pong": true, "echo": params }))
}

struct Health;

#[async_trait]
impl MethodHandler for Health {
    async fn call(
        &self,
        state: &GatewayState,
        _session: &SessionEntry,
        _params: Option<Value>,
    ) -> Result<Value> {
        Ok(json!({
            "ok": true,
            "uptimeMs": state.uptime_ms(),
            "stateVersion": state.state_version(),
        }))
    }
}

struct Status;

#[async_trait]
impl MethodHandler for Status {
    async fn call(
        &self,
        state: &GatewayState,
        session: &SessionEntry,
        _params: Option<Value>,
    ) -> Result<Value> {
        Ok(json!({
            "version": crate::VERSION,
            "connId": session.conn_id,
            "role": session.role,
            "sessions": state.session_count().await,
            "uptimeMs": state.uptime_ms(),
            "authMode": state.auth().mode.as_str(),
        }))
    }
}

struct PresenceList;

#[async_trait]
impl MethodHandler for PresenceList {
    async fn call(
        &self,
        state: &GatewayState,
        _session: &SessionEntry,
        _params: Option<Value>,
    ) -> Result<Value> {
        let snapshot = state.snapshot().await;
        Ok(json!({ "sessions": snapshot.presence }))
    }
}

//! Gateway session engine
//!
//! [`GatewayClient`] is the object an application holds. All protocol
//! state (pending table, sequence tracker, handshake phase, backoff)
//! lives inside a single spawned task; the facade talks to it over a
//! command channel and lifecycle notifications fan out on a broadcast
//! channel of [`EngineEvent`]. Nothing here is fatal to the process:
//! every failure resolves to a rejected request future or an event,
//! and the engine self-heals by reconnecting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::client::backoff::ReconnectBackoff;
use crate::client::handshake::{
    ClientAuth, ClientIdentity, HandshakeController, CONNECT_TIMEOUT_MS, HANDSHAKE_DEBOUNCE_MS,
};
use crate::client::pending::{PendingReply, PendingTable, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::client::sequence::{SeqGap, SequenceTracker};
use crate::client::transport::{
    Transport, TransportCommand, TransportEvent, TransportLink, ABNORMAL_CLOSE_CODE,
};
use crate::error::{Error, Result};
use crate::protocol::{
    self, ConnectParams, EventFrame, Frame, HelloOk, RequestFrame, ResponseFrame, StateVersion,
    CLOSE_CONNECT_FAILED, PROTOCOL_VERSION,
};

/// Lifecycle and push notifications fanned out to subscribers
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Connection became usable (`true`) or was lost (`false`)
    ConnectionChange(bool),
    /// Handshake completed; carries the server's hello-ok payload
    HelloOk(HelloOk),
    /// A server-push event, delivered in wire arrival order
    Event {
        event: String,
        payload: Value,
        seq: Option<u64>,
        state_version: Option<StateVersion>,
    },
    /// One or more sequenced events were missed; emitted before the
    /// event that revealed the gap
    Gap(SeqGap),
    /// The transport closed
    Close { code: u16, reason: String },
}

/// Tuning knobs for the facade
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Default timeout applied by [`GatewayClient::request`]
    pub request_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

enum Command {
    Start,
    Stop,
    Request {
        method: String,
        params: Option<Value>,
        timeout_ms: u64,
        reply: PendingReply,
    },
}

/// Handle to the gateway session engine. Cheap to clone; all clones
/// share one connection task.
#[derive(Clone)]
pub struct GatewayClient {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
    connected: Arc<AtomicBool>,
    request_timeout_ms: u64,
}

impl GatewayClient {
    /// Spawn the engine task. Must be called within a tokio runtime.
    /// The engine stays idle until [`start`](Self::start).
    pub fn new(transport: Arc<dyn Transport>, identity: ClientIdentity, auth: ClientAuth) -> Self {
        Self::with_options(transport, identity, auth, ClientOptions::default())
    }

    pub fn with_options(
        transport: Arc<dyn Transport>,
        identity: ClientIdentity,
        auth: ClientAuth,
        options: ClientOptions,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(256);
        let connected = Arc::new(AtomicBool::new(false));
        let request_timeout_ms = options.request_timeout_ms;
        tokio::spawn(run_engine(
            transport,
            command_rx,
            event_tx.clone(),
            connected.clone(),
            identity,
            auth,
        ));
        GatewayClient {
            commands: command_tx,
            events: event_tx,
            connected,
            request_timeout_ms,
        }
    }

    /// Begin connecting (and reconnecting) until [`stop`](Self::stop)
    pub async fn start(&self) -> Result<()> {
        self.send_command(Command::Start).await
    }

    /// Disconnect, flush pending requests, and cancel any scheduled
    /// reconnect. A later `start()` begins a fresh session.
    pub async fn stop(&self) -> Result<()> {
        self.send_command(Command::Stop).await
    }

    /// Whether the handshake has completed on the current connection
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to lifecycle and push notifications
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Issue an RPC with the default timeout
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.request_timeout_ms)
            .await
    }

    /// Issue an RPC with an explicit timeout. Resolves with the `res`
    /// payload, or rejects on server error, timeout, or disconnect.
    /// Failed requests are never retried automatically.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_ms: u64,
    ) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::Request {
            method: method.to_string(),
            params,
            timeout_ms,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| Error::Closed("engine terminated".to_string()))?
    }

    async fn send_command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Closed("engine terminated".to_string()))
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("connected", &self.connected())
            .finish()
    }
}

/// Connection-task state. Owned by `run_engine` exclusively; every
/// mutation happens on that task.
struct EngineState {
    handshake: HandshakeController,
    pending: PendingTable,
    sequence: SequenceTracker,
    backoff: ReconnectBackoff,
    events: broadcast::Sender<EngineEvent>,
    connected: Arc<AtomicBool>,
    timeout_tx: mpsc::UnboundedSender<(String, u64)>,
    link_tx: Option<mpsc::Sender<TransportCommand>>,
    connect_id: Option<String>,
    debounce_at: Option<Instant>,
    reconnect_at: Option<Instant>,
    running: bool,
}

async fn run_engine(
    transport: Arc<dyn Transport>,
    mut commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<EngineEvent>,
    connected: Arc<AtomicBool>,
    identity: ClientIdentity,
    auth: ClientAuth,
) {
    let (timeout_tx, mut timeout_rx) = mpsc::unbounded_channel();
    let mut state = EngineState {
        handshake: HandshakeController::new(identity, auth),
        pending: PendingTable::new(),
        sequence: SequenceTracker::new(),
        backoff: ReconnectBackoff::new(),
        events,
        connected,
        timeout_tx,
        link_tx: None,
        connect_id: None,
        debounce_at: None,
        reconnect_at: None,
        running: false,
    };
    let mut link_rx: Option<mpsc::Receiver<TransportEvent>> = None;

    loop {
        tokio::select! {
            maybe_command = commands.recv() => {
                match maybe_command {
                    None => {
                        state.stop().await;
                        break;
                    }
                    Some(Command::Start) => {
                        if !state.running {
                            state.running = true;
                            state.backoff.reset();
                            link_rx = state.attempt_connect(transport.as_ref()).await;
                        }
                    }
                    Some(Command::Stop) => {
                        link_rx = None;
                        state.stop().await;
                    }
                    Some(Command::Request { method, params, timeout_ms, reply }) => {
                        state.handle_request(method, params, timeout_ms, reply).await;
                    }
                }
            }
            maybe_event = recv_transport(&mut link_rx), if link_rx.is_some() => {
                match maybe_event {
                    Some(TransportEvent::Text(text)) => state.handle_text(&text).await,
                    Some(TransportEvent::Closed { code, reason }) => {
                        link_rx = None;
                        state.on_closed(code, &reason);
                    }
                    None => {
                        link_rx = None;
                        state.on_closed(ABNORMAL_CLOSE_CODE, "transport task ended");
                    }
                }
            }
            Some((id, timeout_ms)) = timeout_rx.recv() => {
                state.handle_timeout(&id, timeout_ms).await;
            }
            _ = tokio::time::sleep_until(state.debounce_at.unwrap_or_else(Instant::now)),
                if state.debounce_at.is_some() =>
            {
                state.debounce_at = None;
                if let Some(params) = state.handshake.on_debounce_expired() {
                    state.send_connect(params).await;
                }
            }
            _ = tokio::time::sleep_until(state.reconnect_at.unwrap_or_else(Instant::now)),
                if state.reconnect_at.is_some() =>
            {
                state.reconnect_at = None;
                if state.running {
                    link_rx = state.attempt_connect(transport.as_ref()).await;
                }
            }
        }
    }
}

async fn recv_transport(
    link_rx: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match link_rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl EngineState {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn attempt_connect(
        &mut self,
        transport: &dyn Transport,
    ) -> Option<mpsc::Receiver<TransportEvent>> {
        match transport.connect().await {
            Ok(TransportLink { tx, rx }) => {
                debug!("transport open, awaiting challenge");
                self.link_tx = Some(tx);
                self.handshake.on_transport_open();
                self.debounce_at =
                    Some(Instant::now() + Duration::from_millis(HANDSHAKE_DEBOUNCE_MS));
                Some(rx)
            }
            Err(err) => {
                warn!(%err, "transport connect failed");
                self.schedule_reconnect();
                None
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.running {
            return;
        }
        let delay = self.backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let text = protocol::encode(frame)?;
        let tx = self
            .link_tx
            .as_ref()
            .ok_or_else(|| Error::Closed("gateway not connected".to_string()))?;
        tx.send(TransportCommand::Text(text))
            .await
            .map_err(|_| Error::Closed("transport task ended".to_string()))
    }

    async fn send_connect(&mut self, params: ConnectParams) {
        let id = PendingTable::next_id();
        let params_value = serde_json::to_value(&params).unwrap_or(Value::Null);
        let frame = Frame::Request(RequestFrame::new(id.clone(), "connect", Some(params_value)));
        self.connect_id = Some(id.clone());
        debug!(%id, "sending connect");
        if self.send_frame(&frame).await.is_err() {
            // Transport already gone; the close event reschedules
            return;
        }
        let tx = self.timeout_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(CONNECT_TIMEOUT_MS)).await;
            let _ = tx.send((id, CONNECT_TIMEOUT_MS));
        });
    }

    async fn handle_request(
        &mut self,
        method: String,
        params: Option<Value>,
        timeout_ms: u64,
        reply: PendingReply,
    ) {
        if !self.handshake.is_ready() {
            let _ = reply.send(Err(Error::Closed("gateway not connected".to_string())));
            return;
        }
        let id = PendingTable::next_id();
        let frame = Frame::Request(RequestFrame::new(id.clone(), method.clone(), params));
        if let Err(err) = self.send_frame(&frame).await {
            let _ = reply.send(Err(err));
            return;
        }
        trace!(%id, %method, "request sent");
        let tx = self.timeout_tx.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = tx.send((timer_id, timeout_ms));
        });
        self.pending.insert(id, method, reply, timer);
    }

    async fn handle_timeout(&mut self, id: &str, timeout_ms: u64) {
        if self.connect_id.as_deref() == Some(id) {
            warn!(timeout_ms, "handshake timed out");
            self.connect_id = None;
            self.fail_connect().await;
            return;
        }
        if self.pending.fail_timeout(id, timeout_ms) {
            debug!(%id, timeout_ms, "request timed out");
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let frame = match protocol::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "dropping undecodable frame");
                return;
            }
        };
        match frame {
            Frame::Event(event) => self.handle_event(event).await,
            Frame::Response(response) => self.handle_response(response).await,
            Frame::Request(request) => {
                warn!(method = %request.method, "ignoring request frame from server");
            }
        }
    }

    async fn handle_event(&mut self, event: EventFrame) {
        if event.event == protocol::events::CONNECT_CHALLENGE {
            // Reserved and unsequenced. Feeds the handshake, then still
            // reaches subscribers like any other event.
            let nonce = event
                .payload
                .as_ref()
                .and_then(|p| p.get("nonce"))
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            debug!("connect challenge received");
            if let Some(params) = self.handshake.on_challenge(nonce) {
                self.debounce_at = None;
                self.send_connect(params).await;
            }
        }
        if let Some(seq) = event.seq {
            if let Some(gap) = self.sequence.observe(seq) {
                warn!(expected = gap.expected, received = gap.received, "event sequence gap");
                self.emit(EngineEvent::Gap(gap));
            }
        }
        self.emit(EngineEvent::Event {
            event: event.event,
            payload: event.payload.unwrap_or(Value::Null),
            seq: event.seq,
            state_version: event.state_version,
        });
    }

    async fn handle_response(&mut self, response: ResponseFrame) {
        if self.connect_id.as_deref() == Some(response.id.as_str()) {
            self.connect_id = None;
            self.finish_handshake(response).await;
            return;
        }
        if !self.pending.resolve(&response.id, response.ok, response.payload, response.error) {
            trace!(id = %response.id, "response for unknown request");
        }
    }

    async fn finish_handshake(&mut self, response: ResponseFrame) {
        if !response.ok {
            let code = response
                .error
                .as_ref()
                .map(|e| e.code.as_str())
                .unwrap_or("unknown");
            warn!(%code, "handshake rejected");
            self.fail_connect().await;
            return;
        }
        let hello: HelloOk = match serde_json::from_value(response.payload.unwrap_or(Value::Null)) {
            Ok(hello) => hello,
            Err(err) => {
                warn!(%err, "malformed hello-ok");
                self.fail_connect().await;
                return;
            }
        };
        if hello.protocol != PROTOCOL_VERSION {
            warn!(
                server = hello.protocol,
                supported = PROTOCOL_VERSION,
                "protocol version mismatch"
            );
            self.fail_connect().await;
            return;
        }
        self.handshake.on_hello_ok();
        self.backoff.reset();
        self.sequence.reset();
        self.connected.store(true, Ordering::SeqCst);
        info!(conn_id = %hello.server.conn_id, "gateway handshake complete");
        self.emit(EngineEvent::ConnectionChange(true));
        self.emit(EngineEvent::HelloOk(hello));
    }

    /// Handshake failure path: close the transport with the reserved
    /// code so all teardown funnels through the close handler
    async fn fail_connect(&mut self) {
        if let Some(tx) = &self.link_tx {
            let _ = tx
                .send(TransportCommand::Close {
                    code: CLOSE_CONNECT_FAILED,
                    reason: "connect failed".to_string(),
                })
                .await;
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        info!(code, reason, "connection closed");
        self.link_tx = None;
        self.debounce_at = None;
        self.connect_id = None;
        let detail = if reason.is_empty() {
            format!("connection closed (code {code})")
        } else {
            format!("connection closed (code {code}): {reason}")
        };
        let flushed = self.pending.flush(&detail);
        if flushed > 0 {
            debug!(flushed, "flushed pending requests");
        }
        self.handshake.on_closed();
        self.emit(EngineEvent::Close {
            code,
            reason: reason.to_string(),
        });
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(EngineEvent::ConnectionChange(false));
        }
        self.schedule_reconnect();
    }

    async fn stop(&mut self) {
        self.running = false;
        self.reconnect_at = None;
        self.debounce_at = None;
        self.connect_id = None;
        if let Some(tx) = self.link_tx.take() {
            let _ = tx
                .send(TransportCommand::Close {
                    code: 1000,
                    reason: "stopped".to_string(),
                })
                .await;
        }
        self.pending.flush("stopped");
        self.handshake.on_closed();
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(EngineEvent::ConnectionChange(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorShape;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockTransport {
        links: Mutex<VecDeque<TransportLink>>,
        attempts: mpsc::UnboundedSender<Instant>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self) -> Result<TransportLink> {
            let _ = self.attempts.send(Instant::now());
            self.links
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Transport("dial refused".to_string()))
        }
    }

    /// The far side of one mock transport link
    struct ServerEnd {
        commands: mpsc::Receiver<TransportCommand>,
        events: mpsc::Sender<TransportEvent>,
    }

    impl ServerEnd {
        async fn expect_request(&mut self) -> RequestFrame {
            match self.commands.recv().await.expect("transport command") {
                TransportCommand::Text(text) => match protocol::decode(&text).unwrap() {
                    Frame::Request(request) => request,
                    other => panic!("expected request frame, got {other:?}"),
                },
                other => panic!("expected text, got {other:?}"),
            }
        }

        async fn expect_close(&mut self) -> (u16, String) {
            match self.commands.recv().await.expect("transport command") {
                TransportCommand::Close { code, reason } => (code, reason),
                other => panic!("expected close, got {other:?}"),
            }
        }

        async fn send_event(&mut self, event: EventFrame) {
            let text = protocol::encode(&Frame::Event(event)).unwrap();
            self.events.send(TransportEvent::Text(text)).await.unwrap();
        }

        async fn send_response(&mut self, response: ResponseFrame) {
            let text = protocol::encode(&Frame::Response(response)).unwrap();
            self.events.send(TransportEvent::Text(text)).await.unwrap();
        }

        async fn send_hello_ok(&mut self, id: &str) {
            let hello = json!({
                "protocol": 3,
                "server": { "version": "1.0.0", "connId": "c-1" },
            });
            self.send_response(ResponseFrame::ok(id, hello)).await;
        }

        async fn send_closed(&mut self, code: u16, reason: &str) {
            self.events
                .send(TransportEvent::Closed {
                    code,
                    reason: reason.to_string(),
                })
                .await
                .unwrap();
        }
    }

    fn link_pair() -> (TransportLink, ServerEnd) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        (
            TransportLink {
                tx: command_tx,
                rx: event_rx,
            },
            ServerEnd {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    fn mock(
        link_count: usize,
    ) -> (
        Arc<MockTransport>,
        Vec<ServerEnd>,
        mpsc::UnboundedReceiver<Instant>,
    ) {
        let mut links = VecDeque::new();
        let mut ends = Vec::new();
        for _ in 0..link_count {
            let (link, end) = link_pair();
            links.push_back(link);
            ends.push(end);
        }
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        (
            Arc::new(MockTransport {
                links: Mutex::new(links),
                attempts: attempts_tx,
            }),
            ends,
            attempts_rx,
        )
    }

    fn client(transport: Arc<MockTransport>) -> GatewayClient {
        let transport: Arc<dyn Transport> = transport;
        GatewayClient::new(transport, ClientIdentity::default(), ClientAuth::default())
    }

    async fn complete_handshake(server: &mut ServerEnd) {
        let request = server.expect_request().await;
        assert_eq!(request.method, "connect");
        server.send_hello_ok(&request.id).await;
    }

    async fn wait_hello(events: &mut broadcast::Receiver<EngineEvent>) -> HelloOk {
        loop {
            match events.recv().await.unwrap() {
                EngineEvent::HelloOk(hello) => return hello,
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_after_debounce_when_no_challenge() {
        let (transport, mut ends, _attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();

        let opened = Instant::now();
        client.start().await.unwrap();
        let request = server.expect_request().await;
        assert_eq!(request.method, "connect");
        assert_eq!(opened.elapsed(), Duration::from_millis(750));

        let params: ConnectParams = serde_json::from_value(request.params.unwrap()).unwrap();
        assert_eq!(params.min_protocol, PROTOCOL_VERSION);
        assert_eq!(params.max_protocol, PROTOCOL_VERSION);
        assert!(params.auth.is_none());

        server.send_hello_ok(&request.id).await;
        match events.recv().await.unwrap() {
            EngineEvent::ConnectionChange(true) => {}
            other => panic!("expected connection change, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            EngineEvent::HelloOk(hello) => assert_eq!(hello.server.conn_id, "c-1"),
            other => panic!("expected hello-ok, got {other:?}"),
        }
        assert!(client.connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_preempts_debounce_and_bad_auth_closes_4008() {
        let (transport, mut ends, mut attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();

        client.start().await.unwrap();
        server
            .send_event(EventFrame::unsequenced(
                protocol::events::CONNECT_CHALLENGE,
                json!({"nonce": "abc"}),
            ))
            .await;

        let challenged = Instant::now();
        let request = server.expect_request().await;
        assert_eq!(request.method, "connect");
        assert!(challenged.elapsed() < Duration::from_millis(750));

        server
            .send_response(ResponseFrame::err(
                &request.id,
                ErrorShape::new("bad_auth", "invalid token"),
            ))
            .await;
        let (code, _) = server.expect_close().await;
        assert_eq!(code, CLOSE_CONNECT_FAILED);

        let closed_at = Instant::now();
        server.send_closed(CLOSE_CONNECT_FAILED, "connect failed").await;

        // The challenge itself reaches subscribers, unsequenced
        match events.recv().await.unwrap() {
            EngineEvent::Event { event, payload, seq, .. } => {
                assert_eq!(event, "connect.challenge");
                assert_eq!(payload["nonce"], "abc");
                assert_eq!(seq, None);
            }
            other => panic!("expected challenge event, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            EngineEvent::Close { code, .. } => assert_eq!(code, CLOSE_CONNECT_FAILED),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(!client.connected());

        let _first = attempts.recv().await.unwrap();
        let retry = attempts.recv().await.unwrap();
        assert_eq!(retry.duration_since(closed_at), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_event_reaches_subscribers() {
        let (transport, mut ends, _attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();
        client.start().await.unwrap();

        server
            .send_event(EventFrame::unsequenced(
                protocol::events::CONNECT_CHALLENGE,
                json!({"nonce": "n-42"}),
            ))
            .await;
        complete_handshake(&mut server).await;

        match events.recv().await.unwrap() {
            EngineEvent::Event { event, payload, seq, .. } => {
                assert_eq!(event, "connect.challenge");
                assert_eq!(payload["nonce"], "n-42");
                assert_eq!(seq, None);
            }
            other => panic!("expected challenge event, got {other:?}"),
        }
        wait_hello(&mut events).await;
        assert!(client.connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_flush_carries_code_and_reason() {
        let (transport, mut ends, _attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();
        client.start().await.unwrap();
        complete_handshake(&mut server).await;
        wait_hello(&mut events).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("slow.op", None).await }
        });
        server.expect_request().await;
        server.send_closed(1006, "network dropped").await;

        match pending.await.unwrap() {
            Err(Error::Closed(reason)) => {
                assert!(reason.contains("1006"));
                assert!(reason.contains("network dropped"));
            }
            other => panic!("expected flush, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_route_by_id() {
        let (transport, mut ends, _attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();
        client.start().await.unwrap();
        complete_handshake(&mut server).await;
        wait_hello(&mut events).await;

        let alpha = tokio::spawn({
            let client = client.clone();
            async move { client.request("alpha", None).await }
        });
        let beta = tokio::spawn({
            let client = client.clone();
            async move { client.request("beta", Some(json!({"n": 1}))).await }
        });

        let first = server.expect_request().await;
        let second = server.expect_request().await;
        assert_ne!(first.id, second.id);

        // Answer in reverse arrival order
        server
            .send_response(ResponseFrame::ok(&second.id, json!({"who": second.method})))
            .await;
        server
            .send_response(ResponseFrame::ok(&first.id, json!({"who": first.method})))
            .await;

        assert_eq!(alpha.await.unwrap().unwrap()["who"], "alpha");
        assert_eq!(beta.await.unwrap().unwrap()["who"], "beta");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_notification_precedes_the_revealing_event() {
        let (transport, mut ends, _attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();
        client.start().await.unwrap();
        complete_handshake(&mut server).await;
        wait_hello(&mut events).await;

        server.send_event(EventFrame::new("presence", json!({"i": 1}), 1)).await;
        server.send_event(EventFrame::new("presence", json!({"i": 2}), 2)).await;
        server.send_event(EventFrame::new("health", json!({"i": 4}), 4)).await;

        match events.recv().await.unwrap() {
            EngineEvent::Event { seq: Some(1), .. } => {}
            other => panic!("expected seq 1, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            EngineEvent::Event { seq: Some(2), .. } => {}
            other => panic!("expected seq 2, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            EngineEvent::Gap(gap) => {
                assert_eq!(gap.expected, 3);
                assert_eq!(gap.received, 4);
            }
            other => panic!("expected gap, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            EngineEvent::Event { event, seq: Some(4), .. } => assert_eq!(event, "health"),
            other => panic!("expected seq 4, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flushes_pending_and_cancels_reconnect() {
        let (transport, mut ends, mut attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();
        client.start().await.unwrap();
        complete_handshake(&mut server).await;
        wait_hello(&mut events).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("slow.op", None).await }
        });
        server.expect_request().await;

        client.stop().await.unwrap();
        match pending.await.unwrap() {
            Err(Error::Closed(reason)) => assert_eq!(reason, "stopped"),
            other => panic!("expected flush, got {other:?}"),
        }
        assert!(!client.connected());

        // No reconnect fires even well past any backoff interval
        let _initial = attempts.try_recv().unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(attempts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_leaves_other_requests_pending() {
        let (transport, mut ends, _attempts) = mock(1);
        let mut server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();
        client.start().await.unwrap();
        complete_handshake(&mut server).await;
        wait_hello(&mut events).await;

        let slow = tokio::spawn({
            let client = client.clone();
            async move { client.request_with_timeout("slow", None, 50).await }
        });
        let steady = tokio::spawn({
            let client = client.clone();
            async move { client.request_with_timeout("steady", None, 5_000).await }
        });

        let first = server.expect_request().await;
        let second = server.expect_request().await;
        let steady_id = if first.method == "steady" { &first.id } else { &second.id };

        let err = slow.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        server
            .send_response(ResponseFrame::ok(steady_id, json!({"ok": true})))
            .await;
        assert_eq!(steady.await.unwrap().unwrap()["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_options_set_the_default_request_timeout() {
        let (transport, mut ends, _attempts) = mock(1);
        let mut server = ends.remove(0);
        let transport: Arc<dyn Transport> = transport;
        let client = GatewayClient::with_options(
            transport,
            ClientIdentity::default(),
            ClientAuth::default(),
            ClientOptions {
                request_timeout_ms: 50,
            },
        );
        let mut events = client.subscribe();
        client.start().await.unwrap();
        complete_handshake(&mut server).await;
        wait_hello(&mut events).await;

        let started = Instant::now();
        let err = client.request("slow", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(started.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_tracking_restarts_on_reconnect() {
        let (transport, mut ends, _attempts) = mock(2);
        let mut second_server = ends.remove(1);
        let mut first_server = ends.remove(0);
        let client = client(transport);
        let mut events = client.subscribe();
        client.start().await.unwrap();
        complete_handshake(&mut first_server).await;
        wait_hello(&mut events).await;

        first_server.send_event(EventFrame::new("presence", json!({}), 1)).await;
        first_server.send_event(EventFrame::new("presence", json!({}), 2)).await;
        match events.recv().await.unwrap() {
            EngineEvent::Event { seq: Some(1), .. } => {}
            other => panic!("expected seq 1, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            EngineEvent::Event { seq: Some(2), .. } => {}
            other => panic!("expected seq 2, got {other:?}"),
        }

        first_server.send_closed(1006, "network dropped").await;
        match events.recv().await.unwrap() {
            EngineEvent::Close { code: 1006, .. } => {}
            other => panic!("expected close, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            EngineEvent::ConnectionChange(false) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }

        complete_handshake(&mut second_server).await;
        wait_hello(&mut events).await;

        // The new connection numbers from 1; no gap fires
        second_server.send_event(EventFrame::new("presence", json!({}), 1)).await;
        match events.recv().await.unwrap() {
            EngineEvent::Event { seq: Some(1), .. } => {}
            other => panic!("expected seq 1 without a gap, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_across_failures_and_resets_on_success() {
        let (transport, _ends, mut attempts) = mock(0);
        let client = client(transport.clone());
        let mut events = client.subscribe();
        client.start().await.unwrap();

        let first = attempts.recv().await.unwrap();
        let second = attempts.recv().await.unwrap();
        let third = attempts.recv().await.unwrap();
        assert_eq!(second.duration_since(first), Duration::from_millis(800));
        assert_eq!(third.duration_since(second), Duration::from_millis(1360));

        // Supply a link so the fourth attempt lands, then handshake
        let (link, mut server) = link_pair();
        transport.links.lock().unwrap().push_back(link);
        let fourth = attempts.recv().await.unwrap();
        assert_eq!(fourth.duration_since(third), Duration::from_millis(2312));
        complete_handshake(&mut server).await;
        wait_hello(&mut events).await;

        // Success reset the schedule
        let closed_at = Instant::now();
        server.send_closed(1006, "network dropped").await;
        let retry = attempts.recv().await.unwrap();
        assert_eq!(retry.duration_since(closed_at), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_rejected_before_handshake() {
        let (transport, _ends, _attempts) = mock(0);
        let client = client(transport);
        let err = client.request("health", None).await.unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
    }
}

//! WebSocket connection handling
//!
//! One task per accepted socket. The task issues the connect challenge,
//! enforces the handshake deadline, validates protocol range and auth,
//! then settles into a select loop: inbound `req` frames dispatch
//! through the method registry, bus broadcasts and the periodic tick go
//! out stamped with this connection's own `seq`, starting at 1.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{
    self, error_codes, events, ConnectParams, ErrorShape, EventFrame, Features, Frame, HelloOk,
    Policy, RequestFrame, ResponseFrame, ServerInfo, CLOSE_CONNECT_FAILED, HANDSHAKE_TIMEOUT_MS,
    MAX_PAYLOAD_BYTES, PROTOCOL_VERSION,
};
use crate::server::session::SessionEntry;
use crate::server::state::GatewayState;

pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let conn_id = format!("c-{}", Uuid::new_v4().simple());
    let (mut sender, mut receiver) = socket.split();

    // Challenge first; unsequenced, carries only the nonce
    let nonce = Uuid::new_v4().simple().to_string();
    let challenge = EventFrame::unsequenced(events::CONNECT_CHALLENGE, json!({ "nonce": nonce }));
    if send_frame(&mut sender, &Frame::Event(challenge)).await.is_err() {
        return;
    }

    let connect = match tokio::time::timeout(
        Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        await_connect(&mut receiver),
    )
    .await
    {
        Ok(Some(request)) => request,
        Ok(None) => {
            debug!(%conn_id, "socket closed before connect");
            return;
        }
        Err(_) => {
            debug!(%conn_id, "no connect within handshake deadline");
            let _ = close(&mut sender, CLOSE_CONNECT_FAILED, "connect timeout").await;
            return;
        }
    };

    let params: ConnectParams = match connect
        .params
        .clone()
        .ok_or(())
        .and_then(|p| serde_json::from_value(p).map_err(|_| ()))
    {
        Ok(params) => params,
        Err(()) => {
            reject(&mut sender, &connect.id, error_codes::BAD_HANDSHAKE, "malformed connect params")
                .await;
            return;
        }
    };

    if params.min_protocol > PROTOCOL_VERSION || params.max_protocol < PROTOCOL_VERSION {
        warn!(
            %conn_id,
            min = params.min_protocol,
            max = params.max_protocol,
            "unsupported protocol range"
        );
        reject(&mut sender, &connect.id, error_codes::BAD_HANDSHAKE, "unsupported protocol").await;
        return;
    }

    if let Err(code) = state.auth().verify(params.auth.as_ref()) {
        warn!(%conn_id, client = %params.client.id, "authentication failed");
        reject(&mut sender, &connect.id, code, "authentication failed").await;
        return;
    }

    // Subscribe before hello-ok so nothing published after the snapshot
    // is missed; the snapshot carries the matching state versions.
    let mut bus = state.subscribe();
    let session = SessionEntry::new(
        conn_id.clone(),
        params.client.clone(),
        params.role.clone(),
        params.scopes.clone(),
    );
    state.register_session(session.clone()).await;

    let hello = HelloOk {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            version: crate::VERSION.to_string(),
            commit: option_env!("GIT_COMMIT").map(str::to_string),
            host: None,
            conn_id: conn_id.clone(),
        },
        features: Some(Features {
            methods: state.methods().method_names(),
            events: vec![
                events::PRESENCE.to_string(),
                events::HEALTH.to_string(),
                events::TICK.to_string(),
                events::SHUTDOWN.to_string(),
            ],
        }),
        snapshot: Some(state.snapshot().await),
        auth: None,
        policy: Some(Policy {
            tick_interval_ms: state.tick_interval().as_millis() as u64,
            ..Policy::default()
        }),
    };
    let hello_value = match serde_json::to_value(&hello) {
        Ok(value) => value,
        Err(err) => {
            warn!(%conn_id, %err, "failed to build hello-ok");
            state.remove_session(&conn_id).await;
            return;
        }
    };
    if send_frame(&mut sender, &Frame::Response(ResponseFrame::ok(&connect.id, hello_value)))
        .await
        .is_err()
    {
        state.remove_session(&conn_id).await;
        return;
    }
    info!(%conn_id, client = %params.client.id, role = %params.role, "session established");

    let mut seq: u64 = 0;
    let tick_period = state.tick_interval();
    let mut tick = interval_at(Instant::now() + tick_period, tick_period);

    loop {
        tokio::select! {
            broadcast = bus.recv() => {
                match broadcast {
                    Ok(item) => {
                        seq += 1;
                        let mut frame = EventFrame::new(item.event, item.payload, seq);
                        frame.state_version = item.state_version;
                        if send_frame(&mut sender, &Frame::Event(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // Skipped items surface to the client as a seq gap
                        warn!(%conn_id, missed, "connection lagging behind broadcast bus");
                        seq += missed;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tick.tick() => {
                seq += 1;
                let frame = EventFrame::new(
                    events::TICK,
                    json!({ "uptimeMs": state.uptime_ms() }),
                    seq,
                );
                if send_frame(&mut sender, &Frame::Event(frame)).await.is_err() {
                    break;
                }
            }
            maybe_message = receiver.next() => {
                match maybe_message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(response) =
                            handle_text(&state, &session, text.as_str()).await
                        {
                            if send_frame(&mut sender, &Frame::Response(response)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(%conn_id, code = ?frame.as_ref().map(|f| f.code), "client closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%conn_id, %err, "socket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.remove_session(&conn_id).await;
    info!(%conn_id, "session ended");
}

/// Dispatch one inbound text message. Returns the response to send, or
/// `None` when the message warrants no reply.
async fn handle_text(
    state: &GatewayState,
    session: &SessionEntry,
    text: &str,
) -> Option<ResponseFrame> {
    let frame = match protocol::decode(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(conn_id = %session.conn_id, %err, "dropping undecodable frame");
            return None;
        }
    };
    let request = match frame {
        Frame::Request(request) => request,
        other => {
            warn!(conn_id = %session.conn_id, "ignoring non-request frame: {other:?}");
            return None;
        }
    };
    if text.len() > MAX_PAYLOAD_BYTES {
        return Some(ResponseFrame::err(
            &request.id,
            ErrorShape::new(error_codes::PAYLOAD_TOO_LARGE, "request payload too large"),
        ));
    }
    trace!(conn_id = %session.conn_id, method = %request.method, id = %request.id, "dispatch");
    match state
        .methods()
        .dispatch(state, session, &request.method, request.params)
        .await
    {
        Ok(payload) => Some(ResponseFrame::ok(&request.id, payload)),
        Err(err) => Some(ResponseFrame::err(&request.id, error_shape(err))),
    }
}

/// Map a handler failure onto the wire error shape
fn error_shape(err: Error) -> ErrorShape {
    match err {
        Error::Request { code, message, details } => ErrorShape {
            code,
            message,
            details,
        },
        Error::InvalidInput(message) => ErrorShape::new(error_codes::INVALID_PARAMS, message),
        Error::Unauthorized(message) => ErrorShape::new(error_codes::FORBIDDEN, message),
        Error::Timeout(message) => ErrorShape::new(error_codes::TIMEOUT, message),
        other => ErrorShape::new(error_codes::INTERNAL, other.to_string()),
    }
}

/// Read frames until the client's `connect` request arrives. Anything
/// else pre-handshake is noise and is skipped.
async fn await_connect(receiver: &mut SplitStream<WebSocket>) -> Option<RequestFrame> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match protocol::decode(text.as_str()) {
                Ok(Frame::Request(request)) if request.method == "connect" => {
                    return Some(request)
                }
                Ok(_) | Err(_) => continue,
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let text = protocol::encode(frame)?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| Error::Transport(err.to_string()))
}

/// Handshake rejection: error response first, then the reserved close
/// code so the client funnels teardown through its close handler
async fn reject(sender: &mut SplitSink<WebSocket, Message>, id: &str, code: &str, message: &str) {
    let response = ResponseFrame::err(id, ErrorShape::new(code, message));
    let _ = send_frame(sender, &Frame::Response(response)).await;
    let _ = close(sender, CLOSE_CONNECT_FAILED, "connect failed").await;
}

async fn close(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) -> Result<()> {
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        })))
        .await
        .map_err(|err| Error::Transport(err.to_string()))
}

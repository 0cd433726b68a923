//! Handshake controller
//!
//! Drives the connect/hello-ok exchange that must complete before any
//! application request goes out. On transport open the controller arms a
//! short debounce window; it sends the `connect` request either when the
//! server pushes a `connect.challenge` event (immediately, capturing the
//! nonce) or when the window expires with no challenge seen. A guard
//! ensures the request is issued at most once per transport instance
//! even when the two triggers race.

use secrecy::{ExposeSecret, SecretString};

use crate::protocol::{AuthParams, ClientInfo, ConnectParams, PROTOCOL_VERSION};

/// How long to wait for a server challenge before connecting without one
pub const HANDSHAKE_DEBOUNCE_MS: u64 = 750;
/// How long the `connect` request may wait for its hello-ok
pub const CONNECT_TIMEOUT_MS: u64 = crate::protocol::HANDSHAKE_TIMEOUT_MS;

/// Who this client claims to be. Pure handshake metadata, owned by the
/// surrounding application and passed in at construction.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    pub instance_id: Option<String>,
    pub role: String,
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub locale: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        ClientIdentity {
            id: "opengate".to_string(),
            version: crate::VERSION.to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "operator".to_string(),
            instance_id: None,
            role: crate::protocol::roles::OPERATOR.to_string(),
            scopes: Vec::new(),
            caps: Vec::new(),
            locale: None,
            user_agent: Some(format!("opengate/{}", crate::VERSION)),
        }
    }
}

/// Credentials presented in the handshake, held wrapped until the
/// `connect` frame is built
#[derive(Debug, Clone, Default)]
pub struct ClientAuth {
    pub token: Option<SecretString>,
    pub password: Option<SecretString>,
}

impl ClientAuth {
    fn to_params(&self) -> Option<AuthParams> {
        if self.token.is_none() && self.password.is_none() {
            return None;
        }
        Some(AuthParams {
            token: self.token.as_ref().map(|s| s.expose_secret().to_string()),
            password: self.password.as_ref().map(|s| s.expose_secret().to_string()),
        })
    }
}

/// Handshake progression for one transport instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No transport
    Idle,
    /// Transport open, debounce armed, no connect sent yet
    AwaitingConnect,
    /// `connect` issued, waiting on hello-ok
    ConnectSent,
    /// Hello-ok accepted
    Ready,
}

/// Per-transport handshake state. Reset on every transport open; the
/// send guard is the mutual exclusion between the challenge and
/// debounce triggers.
#[derive(Debug)]
pub struct HandshakeController {
    identity: ClientIdentity,
    auth: ClientAuth,
    phase: HandshakePhase,
    nonce: Option<String>,
    connect_sent: bool,
}

impl HandshakeController {
    pub fn new(identity: ClientIdentity, auth: ClientAuth) -> Self {
        HandshakeController {
            identity,
            auth,
            phase: HandshakePhase::Idle,
            nonce: None,
            connect_sent: false,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == HandshakePhase::Ready
    }

    /// New transport instance: forget any previous nonce and re-arm the
    /// send guard. The caller arms the debounce timer.
    pub fn on_transport_open(&mut self) {
        self.nonce = None;
        self.connect_sent = false;
        self.phase = HandshakePhase::AwaitingConnect;
    }

    /// Server pushed a `connect.challenge`. Capture the nonce and, when
    /// the connect has not gone out yet, claim the send slot.
    pub fn on_challenge(&mut self, nonce: String) -> Option<ConnectParams> {
        self.nonce = Some(nonce);
        self.try_send()
    }

    /// Debounce window expired with no challenge seen
    pub fn on_debounce_expired(&mut self) -> Option<ConnectParams> {
        self.try_send()
    }

    /// Hello-ok accepted; the connection is usable
    pub fn on_hello_ok(&mut self) {
        self.phase = HandshakePhase::Ready;
    }

    /// Transport gone
    pub fn on_closed(&mut self) {
        self.phase = HandshakePhase::Idle;
        self.nonce = None;
        self.connect_sent = false;
    }

    /// The nonce from the last challenge on this transport, if any
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    fn try_send(&mut self) -> Option<ConnectParams> {
        if self.connect_sent || self.phase != HandshakePhase::AwaitingConnect {
            return None;
        }
        self.connect_sent = true;
        self.phase = HandshakePhase::ConnectSent;
        Some(self.build_params())
    }

    fn build_params(&self) -> ConnectParams {
        ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: self.identity.id.clone(),
                version: self.identity.version.clone(),
                platform: self.identity.platform.clone(),
                mode: self.identity.mode.clone(),
                instance_id: self.identity.instance_id.clone(),
            },
            role: self.identity.role.clone(),
            scopes: self.identity.scopes.clone(),
            caps: self.identity.caps.clone(),
            auth: self.auth.to_params(),
            locale: self.identity.locale.clone(),
            user_agent: self.identity.user_agent.clone(),
        }
    }
}

//! Gateway client
//!
//! Everything needed to hold a resilient session against a gateway:
//! the WebSocket transport, the handshake and reconnection machinery,
//! request/response correlation, and the [`GatewayClient`] facade.

pub mod backoff;
pub mod engine;
pub mod handshake;
pub mod pending;
pub mod sequence;
pub mod transport;

pub use backoff::ReconnectBackoff;
pub use engine::{ClientOptions, EngineEvent, GatewayClient};
pub use handshake::{ClientAuth, ClientIdentity, HandshakeController, HandshakePhase};
pub use pending::PendingTable;
pub use sequence::{SeqGap, SequenceTracker};
pub use transport::{Transport, TransportCommand, TransportEvent, TransportLink, WsTransport};

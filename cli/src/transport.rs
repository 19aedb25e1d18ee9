//! Transport abstraction consumed by the session manager.
//!
//! The session manager never talks to a socket. It drives an implementor of
//! [`Transport`] and receives lifecycle changes and inbound frames as
//! [`TransportEvent`]s on a channel it owns.
//!
//! # Architecture
//!
//! ```text
//! SessionManager ──open/subscribe/publish/close──► Transport (trait)
//!       ▲                                              │
//!       │                                              ├── StompTransport
//!       └──────── TransportEvent { generation, .. } ◄──┘   (WebSocket task)
//! ```
//!
//! Every event carries the generation passed to [`Transport::open`], so the
//! session manager can drop events from a session it already superseded.

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sender half handed to a transport for delivering events.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Parameters for opening a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Broker address (for STOMP: a `ws://` or `wss://` URL).
    pub address: String,
    /// Handshake headers in the order the user entered them.
    pub headers: Vec<(String, String)>,
    /// Session generation, echoed back on every event.
    pub generation: u64,
}

/// Opaque handle for one materialized subscription.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct SubscriptionHandle(pub String);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outgoing payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundBody {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload (encoded structured message).
    Binary(Vec<u8>),
}

/// Payload of one inbound frame.
///
/// A frame may expose either or both representations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundBody {
    /// Body as text, when it is valid UTF-8.
    pub text: Option<String>,
    /// Body as raw octets, when it is not declared as text.
    pub binary: Option<Vec<u8>>,
}

/// What happened on a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Handshake completed.
    Connected,
    /// Session ended (remote close, read failure, or completed teardown).
    Disconnected,
    /// Protocol-level failure with the broker's diagnostic.
    Error(String),
    /// Inbound frame on a materialized subscription.
    Frame {
        /// Subscription the frame was routed through.
        handle: SubscriptionHandle,
        /// Destination reported by the broker.
        destination: String,
        /// Frame body.
        body: InboundBody,
    },
}

/// Event delivered from a transport to its session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Generation of the session that produced the event.
    pub generation: u64,
    /// Event payload.
    pub kind: TransportEventKind,
}

/// Errors raised synchronously by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No session is open, or the session is not connected yet.
    #[error("transport is not connected")]
    NotConnected,
    /// The session task is gone or its command queue is full.
    #[error("transport command failed: {0}")]
    CommandFailed(String),
    /// Teardown did not complete cleanly.
    #[error("transport close failed: {0}")]
    CloseFailed(String),
}

/// Duplex broker session driven by the session manager.
///
/// All methods are called from the session manager's task. Implementations
/// deliver completions through the [`EventSink`] given to [`Transport::open`].
#[async_trait]
pub trait Transport: Send {
    /// Begin opening a session. Returns immediately; the outcome arrives as
    /// a `Connected` or `Error` event tagged with `request.generation`.
    ///
    /// Any previous session must already have been closed.
    fn open(&mut self, request: OpenRequest, events: EventSink) -> Result<(), TransportError>;

    /// Subscribe to `destination`. Valid only while connected.
    fn subscribe(&mut self, destination: &str) -> Result<SubscriptionHandle, TransportError>;

    /// Drop a subscription. Unknown or stale handles are ignored.
    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError>;

    /// Publish `body` on `destination`. Fire-and-forget.
    fn publish(&mut self, destination: &str, body: OutboundBody) -> Result<(), TransportError>;

    /// Tear the session down and wait for it to finish. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

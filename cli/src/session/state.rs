//! Session state types.
//!
//! [`ConnectionStatus`] is an explicit state machine. Every status change in
//! the session manager goes through [`ConnectionStatus::can_transition_to`]:
//!
//! ```text
//! Disconnected ──connect()──► Connecting
//! Connecting   ──onConnected─► Connected
//! Connecting   ──onError─────► Error
//! Connected    ──onError─────► Error
//! Error        ──connect()───► Connecting
//! any but Disconnected ──disconnect() / onDisconnected──► Disconnected
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the broker connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session (initial and after teardown).
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Handshake complete; subscriptions are materialized.
    Connected,
    /// Transport reported a protocol failure.
    Error,
}

impl ConnectionStatus {
    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::{Connected, Connecting, Disconnected, Error};
        matches!(
            (self, next),
            (Disconnected | Error, Connecting)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected, Disconnected | Error)
                | (Error, Disconnected)
        )
    }

    /// Whether a new `connect()` is offered (retriable states).
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether publishing and subscribing reach the broker.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// How payloads are translated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Plain text in both directions.
    #[default]
    Raw,
    /// JSON validated and encoded against a schema type; binary frames decoded.
    Structured,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "string" | "text" => Ok(Self::Raw),
            "structured" | "protobuf" | "proto" => Ok(Self::Structured),
            other => Err(format!("unknown mode {other:?} (expected raw or structured)")),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Raw => "raw",
            Self::Structured => "structured",
        })
    }
}

/// Which schema type inbound binary frames are decoded as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InboundTypePolicy {
    /// The first message type in registry order.
    #[default]
    FirstRegistered,
    /// A fixed type, looked up like an outbound root key.
    Named(String),
}

impl InboundTypePolicy {
    /// Policy for an optional configured type name.
    pub fn from_config(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(name) if !name.is_empty() => Self::Named(name.to_string()),
            _ => Self::FirstRegistered,
        }
    }
}

/// Timeline entry direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Published by this session.
    Sent,
    /// Delivered on a subscription.
    Received,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sent => "SENT",
            Self::Received => "RECEIVED",
        })
    }
}

/// One immutable timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    direction: Direction,
    destination: String,
    content: String,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub(crate) fn new(direction: Direction, destination: &str, content: String) -> Self {
        Self {
            direction,
            destination: destination.to_string(),
            content,
            timestamp: Utc::now(),
        }
    }

    /// Sent or received.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Destination published to, or reported by the broker.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Human-readable content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// The logical link to one broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Broker address.
    pub address: String,
    /// Handshake headers.
    pub headers: Vec<(String, String)>,
    /// Generation matching the transport events of this connection.
    pub generation: u64,
}

/// Read-only snapshot handed to presentation code.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView<'a> {
    /// Current status.
    pub status: ConnectionStatus,
    /// Current error slot.
    pub last_error: Option<&'a str>,
    /// Connected address, if any.
    pub address: Option<&'a str>,
    /// Communication mode.
    pub mode: Mode,
    /// Desired destinations, with whether each is materialized.
    pub subscriptions: Vec<(&'a str, bool)>,
    /// Timeline.
    pub messages: &'a [Message],
    /// Registered schema types.
    pub schema_types: usize,
}

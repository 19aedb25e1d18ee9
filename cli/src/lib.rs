//! stompwire - STOMP-over-WebSocket session manager with a protobuf codec.
//!
//! This crate connects to a STOMP broker over WebSocket, tracks a set of
//! subscriptions across reconnects, and keeps a timeline of sent and
//! received messages. Payloads are plain text or, in structured mode,
//! JSON validated and encoded against protobuf schemas loaded at runtime.
//!
//! # Architecture
//!
//! - **SessionManager** - Owns connection status, subscriptions, timeline and
//!   the schema registry. Transport agnostic
//! - **Transport** - Trait the manager drives; [`stomp::StompTransport`] is the
//!   STOMP 1.2 implementation over [`ws`]
//! - **SchemaRegistry** - Parses `.proto` sources, fetches missing imports,
//!   and resolves message types by name
//! - **Console** - Line-oriented driver in `main.rs` using [`commands`]
//!
//! # Modules
//!
//! - [`session`] - Session manager and state types
//! - [`transport`] - Transport trait and event types
//! - [`stomp`] - STOMP frame codec and transport
//! - [`schema`] - Schema registry, import fetcher, codec helpers
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod commands;
pub mod schema;
pub mod session;
pub mod stomp;
pub mod transport;
pub mod ws;

pub mod config;
pub mod constants;

// Re-export commonly used types
pub use config::Config;
pub use schema::{HttpImportFetcher, ImportFetcher, SchemaDocument, SchemaRegistry};
pub use session::{ConnectionStatus, Message, Mode, SessionError, SessionManager};
pub use stomp::StompTransport;
pub use transport::{Transport, TransportEvent};

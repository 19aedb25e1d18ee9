//! Application-wide constants for stompwire.
//!
//! Centralizes timeouts and protocol defaults so the transport, schema
//! loader and console driver agree on them.
//!
//! # Categories
//!
//! - **Timeouts**: Handshake and teardown bounds
//! - **STOMP**: Protocol versions, subprotocols, heart-beats
//! - **Schema**: Well-known import source

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the broker's CONNECTED frame after CONNECT.
///
/// The WebSocket handshake and the STOMP handshake share this budget.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time to wait for the RECEIPT of a DISCONNECT frame.
///
/// Brokers that never answer still get their socket closed after this.
pub const DISCONNECT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum time `close()` waits for the background session task to exit.
pub const CLOSE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP request timeout for fetching schema imports.
pub const IMPORT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// STOMP
// ============================================================================

/// Versions offered in the CONNECT `accept-version` header.
pub const STOMP_ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// WebSocket subprotocols requested during the upgrade.
pub const STOMP_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

/// Default outgoing/incoming heart-beat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;

/// Receipt id attached to the DISCONNECT frame.
pub const DISCONNECT_RECEIPT_ID: &str = "stompwire-disconnect";

/// Buffer size for commands queued to the session task.
pub const COMMAND_BUFFER: usize = 256;

// ============================================================================
// Schema
// ============================================================================

/// Base URL for imports that are not supplied locally.
///
/// Import paths such as `google/protobuf/timestamp.proto` are appended to it.
pub const DEFAULT_IMPORT_BASE_URL: &str =
    "https://raw.githubusercontent.com/protocolbuffers/protobuf/master/src/";

/// Default publish destination offered by the console.
pub const DEFAULT_PUBLISH_DESTINATION: &str = "/app/sendMessage";

/// Default broker endpoint.
pub const DEFAULT_BROKER_URL: &str = "ws://localhost:8080/ws";

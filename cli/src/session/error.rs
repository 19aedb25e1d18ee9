//! Errors surfaced by [`super::SessionManager`].
//!
//! Every variant is also written to the session's last-error slot, so
//! callers that only render state can ignore the returned `Result`.

use crate::schema::SchemaLoadError;
use crate::transport::TransportError;

/// Session-level failure of a user-initiated operation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Address, destination or other input is empty or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The transport could not start a session.
    #[error("connection error: {0}")]
    Connection(#[source] TransportError),
    /// Teardown failed; the session is nevertheless treated as disconnected.
    #[error("Error disconnecting from server: {0}")]
    Teardown(#[source] TransportError),
    /// The transport refused a subscription.
    #[error("Failed to subscribe to {destination}: {source}")]
    Subscribe {
        /// Destination that was not materialized.
        destination: String,
        /// Transport diagnostic.
        source: TransportError,
    },
    /// Operation needs a connected session.
    #[error("not connected")]
    NotConnected,
    /// Structured payload is not a JSON object with exactly one root key.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// Root key does not name a registered type.
    #[error("Unknown message type: {0}")]
    TypeNotFound(String),
    /// Payload failed schema verification.
    #[error("Invalid message: {0}")]
    Validation(String),
    /// Transport refused the publish.
    #[error("Failed to send message: {0}")]
    Publish(#[source] TransportError),
    /// Schema batch rejected.
    #[error("Error loading schema: {0}")]
    SchemaLoad(#[from] SchemaLoadError),
}

//! Session manager: connection lifecycle, subscriptions and message
//! translation over a [`Transport`].
//!
//! # Architecture
//!
//! ```text
//!   console / caller                 SessionManager                 Transport
//!        │ connect/disconnect             │  open / close               │
//!        │ add/remove_subscription ─────► │  subscribe / unsubscribe ─► │
//!        │ publish / load_schema          │  publish                    │
//!        │                                │                             │
//!        │ handle_event(event) ─────────► │ ◄── TransportEvent ─────────┘
//!        │                                │     (via the events receiver)
//!        ◄──────── view() / messages() ───┘
//! ```
//!
//! All methods take `&mut self`; one task owns the manager and feeds it the
//! events returned by [`SessionManager::new`]. Events carry the generation of
//! the connection that produced them, and anything from a superseded
//! connection is dropped. This is what makes `connect()` followed by
//! `disconnect()` safe while the handshake is still in flight.
//!
//! The desired subscription set survives disconnects. Handles exist only
//! while connected and are re-created, in insertion order, every time a
//! connection becomes active.

// Rust guideline compliant 2026-02

mod error;
pub mod state;

use indexmap::IndexMap;
use tokio::sync::mpsc;

use crate::schema::{self, ImportFetcher, LoadReport, SchemaDocument, SchemaRegistry};
use crate::transport::{
    EventSink, InboundBody, OpenRequest, OutboundBody, SubscriptionHandle, Transport,
    TransportEvent, TransportEventKind,
};

pub use error::SessionError;
pub use state::{
    Connection, ConnectionStatus, Direction, InboundTypePolicy, Message, Mode, SessionView,
};

/// Owns one broker connection, its subscriptions and the message timeline.
pub struct SessionManager<T: Transport> {
    transport: T,
    events_tx: EventSink,
    fetcher: Box<dyn ImportFetcher>,
    status: ConnectionStatus,
    last_error: Option<String>,
    connection: Option<Connection>,
    generation: u64,
    /// Desired destinations in insertion order -> handle while materialized.
    subscriptions: IndexMap<String, Option<SubscriptionHandle>>,
    messages: Vec<Message>,
    registry: SchemaRegistry,
    mode: Mode,
    inbound_policy: InboundTypePolicy,
}

impl<T: Transport> std::fmt::Debug for SessionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .field("connection", &self.connection)
            .field("subscriptions", &self.subscriptions)
            .field("messages", &self.messages.len())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SessionManager<T> {
    /// Create a disconnected manager.
    ///
    /// The returned receiver yields every [`TransportEvent`]; the owner
    /// passes each one to [`Self::handle_event`].
    pub fn new(
        transport: T,
        fetcher: Box<dyn ImportFetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            transport,
            events_tx,
            fetcher,
            status: ConnectionStatus::Disconnected,
            last_error: None,
            connection: None,
            generation: 0,
            subscriptions: IndexMap::new(),
            messages: Vec::new(),
            registry: SchemaRegistry::new(),
            mode: Mode::Raw,
            inbound_policy: InboundTypePolicy::FirstRegistered,
        };
        (manager, events_rx)
    }

    // === Accessors ===

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Current error slot.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The active connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Timeline in creation order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Desired destinations in insertion order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    /// Whether `destination` currently has a transport subscription.
    pub fn is_materialized(&self, destination: &str) -> bool {
        matches!(self.subscriptions.get(destination), Some(Some(_)))
    }

    /// Communication mode used for inbound frames.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch communication mode.
    pub fn set_mode(&mut self, mode: Mode) {
        log::info!("[Session] Mode set to {}", mode);
        self.mode = mode;
    }

    /// Inbound decode policy.
    pub fn inbound_policy(&self) -> &InboundTypePolicy {
        &self.inbound_policy
    }

    /// Replace the inbound decode policy.
    pub fn set_inbound_policy(&mut self, policy: InboundTypePolicy) {
        self.inbound_policy = policy;
    }

    /// Schema registry (read-only).
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Registered message type names.
    pub fn type_names(&self) -> Vec<String> {
        self.registry.type_names()
    }

    /// Snapshot for presentation.
    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            status: self.status,
            last_error: self.last_error.as_deref(),
            address: self.connection.as_ref().map(|c| c.address.as_str()),
            mode: self.mode,
            subscriptions: self
                .subscriptions
                .iter()
                .map(|(dest, handle)| (dest.as_str(), handle.is_some()))
                .collect(),
            messages: &self.messages,
            schema_types: self.registry.type_names().len(),
        }
    }

    // === Connection lifecycle ===

    /// Start connecting to `address`.
    ///
    /// Any existing connection is torn down first. Returns once the
    /// transport has been asked to open; the outcome arrives as an event.
    pub async fn connect(
        &mut self,
        address: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), SessionError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(self.record(SessionError::InvalidInput(
                "broker address is empty".to_string(),
            )));
        }

        if self.connection.is_some() {
            log::info!("[Session] Deactivating previous connection before reconnect");
            // Teardown failures are recorded; the old session is gone either way.
            let _ = self.deactivate().await;
        }

        self.generation += 1;
        let connection = Connection {
            address: address.to_string(),
            headers: headers.into_iter().filter(|(k, _)| !k.is_empty()).collect(),
            generation: self.generation,
        };
        let request = OpenRequest {
            address: connection.address.clone(),
            headers: connection.headers.clone(),
            generation: connection.generation,
        };

        log::info!("[Session] Connecting to {} (generation {})", address, self.generation);
        self.set_status(ConnectionStatus::Connecting);
        self.connection = Some(connection);

        if let Err(e) = self.transport.open(request, self.events_tx.clone()) {
            log::warn!("[Session] Transport refused to open: {}", e);
            self.set_status(ConnectionStatus::Error);
            return Err(self.record(SessionError::Connection(e)));
        }
        Ok(())
    }

    /// Tear down the active connection. No-op without one.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        if self.connection.is_none() {
            return Ok(());
        }
        self.deactivate().await
    }

    async fn deactivate(&mut self) -> Result<(), SessionError> {
        let result = self.transport.close().await;

        // Everything the old session still has in flight is now stale.
        self.generation += 1;
        self.connection = None;
        self.clear_handles();
        self.set_status(ConnectionStatus::Disconnected);

        match result {
            Ok(()) => {
                log::info!("[Session] Disconnected");
                self.last_error = None;
                Ok(())
            }
            Err(e) => Err(self.record(SessionError::Teardown(e))),
        }
    }

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let current = self.connection.as_ref().map(|c| c.generation);
        if current != Some(event.generation) {
            log::debug!(
                "[Session] Dropping event from generation {} (current {:?})",
                event.generation,
                current
            );
            return;
        }

        match event.kind {
            TransportEventKind::Connected => {
                if self.status != ConnectionStatus::Connecting {
                    log::debug!("[Session] Ignoring Connected while {}", self.status);
                    return;
                }
                self.set_status(ConnectionStatus::Connected);
                self.last_error = None;
                self.materialize_all();
            }
            TransportEventKind::Disconnected => {
                log::info!("[Session] Transport reported disconnect");
                self.clear_handles();
                self.set_status(ConnectionStatus::Disconnected);
            }
            TransportEventKind::Error(diagnostic) => {
                log::error!("[Session] STOMP error: {}", diagnostic);
                self.clear_handles();
                self.set_status(ConnectionStatus::Error);
                self.last_error = Some(format!("STOMP error: {diagnostic}"));
            }
            TransportEventKind::Frame {
                handle,
                destination,
                body,
            } => {
                let active = self
                    .subscriptions
                    .values()
                    .any(|h| h.as_ref() == Some(&handle));
                if !active {
                    log::debug!("[Session] Dropping frame for inactive handle {}", handle);
                    return;
                }
                self.on_frame_received(&destination, body);
            }
        }
    }

    fn set_status(&mut self, next: ConnectionStatus) {
        if self.status == next {
            return;
        }
        if !self.status.can_transition_to(next) {
            log::warn!("[Session] Refusing status change {} -> {}", self.status, next);
            return;
        }
        log::debug!("[Session] {} -> {}", self.status, next);
        self.status = next;
    }

    /// Store `err` in the error slot and hand it back.
    fn record(&mut self, err: SessionError) -> SessionError {
        log::warn!("[Session] {}", err);
        self.last_error = Some(err.to_string());
        err
    }

    // === Subscriptions ===

    fn materialize_all(&mut self) {
        let mut failures = Vec::new();
        for (destination, handle) in &mut self.subscriptions {
            match self.transport.subscribe(destination) {
                Ok(h) => {
                    log::debug!("[Session] Subscribed {} as {}", destination, h);
                    *handle = Some(h);
                }
                Err(source) => failures.push(SessionError::Subscribe {
                    destination: destination.clone(),
                    source,
                }),
            }
        }
        for failure in failures {
            self.record(failure);
        }
    }

    fn clear_handles(&mut self) {
        for handle in self.subscriptions.values_mut() {
            *handle = None;
        }
    }

    /// Add `destination` to the desired set, subscribing now if connected.
    ///
    /// Returns `Ok(false)` when it was already present.
    pub fn add_subscription(&mut self, destination: &str) -> Result<bool, SessionError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(self.record(SessionError::InvalidInput(
                "destination is empty".to_string(),
            )));
        }
        if self.subscriptions.contains_key(destination) {
            return Ok(false);
        }

        self.subscriptions.insert(destination.to_string(), None);
        if self.status.is_connected() {
            match self.transport.subscribe(destination) {
                Ok(handle) => {
                    log::debug!("[Session] Subscribed {} as {}", destination, handle);
                    self.subscriptions.insert(destination.to_string(), Some(handle));
                }
                Err(source) => {
                    return Err(self.record(SessionError::Subscribe {
                        destination: destination.to_string(),
                        source,
                    }));
                }
            }
        }
        log::info!("[Session] Added subscription {}", destination);
        Ok(true)
    }

    /// Remove `destination`, unsubscribing a live handle.
    ///
    /// Returns `false` when it was not present.
    pub fn remove_subscription(&mut self, destination: &str) -> bool {
        let Some(handle) = self.subscriptions.shift_remove(destination.trim()) else {
            return false;
        };
        if let Some(handle) = handle {
            if let Err(e) = self.transport.unsubscribe(&handle) {
                log::warn!("[Session] Unsubscribe {} failed: {}", handle, e);
            }
        }
        log::info!("[Session] Removed subscription {}", destination.trim());
        true
    }

    // === Messages ===

    /// Publish `payload` on `destination`.
    ///
    /// Appends exactly one `sent` message on success and none on failure.
    pub fn publish(
        &mut self,
        destination: &str,
        payload: &str,
        mode: Mode,
    ) -> Result<(), SessionError> {
        if !self.status.is_connected() {
            return Err(self.record(SessionError::NotConnected));
        }
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(self.record(SessionError::InvalidInput(
                "destination is empty".to_string(),
            )));
        }

        let body = match mode {
            Mode::Raw => OutboundBody::Text(payload.to_string()),
            Mode::Structured => match self.encode_structured(payload) {
                Ok(bytes) => OutboundBody::Binary(bytes),
                Err(e) => return Err(self.record(e)),
            },
        };

        if let Err(e) = self.transport.publish(destination, body) {
            return Err(self.record(SessionError::Publish(e)));
        }

        self.messages
            .push(Message::new(Direction::Sent, destination, payload.to_string()));
        self.last_error = None;
        Ok(())
    }

    /// `{"TypeName": {...}}` -> verified, encoded bytes.
    fn encode_structured(&self, payload: &str) -> Result<Vec<u8>, SessionError> {
        let json: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| SessionError::MalformedPayload(e.to_string()))?;
        let serde_json::Value::Object(root) = json else {
            return Err(SessionError::MalformedPayload(
                "expected a JSON object keyed by message type".to_string(),
            ));
        };
        let key_count = root.len();
        let mut entries = root.into_iter();
        let (type_name, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(SessionError::MalformedPayload(format!(
                    "expected exactly one root key naming the message type, found {key_count}"
                )))
            }
        };

        let descriptor = self
            .registry
            .lookup_type(&type_name)
            .ok_or(SessionError::TypeNotFound(type_name))?;
        let message = schema::verify(&descriptor, &value).map_err(SessionError::Validation)?;
        Ok(schema::encode(&message))
    }

    fn on_frame_received(&mut self, destination: &str, body: InboundBody) {
        let content = match self.mode {
            Mode::Raw => body
                .text
                .or_else(|| body.binary.map(|b| String::from_utf8_lossy(&b).into_owned()))
                .unwrap_or_default(),
            Mode::Structured => self.decode_inbound(&body),
        };
        self.messages
            .push(Message::new(Direction::Received, destination, content));
    }

    /// Content for a structured-mode frame. Never fails; errors become text.
    fn decode_inbound(&self, body: &InboundBody) -> String {
        let Some(bytes) = &body.binary else {
            return match &body.text {
                Some(text) => format!("Unable to decode: {text}"),
                None => "Error: No message body found".to_string(),
            };
        };
        if self.registry.is_empty() {
            return "Error: Proto definition not loaded".to_string();
        }

        let descriptor = match &self.inbound_policy {
            InboundTypePolicy::FirstRegistered => self.registry.first_type(),
            InboundTypePolicy::Named(name) => self.registry.lookup_type(name),
        };
        let Some(descriptor) = descriptor else {
            return match &self.inbound_policy {
                InboundTypePolicy::Named(name) => format!("Error: Unknown message type: {name}"),
                InboundTypePolicy::FirstRegistered => {
                    "Error: No message type found in proto definition".to_string()
                }
            };
        };

        match schema::decode(&descriptor, bytes) {
            Ok(message) => schema::to_pretty_json(&message)
                .unwrap_or_else(|e| format!("Error decoding message: {e}")),
            Err(e) => format!("Error decoding message as {}: {e}", descriptor.full_name()),
        }
    }

    // === Schema ===

    /// Merge a batch of schema documents into the registry.
    pub async fn load_schema(
        &mut self,
        documents: Vec<SchemaDocument>,
    ) -> Result<LoadReport, SessionError> {
        match self.registry.load(documents, self.fetcher.as_ref()).await {
            Ok(report) => {
                self.last_error = None;
                Ok(report)
            }
            Err(e) => Err(self.record(SessionError::SchemaLoad(e))),
        }
    }

    /// Replace the registry with an empty one.
    pub fn reset_schema(&mut self) {
        log::info!("[Session] Schema registry reset");
        self.registry = SchemaRegistry::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        opened: Vec<OpenRequest>,
        subscribed: Vec<String>,
        unsubscribed: Vec<String>,
        published: Vec<(String, OutboundBody)>,
        closes: usize,
        close_fails: bool,
    }

    /// Records every call; lifecycle events are injected by the test.
    #[derive(Clone, Default)]
    struct FakeTransport {
        recorded: Arc<Mutex<Recorded>>,
        next_id: usize,
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        fn open(&mut self, request: OpenRequest, _events: EventSink) -> Result<(), TransportError> {
            self.recorded.lock().unwrap().opened.push(request);
            Ok(())
        }

        fn subscribe(&mut self, destination: &str) -> Result<SubscriptionHandle, TransportError> {
            self.next_id += 1;
            self.recorded
                .lock()
                .unwrap()
                .subscribed
                .push(destination.to_string());
            Ok(SubscriptionHandle(format!("sub-{}", self.next_id)))
        }

        fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
            self.recorded.lock().unwrap().unsubscribed.push(handle.0.clone());
            Ok(())
        }

        fn publish(&mut self, destination: &str, body: OutboundBody) -> Result<(), TransportError> {
            self.recorded
                .lock()
                .unwrap()
                .published
                .push((destination.to_string(), body));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.closes += 1;
            if recorded.close_fails {
                return Err(TransportError::CloseFailed("socket already gone".into()));
            }
            Ok(())
        }
    }

    struct NoImports;

    #[async_trait::async_trait]
    impl ImportFetcher for NoImports {
        async fn fetch(&self, path: &str) -> anyhow::Result<String> {
            anyhow::bail!("no import {path}")
        }
    }

    const CHAT: &str = r#"
        syntax = "proto3";
        package chat;
        message ChatMessage {
            string sender = 1;
            string text = 2;
        }
    "#;

    fn manager() -> (SessionManager<FakeTransport>, Arc<Mutex<Recorded>>) {
        let transport = FakeTransport::default();
        let recorded = Arc::clone(&transport.recorded);
        let (manager, _events) = SessionManager::new(transport, Box::new(NoImports));
        (manager, recorded)
    }

    fn event(generation: u64, kind: TransportEventKind) -> TransportEvent {
        TransportEvent { generation, kind }
    }

    async fn connected() -> (SessionManager<FakeTransport>, Arc<Mutex<Recorded>>) {
        let (mut manager, recorded) = manager();
        manager.connect("ws://broker/ws", Vec::new()).await.unwrap();
        let generation = manager.connection().unwrap().generation;
        manager.handle_event(event(generation, TransportEventKind::Connected));
        (manager, recorded)
    }

    fn frame(handle: &str, destination: &str, body: InboundBody) -> TransportEventKind {
        TransportEventKind::Frame {
            handle: SubscriptionHandle(handle.to_string()),
            destination: destination.to_string(),
            body,
        }
    }

    #[tokio::test]
    async fn test_failed_teardown_still_disconnects() {
        let (mut manager, recorded) = connected().await;
        recorded.lock().unwrap().close_fails = true;

        let err = manager.disconnect().await.unwrap_err();
        assert!(matches!(err, SessionError::Teardown(_)));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager
            .last_error()
            .is_some_and(|e| e.starts_with("Error disconnecting")));
        assert!(manager.connection().is_none());
        assert_eq!(recorded.lock().unwrap().closes, 1);

        // A later connect reopens cleanly.
        recorded.lock().unwrap().close_fails = false;
        manager.connect("ws://broker/ws", Vec::new()).await.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(recorded.lock().unwrap().opened.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_address() {
        let (mut manager, recorded) = manager();
        let err = manager.connect("   ", Vec::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidInput(_)));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.last_error().is_some());
        assert!(recorded.lock().unwrap().opened.is_empty());
    }

    #[tokio::test]
    async fn test_connect_then_connected_event() {
        let (mut manager, recorded) = manager();
        manager
            .connect("ws://broker/ws", vec![("login".into(), "bob".into())])
            .await
            .unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        let request = recorded.lock().unwrap().opened[0].clone();
        assert_eq!(request.address, "ws://broker/ws");
        assert_eq!(request.headers, vec![("login".to_string(), "bob".to_string())]);

        manager.handle_event(event(request.generation, TransportEventKind::Connected));
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert!(manager.last_error().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let (mut manager, recorded) = manager();
        manager.disconnect().await.unwrap();
        assert_eq!(recorded.lock().unwrap().closes, 0);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_late_connected_after_disconnect_is_ignored() {
        let (mut manager, recorded) = manager();
        manager.connect("ws://broker/ws", Vec::new()).await.unwrap();
        let generation = manager.connection().unwrap().generation;
        manager.disconnect().await.unwrap();

        manager.handle_event(event(generation, TransportEventKind::Connected));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(recorded.lock().unwrap().closes, 1);
    }

    #[tokio::test]
    async fn test_subscriptions_materialize_in_insertion_order() {
        let (mut manager, recorded) = manager();
        assert!(manager.add_subscription("/topic/b").unwrap());
        assert!(manager.add_subscription("/topic/a").unwrap());
        assert!(!manager.add_subscription("/topic/b").unwrap());
        assert!(recorded.lock().unwrap().subscribed.is_empty());

        manager.connect("ws://broker/ws", Vec::new()).await.unwrap();
        let generation = manager.connection().unwrap().generation;
        manager.handle_event(event(generation, TransportEventKind::Connected));

        assert_eq!(recorded.lock().unwrap().subscribed, vec!["/topic/b", "/topic/a"]);
        assert!(manager.is_materialized("/topic/a"));
        assert!(manager.is_materialized("/topic/b"));
    }

    #[tokio::test]
    async fn test_subscriptions_survive_disconnect() {
        let (mut manager, recorded) = connected().await;
        manager.add_subscription("/topic/x").unwrap();
        assert!(manager.is_materialized("/topic/x"));

        manager.disconnect().await.unwrap();
        assert!(!manager.is_materialized("/topic/x"));
        assert_eq!(manager.subscriptions().collect::<Vec<_>>(), vec!["/topic/x"]);

        manager.connect("ws://broker/ws", Vec::new()).await.unwrap();
        let generation = manager.connection().unwrap().generation;
        manager.handle_event(event(generation, TransportEventKind::Connected));
        assert!(manager.is_materialized("/topic/x"));
        assert_eq!(recorded.lock().unwrap().subscribed.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_subscription_unsubscribes_live_handle() {
        let (mut manager, recorded) = connected().await;
        manager.add_subscription("/topic/x").unwrap();
        assert!(manager.remove_subscription("/topic/x"));
        assert!(!manager.remove_subscription("/topic/x"));
        assert_eq!(recorded.lock().unwrap().unsubscribed, vec!["sub-1"]);
    }

    #[test]
    fn test_publish_requires_connection() {
        let (mut manager, recorded) = manager();
        let err = manager.publish("/app/x", "hi", Mode::Raw).unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        assert!(manager.messages().is_empty());
        assert!(recorded.lock().unwrap().published.is_empty());
    }

    #[tokio::test]
    async fn test_raw_publish_appends_sent_message() {
        let (mut manager, recorded) = connected().await;
        manager.publish("/app/x", "hello", Mode::Raw).unwrap();

        assert_eq!(
            recorded.lock().unwrap().published,
            vec![("/app/x".to_string(), OutboundBody::Text("hello".into()))]
        );
        let message = &manager.messages()[0];
        assert_eq!(message.direction(), Direction::Sent);
        assert_eq!(message.destination(), "/app/x");
        assert_eq!(message.content(), "hello");
    }

    #[tokio::test]
    async fn test_structured_publish_errors_leave_timeline_untouched() {
        let (mut manager, recorded) = connected().await;
        manager
            .load_schema(vec![SchemaDocument::new("chat.proto", CHAT)])
            .await
            .unwrap();

        let err = manager.publish("/app/x", "not json", Mode::Structured).unwrap_err();
        assert!(matches!(err, SessionError::MalformedPayload(_)));

        let err = manager
            .publish("/app/x", r#"{"A": {}, "B": {}}"#, Mode::Structured)
            .unwrap_err();
        assert!(matches!(err, SessionError::MalformedPayload(_)));

        let err = manager
            .publish("/app/x", r#"{"Nope": {}}"#, Mode::Structured)
            .unwrap_err();
        assert!(matches!(err, SessionError::TypeNotFound(ref name) if name == "Nope"));
        assert_eq!(manager.last_error(), Some("Unknown message type: Nope"));

        let err = manager
            .publish("/app/x", r#"{"ChatMessage": {"colour": "red"}}"#, Mode::Structured)
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));

        assert!(manager.messages().is_empty());
        assert!(recorded.lock().unwrap().published.is_empty());
    }

    #[tokio::test]
    async fn test_structured_round_trip_through_inbound_frame() {
        let (mut manager, recorded) = connected().await;
        manager
            .load_schema(vec![SchemaDocument::new("chat.proto", CHAT)])
            .await
            .unwrap();
        manager.set_mode(Mode::Structured);
        manager.add_subscription("/topic/chat").unwrap();

        let payload = r#"{"chatMessage": {"sender": "ann", "text": "hi"}}"#;
        manager.publish("/app/chat", payload, Mode::Structured).unwrap();
        let bytes = match &recorded.lock().unwrap().published[0].1 {
            OutboundBody::Binary(bytes) => bytes.clone(),
            other => panic!("expected binary body, got {other:?}"),
        };

        let generation = manager.connection().unwrap().generation;
        manager.handle_event(event(
            generation,
            frame(
                "sub-1",
                "/topic/chat",
                InboundBody {
                    text: None,
                    binary: Some(bytes),
                },
            ),
        ));

        let received = &manager.messages()[1];
        assert_eq!(received.direction(), Direction::Received);
        let json: serde_json::Value = serde_json::from_str(received.content()).unwrap();
        assert_eq!(json["sender"], "ann");
        assert_eq!(json["text"], "hi");
    }

    #[tokio::test]
    async fn test_structured_inbound_failures_become_content() {
        let (mut manager, _recorded) = connected().await;
        manager.set_mode(Mode::Structured);
        manager.add_subscription("/topic/x").unwrap();
        let generation = manager.connection().unwrap().generation;

        let binary = InboundBody {
            text: None,
            binary: Some(vec![0xff, 0xff, 0xff]),
        };
        manager.handle_event(event(generation, frame("sub-1", "/topic/x", binary.clone())));
        assert_eq!(manager.messages()[0].content(), "Error: Proto definition not loaded");

        manager
            .load_schema(vec![SchemaDocument::new("chat.proto", CHAT)])
            .await
            .unwrap();
        manager.handle_event(event(generation, frame("sub-1", "/topic/x", binary)));
        assert!(manager.messages()[1].content().starts_with("Error decoding message"));

        let text = InboundBody {
            text: Some("plain".into()),
            binary: None,
        };
        manager.handle_event(event(generation, frame("sub-1", "/topic/x", text)));
        assert_eq!(manager.messages()[2].content(), "Unable to decode: plain");

        manager.handle_event(event(generation, frame("sub-1", "/topic/x", InboundBody::default())));
        assert_eq!(manager.messages()[3].content(), "Error: No message body found");
    }

    #[tokio::test]
    async fn test_named_inbound_policy_unknown_type() {
        let (mut manager, _recorded) = connected().await;
        manager
            .load_schema(vec![SchemaDocument::new("chat.proto", CHAT)])
            .await
            .unwrap();
        manager.set_mode(Mode::Structured);
        manager.set_inbound_policy(InboundTypePolicy::Named("Missing".into()));
        manager.add_subscription("/topic/x").unwrap();
        let generation = manager.connection().unwrap().generation;

        let body = InboundBody {
            text: None,
            binary: Some(Vec::new()),
        };
        manager.handle_event(event(generation, frame("sub-1", "/topic/x", body)));
        assert_eq!(manager.messages()[0].content(), "Error: Unknown message type: Missing");
    }

    #[tokio::test]
    async fn test_raw_inbound_binary_is_lossy_text() {
        let (mut manager, _recorded) = connected().await;
        manager.add_subscription("/topic/x").unwrap();
        let generation = manager.connection().unwrap().generation;

        let body = InboundBody {
            text: None,
            binary: Some(b"abc".to_vec()),
        };
        manager.handle_event(event(generation, frame("sub-1", "/topic/x", body)));
        assert_eq!(manager.messages()[0].content(), "abc");
    }

    #[tokio::test]
    async fn test_frames_for_removed_subscription_are_dropped() {
        let (mut manager, _recorded) = connected().await;
        manager.add_subscription("/topic/x").unwrap();
        manager.remove_subscription("/topic/x");
        let generation = manager.connection().unwrap().generation;

        let body = InboundBody {
            text: Some("late".into()),
            binary: None,
        };
        manager.handle_event(event(generation, frame("sub-1", "/topic/x", body)));
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn test_error_event_sets_status_and_message() {
        let (mut manager, _recorded) = connected().await;
        manager.add_subscription("/topic/x").unwrap();
        let generation = manager.connection().unwrap().generation;

        manager.handle_event(event(generation, TransportEventKind::Error("Bad login".into())));
        assert_eq!(manager.status(), ConnectionStatus::Error);
        assert_eq!(manager.last_error(), Some("STOMP error: Bad login"));
        assert!(!manager.is_materialized("/topic/x"));

        // Retriable from Error.
        manager.connect("ws://broker/ws", Vec::new()).await.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_reset_schema_clears_types() {
        let (mut manager, _recorded) = manager();
        manager
            .load_schema(vec![SchemaDocument::new("chat.proto", CHAT)])
            .await
            .unwrap();
        assert_eq!(manager.type_names(), vec!["chat.ChatMessage"]);
        manager.reset_schema();
        assert!(manager.type_names().is_empty());
    }

    #[tokio::test]
    async fn test_view_snapshot() {
        let (mut manager, _recorded) = connected().await;
        manager.add_subscription("/topic/x").unwrap();
        manager.publish("/app/x", "hi", Mode::Raw).unwrap();

        let view = manager.view();
        assert_eq!(view.status, ConnectionStatus::Connected);
        assert_eq!(view.address, Some("ws://broker/ws"));
        assert_eq!(view.subscriptions, vec![("/topic/x", true)]);
        assert_eq!(view.messages.len(), 1);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "connected");
    }
}

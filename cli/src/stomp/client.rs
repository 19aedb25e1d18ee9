//! STOMP-over-WebSocket implementation of [`Transport`].
//!
//! # Architecture
//!
//! ```text
//!   StompTransport                      session task (one per open())
//!        │                                     │
//!        │ subscribe/unsubscribe/publish       │ CONNECT ─► CONNECTED | ERROR
//!        │ ─────── SessionCommand ───────────► │ SUBSCRIBE / UNSUBSCRIBE / SEND
//!        │                                     │ MESSAGE ─► Frame event
//!        │ close() ──── Close ───────────────► │ DISCONNECT ─► RECEIPT ─► close
//!        │                                     │
//!        ◄──────── TransportEvent (generation) ┘
//! ```
//!
//! The task owns the socket and the subscription-id → destination table.
//! Subscription ids are allocated by [`StompTransport`] so `subscribe()` can
//! hand out a handle without a round-trip.
//!
//! There is no automatic reconnect. A lost session ends with a
//! `Disconnected` event and the session manager decides what happens next.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::frame::{self, Command, Decoded, StompFrame, CONTENT_TYPE};
use crate::constants::{
    CLOSE_JOIN_TIMEOUT, COMMAND_BUFFER, CONNECT_TIMEOUT, DISCONNECT_RECEIPT_ID,
    DISCONNECT_RECEIPT_TIMEOUT, STOMP_ACCEPT_VERSION,
};
use crate::transport::{
    EventSink, InboundBody, OpenRequest, OutboundBody, SubscriptionHandle, Transport,
    TransportError, TransportEvent, TransportEventKind,
};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Command queued from [`StompTransport`] to the session task.
#[derive(Debug)]
enum SessionCommand {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
    Send { destination: String, body: OutboundBody },
    Close,
}

/// Handles for the currently running session task.
#[derive(Debug)]
struct ActiveSession {
    command_tx: mpsc::Sender<SessionCommand>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// STOMP 1.2 client over a WebSocket.
#[derive(Debug)]
pub struct StompTransport {
    heartbeat_ms: u64,
    next_subscription: u64,
    session: Option<ActiveSession>,
}

impl StompTransport {
    /// Create a transport that offers `heartbeat_ms` in both directions.
    ///
    /// `0` disables heart-beating.
    #[must_use]
    pub fn new(heartbeat_ms: u64) -> Self {
        Self {
            heartbeat_ms,
            next_subscription: 0,
            session: None,
        }
    }

    fn connected_session(&self) -> Result<&ActiveSession, TransportError> {
        match &self.session {
            Some(session) if session.connected.load(Ordering::SeqCst) => Ok(session),
            _ => Err(TransportError::NotConnected),
        }
    }
}

fn queue(session: &ActiveSession, command: SessionCommand) -> Result<(), TransportError> {
    session.command_tx.try_send(command).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => {
            TransportError::CommandFailed("session command queue is full".to_string())
        }
        mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected,
    })
}

#[async_trait]
impl Transport for StompTransport {
    fn open(&mut self, request: OpenRequest, events: EventSink) -> Result<(), TransportError> {
        if let Some(stale) = self.session.take() {
            log::warn!("[Stomp] open() with a live session; aborting the old task");
            stale.task.abort();
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let connected = Arc::new(AtomicBool::new(false));
        let ctx = SessionContext {
            request,
            heartbeat_ms: self.heartbeat_ms,
            events,
            connected: Arc::clone(&connected),
        };
        let task = tokio::spawn(run_session(ctx, command_rx));

        self.session = Some(ActiveSession {
            command_tx,
            connected,
            task,
        });
        Ok(())
    }

    fn subscribe(&mut self, destination: &str) -> Result<SubscriptionHandle, TransportError> {
        let id = format!("sub-{}", self.next_subscription);
        let session = self.connected_session()?;
        queue(
            session,
            SessionCommand::Subscribe {
                id: id.clone(),
                destination: destination.to_string(),
            },
        )?;
        self.next_subscription += 1;
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        match queue(session, SessionCommand::Unsubscribe { id: handle.0.clone() }) {
            Err(TransportError::NotConnected) => Ok(()),
            other => other,
        }
    }

    fn publish(&mut self, destination: &str, body: OutboundBody) -> Result<(), TransportError> {
        let session = self.connected_session()?;
        queue(
            session,
            SessionCommand::Send {
                destination: destination.to_string(),
                body,
            },
        )
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        // A closed queue means the task already finished on its own.
        let _ = session.command_tx.try_send(SessionCommand::Close);

        match tokio::time::timeout(CLOSE_JOIN_TIMEOUT, &mut session.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::CloseFailed(format!("session task failed: {e}"))),
            Err(_) => {
                session.task.abort();
                Err(TransportError::CloseFailed(format!(
                    "session did not stop within {}s",
                    CLOSE_JOIN_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.task.abort();
        }
    }
}

/// Everything the session task needs besides its command queue.
struct SessionContext {
    request: OpenRequest,
    heartbeat_ms: u64,
    events: EventSink,
    connected: Arc<AtomicBool>,
}

impl SessionContext {
    fn emit(&self, kind: TransportEventKind) {
        let _ = self.events.send(TransportEvent {
            generation: self.request.generation,
            kind,
        });
    }
}

/// Result of the STOMP handshake.
enum Handshake {
    Connected {
        writer: WsWriter,
        reader: WsReader,
        outgoing_heartbeat: Option<Duration>,
    },
    Rejected(String),
}

async fn run_session(ctx: SessionContext, mut command_rx: mpsc::Receiver<SessionCommand>) {
    log::info!("[Stomp] Connecting to {}", ctx.request.address);

    let outcome = tokio::select! {
        result = tokio::time::timeout(CONNECT_TIMEOUT, handshake(&ctx)) => result,
        () = wait_for_close(&mut command_rx) => {
            log::info!("[Stomp] Close requested during handshake");
            ctx.emit(TransportEventKind::Disconnected);
            return;
        }
    };

    let (mut writer, mut reader, outgoing_heartbeat) = match outcome {
        Ok(Ok(Handshake::Connected {
            writer,
            reader,
            outgoing_heartbeat,
        })) => (writer, reader, outgoing_heartbeat),
        Ok(Ok(Handshake::Rejected(diagnostic))) => {
            log::warn!("[Stomp] Broker rejected CONNECT: {}", diagnostic);
            ctx.emit(TransportEventKind::Error(diagnostic));
            return;
        }
        Ok(Err(e)) => {
            log::warn!("[Stomp] Handshake failed: {:#}", e);
            ctx.emit(TransportEventKind::Error(format!("{e:#}")));
            return;
        }
        Err(_) => {
            log::warn!("[Stomp] Handshake timed out");
            ctx.emit(TransportEventKind::Error(format!(
                "no CONNECTED frame within {}s",
                CONNECT_TIMEOUT.as_secs()
            )));
            return;
        }
    };

    ctx.connected.store(true, Ordering::SeqCst);
    log::info!("[Stomp] Connected");
    ctx.emit(TransportEventKind::Connected);

    let exit = run_message_loop(
        &ctx,
        &mut writer,
        &mut reader,
        &mut command_rx,
        outgoing_heartbeat,
    )
    .await;

    ctx.connected.store(false, Ordering::SeqCst);
    match exit {
        LoopExit::Closed => {
            graceful_disconnect(&mut writer, &mut reader).await;
            ctx.emit(TransportEventKind::Disconnected);
        }
        LoopExit::Lost => ctx.emit(TransportEventKind::Disconnected),
        LoopExit::BrokerError(diagnostic) => {
            let _ = writer.close().await;
            ctx.emit(TransportEventKind::Error(diagnostic));
        }
    }
    log::info!("[Stomp] Session ended");
}

/// Resolve once a `Close` command arrives or the transport is dropped.
async fn wait_for_close(command_rx: &mut mpsc::Receiver<SessionCommand>) {
    while let Some(command) = command_rx.recv().await {
        if matches!(command, SessionCommand::Close) {
            return;
        }
        log::debug!("[Stomp] Ignoring {:?} before CONNECTED", command);
    }
}

async fn handshake(ctx: &SessionContext) -> Result<Handshake> {
    let (mut writer, mut reader) = ws::connect(&ctx.request.address, &[]).await?;

    let mut connect = StompFrame::new(Command::Connect)
        .header("accept-version", STOMP_ACCEPT_VERSION)
        .header("host", host_of(&ctx.request.address))
        .header(
            "heart-beat",
            format!("{},{}", ctx.heartbeat_ms, ctx.heartbeat_ms),
        );
    for (name, value) in &ctx.request.headers {
        connect = connect.header(name.clone(), value.clone());
    }
    writer.send_text(frame_text(&connect)).await?;

    while let Some(msg) = reader.recv().await {
        let data = match msg? {
            WsMessage::Text(text) => text.into_bytes(),
            WsMessage::Binary(data) => data,
            WsMessage::Ping(data) => {
                writer.send_pong(data).await?;
                continue;
            }
            WsMessage::Close { code, reason } => {
                bail!("socket closed during handshake ({code}: {reason})")
            }
        };
        for unit in frame::decode_all(&data)? {
            let Decoded::Frame(reply) = unit else {
                continue;
            };
            match reply.command {
                Command::Connected => {
                    let outgoing_heartbeat =
                        negotiate_heartbeat(ctx.heartbeat_ms, reply.get("heart-beat"));
                    log::debug!(
                        "[Stomp] CONNECTED version={:?} heart-beat={:?}",
                        reply.get("version"),
                        outgoing_heartbeat
                    );
                    return Ok(Handshake::Connected {
                        writer,
                        reader,
                        outgoing_heartbeat,
                    });
                }
                Command::Error => return Ok(Handshake::Rejected(error_diagnostic(&reply))),
                other => log::debug!("[Stomp] Ignoring {} before CONNECTED", other),
            }
        }
    }

    bail!("socket ended during handshake")
}

/// Why the message loop stopped.
enum LoopExit {
    /// `Close` requested (or the transport was dropped).
    Closed,
    /// Socket closed or failed underneath us.
    Lost,
    /// Broker sent ERROR.
    BrokerError(String),
}

async fn run_message_loop(
    ctx: &SessionContext,
    writer: &mut WsWriter,
    reader: &mut WsReader,
    command_rx: &mut mpsc::Receiver<SessionCommand>,
    outgoing_heartbeat: Option<Duration>,
) -> LoopExit {
    // Subscription id -> destination
    let mut subscriptions: HashMap<String, String> = HashMap::new();
    let mut heartbeat = outgoing_heartbeat.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else {
                    return LoopExit::Closed;
                };
                let outgoing = match command {
                    SessionCommand::Close => return LoopExit::Closed,
                    SessionCommand::Subscribe { id, destination } => {
                        log::debug!("[Stomp] SUBSCRIBE {} -> {}", id, destination);
                        subscriptions.insert(id.clone(), destination.clone());
                        StompFrame::new(Command::Subscribe)
                            .header("id", id)
                            .header("destination", destination)
                            .header("ack", "auto")
                    }
                    SessionCommand::Unsubscribe { id } => {
                        if subscriptions.remove(&id).is_none() {
                            continue;
                        }
                        log::debug!("[Stomp] UNSUBSCRIBE {}", id);
                        StompFrame::new(Command::Unsubscribe).header("id", id)
                    }
                    SessionCommand::Send { destination, body } => send_frame(destination, body),
                };
                if let Err(e) = write_frame(writer, &outgoing).await {
                    log::warn!("[Stomp] Write failed: {:#}", e);
                    return LoopExit::Lost;
                }
            }
            msg = reader.recv() => {
                let (data, binary_message) = match msg {
                    Some(Ok(WsMessage::Text(text))) => (text.into_bytes(), false),
                    Some(Ok(WsMessage::Binary(data))) => (data, true),
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = writer.send_pong(data).await;
                        continue;
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("[Stomp] Socket closed by broker ({}: {})", code, reason);
                        return LoopExit::Lost;
                    }
                    Some(Err(e)) => {
                        log::warn!("[Stomp] Read failed: {:#}", e);
                        return LoopExit::Lost;
                    }
                    None => return LoopExit::Lost,
                };
                let units = match frame::decode_all(&data) {
                    Ok(units) => units,
                    Err(e) => {
                        log::warn!("[Stomp] Dropping undecodable WebSocket message: {:#}", e);
                        continue;
                    }
                };
                for unit in units {
                    let Decoded::Frame(inbound) = unit else {
                        continue;
                    };
                    match inbound.command {
                        Command::Message => route_message(ctx, &subscriptions, inbound, binary_message),
                        Command::Error => return LoopExit::BrokerError(error_diagnostic(&inbound)),
                        other => log::debug!("[Stomp] Ignoring {} frame", other),
                    }
                }
            }
            () = next_tick(&mut heartbeat) => {
                if let Err(e) = writer.send_text("\n".to_string()).await {
                    log::warn!("[Stomp] Heart-beat failed: {:#}", e);
                    return LoopExit::Lost;
                }
            }
        }
    }
}

async fn next_tick(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn route_message(
    ctx: &SessionContext,
    subscriptions: &HashMap<String, String>,
    message: StompFrame,
    binary_message: bool,
) {
    let Some(id) = message.get("subscription").map(str::to_string) else {
        log::warn!("[Stomp] MESSAGE without subscription header");
        return;
    };
    let Some(subscribed) = subscriptions.get(&id) else {
        log::debug!("[Stomp] MESSAGE for unknown subscription {}", id);
        return;
    };
    let destination = message
        .get("destination")
        .map_or_else(|| subscribed.clone(), str::to_string);
    let content_type = message.get(CONTENT_TYPE).map(str::to_string);
    let body = inbound_body(content_type.as_deref(), binary_message, message.body);

    ctx.emit(TransportEventKind::Frame {
        handle: SubscriptionHandle(id),
        destination,
        body,
    });
}

/// Split a frame body into its text and binary views.
///
/// The binary view is withheld when the frame declares a textual content
/// type and arrived as a text WebSocket message.
fn inbound_body(content_type: Option<&str>, binary_message: bool, body: Vec<u8>) -> InboundBody {
    let textual = content_type.is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.starts_with("text/") || ct.contains("json") || ct.contains("xml")
    });
    let text = std::str::from_utf8(&body).ok().map(str::to_string);
    let binary = (binary_message || !textual).then_some(body);
    InboundBody { text, binary }
}

fn send_frame(destination: String, body: OutboundBody) -> StompFrame {
    let frame = StompFrame::new(Command::Send).header("destination", destination);
    match body {
        OutboundBody::Text(text) => frame
            .header(CONTENT_TYPE, "text/plain;charset=utf-8")
            .with_body(text),
        OutboundBody::Binary(data) => frame
            .header(CONTENT_TYPE, "application/octet-stream")
            .with_body(data),
    }
}

/// Send a frame as a text message when its bytes are UTF-8, else as binary.
async fn write_frame(writer: &mut WsWriter, outgoing: &StompFrame) -> Result<()> {
    let bytes = outgoing.encode();
    match String::from_utf8(bytes) {
        Ok(text) if outgoing_is_textual(outgoing) => writer.send_text(text).await,
        Ok(text) => writer.send_binary(text.into_bytes()).await,
        Err(e) => writer.send_binary(e.into_bytes()).await,
    }
}

fn outgoing_is_textual(outgoing: &StompFrame) -> bool {
    outgoing
        .get(CONTENT_TYPE)
        .map_or(true, |ct| ct.starts_with("text/"))
}

fn frame_text(outgoing: &StompFrame) -> String {
    String::from_utf8_lossy(&outgoing.encode()).into_owned()
}

/// Send DISCONNECT and wait (bounded) for its RECEIPT, then close the socket.
async fn graceful_disconnect(writer: &mut WsWriter, reader: &mut WsReader) {
    let disconnect = StompFrame::new(Command::Disconnect).header("receipt", DISCONNECT_RECEIPT_ID);
    if let Err(e) = writer.send_text(frame_text(&disconnect)).await {
        log::debug!("[Stomp] DISCONNECT not sent: {:#}", e);
        return;
    }

    let receipt = tokio::time::timeout(DISCONNECT_RECEIPT_TIMEOUT, async {
        while let Some(Ok(msg)) = reader.recv().await {
            let data = match msg {
                WsMessage::Text(text) => text.into_bytes(),
                WsMessage::Binary(data) => data,
                WsMessage::Ping(_) => continue,
                WsMessage::Close { .. } => return false,
            };
            let Ok(units) = frame::decode_all(&data) else {
                continue;
            };
            let got_receipt = units.iter().any(|unit| {
                matches!(unit, Decoded::Frame(f)
                    if f.command == Command::Receipt
                        && f.get("receipt-id") == Some(DISCONNECT_RECEIPT_ID))
            });
            if got_receipt {
                return true;
            }
        }
        false
    })
    .await;

    if !matches!(receipt, Ok(true)) {
        log::debug!("[Stomp] No RECEIPT for DISCONNECT; closing anyway");
    }
    if let Err(e) = writer.close().await {
        log::debug!("[Stomp] Socket close: {:#}", e);
    }
}

/// Diagnostic for an ERROR frame: its `message` header, else its body.
fn error_diagnostic(error: &StompFrame) -> String {
    match error.get("message") {
        Some(message) => message.to_string(),
        None => String::from_utf8_lossy(&error.body).trim().to_string(),
    }
}

/// Host part of a broker URL, used for the CONNECT `host` header.
fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if authority.starts_with('[') {
        return authority
            .split_once(']')
            .map_or(authority, |(host, _)| host)
            .trim_start_matches('[')
            .to_string();
    }
    authority.split(':').next().unwrap_or(authority).to_string()
}

/// Outgoing heart-beat period from the client offer and CONNECTED header.
///
/// Per STOMP 1.2 the client sends every `max(cx, sy)` ms when both are
/// non-zero, where `sy` is the second value the server returned.
fn negotiate_heartbeat(client_ms: u64, server_header: Option<&str>) -> Option<Duration> {
    let server_wants = server_header
        .and_then(|h| h.split(',').nth(1))
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (client_ms != 0 && server_wants != 0)
        .then(|| Duration::from_millis(client_ms.max(server_wants)))
}

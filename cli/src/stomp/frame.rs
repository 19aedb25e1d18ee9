//! STOMP 1.2 frame codec.
//!
//! ```text
//! COMMAND EOL
//! name:value EOL      (zero or more)
//! EOL
//! body NUL
//! ```
//!
//! EOL is `\n` with an optional preceding `\r`. Header names and values are
//! escaped (`\\`, `\n`, `\r`, `\c`) on every command except CONNECT and
//! CONNECTED. A bare EOL outside a frame is a heart-beat.
//!
//! When a `content-length` header is present the body is exactly that many
//! octets and may contain NUL; otherwise the body runs to the first NUL.

// Rust guideline compliant 2026-02

use anyhow::{anyhow, bail, Result};

/// Header carrying the body length in octets.
pub const CONTENT_LENGTH: &str = "content-length";

/// Header carrying the body MIME type.
pub const CONTENT_TYPE: &str = "content-type";

/// Frame commands, client and server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Client handshake (1.2 alias of CONNECT).
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Client publish.
    Send,
    /// Client subscribe.
    Subscribe,
    /// Client unsubscribe.
    Unsubscribe,
    /// Client acknowledgement.
    Ack,
    /// Client negative acknowledgement.
    Nack,
    /// Client transaction start.
    Begin,
    /// Client transaction commit.
    Commit,
    /// Client transaction abort.
    Abort,
    /// Client graceful shutdown.
    Disconnect,
    /// Server delivery on a subscription.
    Message,
    /// Server receipt for a frame carrying a `receipt` header.
    Receipt,
    /// Server error; the connection is closed afterwards.
    Error,
}

impl Command {
    /// Wire name of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a wire command name.
    pub fn parse(name: &str) -> Option<Self> {
        let command = match name {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(command)
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first one wins.
    pub headers: Vec<(String, String)>,
    /// Raw body octets.
    pub body: Vec<u8>,
}

/// Unit produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame.
    Frame(StompFrame),
    /// A heart-beat EOL.
    Heartbeat,
}

impl StompFrame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode to wire bytes, adding `content-length` for non-empty bodies
    /// that do not already declare one.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            push_header_part(&mut out, name, escape);
            out.push(b':');
            push_header_part(&mut out, value, escape);
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get(CONTENT_LENGTH).is_none() {
            out.extend_from_slice(format!("{CONTENT_LENGTH}:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

fn push_header_part(out: &mut Vec<u8>, text: &str, escape: bool) {
    if !escape {
        out.extend_from_slice(text.as_bytes());
        return;
    }
    for ch in text.chars() {
        match ch {
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            ':' => out.extend_from_slice(b"\\c"),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => bail!("undefined header escape \\{other}"),
            None => bail!("dangling backslash in header"),
        }
    }
    Ok(out)
}

/// Split the next EOL-terminated line off `data[pos..]`.
///
/// Returns the line without its EOL and the position after the EOL, or
/// `None` if no EOL is present yet.
fn next_line(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rel = data[pos..].iter().position(|&b| b == b'\n')?;
    let mut line = &data[pos..pos + rel];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some((line, pos + rel + 1))
}

/// Decode one unit from the front of `data`.
///
/// Returns `Ok(None)` if `data` does not yet hold a complete unit, otherwise
/// the unit and the number of bytes consumed.
pub fn decode(data: &[u8]) -> Result<Option<(Decoded, usize)>> {
    if data.is_empty() {
        return Ok(None);
    }
    if data[0] == b'\n' {
        return Ok(Some((Decoded::Heartbeat, 1)));
    }
    if data.starts_with(b"\r\n") {
        return Ok(Some((Decoded::Heartbeat, 2)));
    }

    let Some((command_line, mut pos)) = next_line(data, 0) else {
        return Ok(None);
    };
    let command_name = std::str::from_utf8(command_line)
        .map_err(|e| anyhow!("command is not UTF-8: {e}"))?;
    let command =
        Command::parse(command_name).ok_or_else(|| anyhow!("unknown command: {command_name}"))?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let Some((line, next)) = next_line(data, pos) else {
            return Ok(None);
        };
        pos = next;
        if line.is_empty() {
            break;
        }
        let line = std::str::from_utf8(line).map_err(|e| anyhow!("header is not UTF-8: {e}"))?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed header line: {line}"))?;
        if escape {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == CONTENT_LENGTH)
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| anyhow!("invalid content-length {v:?}: {e}"))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .ok_or_else(|| anyhow!("content-length {len} overflows"))?;
            if data.len() <= end {
                return Ok(None);
            }
            if data[end] != 0 {
                bail!("frame body is not NUL-terminated after content-length {len}");
            }
            end
        }
        None => match data[pos..].iter().position(|&b| b == 0) {
            Some(rel) => pos + rel,
            None => return Ok(None),
        },
    };

    let frame = StompFrame {
        command,
        headers,
        body: data[pos..body_end].to_vec(),
    };
    Ok(Some((Decoded::Frame(frame), body_end + 1)))
}

/// Decode every unit in a complete WebSocket message.
///
/// # Errors
///
/// Returns an error on malformed input or a truncated trailing frame.
pub fn decode_all(data: &[u8]) -> Result<Vec<Decoded>> {
    let mut units = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        match decode(&data[pos..])? {
            Some((unit, used)) => {
                units.push(unit);
                pos += used;
            }
            None => bail!("truncated frame ({} trailing bytes)", data.len() - pos),
        }
    }
    Ok(units)
}

//! STOMP 1.2 frame codec.
//!
//! One frame travels per WebSocket text message. A message made only of
//! end-of-line characters is a heart-beat, not a frame.
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) on every frame except
//! `CONNECT` and `CONNECTED`, which the protocol leaves raw.

use std::fmt;
use std::time::Duration;

use crate::errors::RealtimeError;

/// Protocol version this client speaks.
pub const ACCEPT_VERSION: &str = "1.2";

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Frame command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Server handshake reply.
    Connected,
    /// Client publish.
    Send,
    /// Client subscription request.
    Subscribe,
    /// Client subscription removal.
    Unsubscribe,
    /// Client goodbye.
    Disconnect,
    /// Server delivery on a subscription.
    Message,
    /// Server acknowledgement of a `receipt` header.
    Receipt,
    /// Server error; the server closes the connection after sending it.
    Error,
}

impl Command {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

/// A single STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first wins on lookup.
    pub headers: Vec<(String, String)>,
    /// UTF-8 body.
    pub body: String,
}

impl Frame {
    /// Empty frame with the given command.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
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

    /// `CONNECT` frame carrying the virtual host, heart-beat offer and an
    /// optional bearer token.
    pub fn connect(host: &str, token: Option<&str>, heart_beat: HeartBeat) -> Self {
        let mut frame = Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", heart_beat.to_string());
        if let Some(token) = token {
            frame = frame.header("Authorization", format!("Bearer {token}"));
        }
        frame
    }

    /// `SUBSCRIBE` frame.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `UNSUBSCRIBE` frame.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// `DISCONNECT` frame.
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serialize to wire text, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame from wire text. Leading end-of-line characters are
    /// skipped.
    pub fn decode(text: &str) -> Result<Self, RealtimeError> {
        let text = text.trim_start_matches(['\r', '\n']);
        let mut pos = 0;
        let mut lines = Vec::new();
        loop {
            let rest = &text[pos..];
            let Some(nl) = rest.find('\n') else {
                return Err(RealtimeError::Protocol("unterminated frame header".into()));
            };
            let line = &rest[..nl];
            let line = line.strip_suffix('\r').unwrap_or(line);
            pos += nl + 1;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }

        let (command_line, header_lines) = lines
            .split_first()
            .ok_or_else(|| RealtimeError::Protocol("empty frame".into()))?;
        let command = Command::parse(command_line).ok_or_else(|| {
            RealtimeError::Protocol(format!("unknown command {command_line:?}"))
        })?;

        let mut headers = Vec::with_capacity(header_lines.len());
        for line in header_lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                RealtimeError::Protocol(format!("malformed header line {line:?}"))
            })?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let rest = &text[pos..];
        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.trim().parse::<usize>().ok());
        let body = match content_length {
            Some(len) => rest
                .get(..len)
                .ok_or_else(|| RealtimeError::Protocol("body shorter than content-length".into()))?,
            None => rest.split('\0').next().unwrap_or_default(),
        };

        Ok(Self {
            command,
            headers,
            body: body.to_string(),
        })
    }
}

/// Whether a text message is a heart-beat (only end-of-line characters).
pub fn is_heartbeat(text: &str) -> bool {
    text.bytes().all(|b| b == b'\n' || b == b'\r')
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, RealtimeError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(RealtimeError::Protocol(format!(
                    "undefined header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Heart-beating
// ─────────────────────────────────────────────────────────────────────────────

/// A `heart-beat` header value: `outgoing,incoming` in milliseconds, where
/// `0` means "cannot send" / "does not want to receive".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send heart-beats.
    pub outgoing_ms: u64,
    /// Desired interval between heart-beats from the peer.
    pub incoming_ms: u64,
}

/// Heart-beat schedule agreed by both sides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// How often the client must send.
    pub send_every: Option<Duration>,
    /// How often the client should hear from the server.
    pub expect_every: Option<Duration>,
}

impl HeartBeat {
    /// Same interval in both directions.
    pub fn symmetric(interval_ms: u64) -> Self {
        Self {
            outgoing_ms: interval_ms,
            incoming_ms: interval_ms,
        }
    }

    /// Parse a header value.
    pub fn parse(value: &str) -> Option<Self> {
        let (out, inc) = value.split_once(',')?;
        Some(Self {
            outgoing_ms: out.trim().parse().ok()?,
            incoming_ms: inc.trim().parse().ok()?,
        })
    }

    /// Combine the client offer (`self`) with the server's `CONNECTED` reply.
    pub fn negotiate(self, server: Self) -> Negotiated {
        let pick = |mine: u64, theirs: u64| {
            (mine != 0 && theirs != 0).then(|| Duration::from_millis(mine.max(theirs)))
        };
        Negotiated {
            send_every: pick(self.outgoing_ms, server.incoming_ms),
            expect_every: pick(self.incoming_ms, server.outgoing_ms),
        }
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! SSE (Server-Sent Events) framing.
//!
//! One [`SseEvent`] becomes one event block on the wire:
//!
//! ```text
//! event: <type>\n      (omitted for `message`, the SSE default)
//! data: <line 1>\n
//! data: <line 2>\n
//! \n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// SSE event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Message,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }
}

/// A single wire-level event. Built fresh per fragment and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    kind: EventKind,
    data: String,
}

impl SseEvent {
    /// A content event carrying one fragment.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Message,
            data: data.into(),
        }
    }

    /// Terminal error event. `message` must already be client-safe.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            data: message.into(),
        }
    }

    /// Terminal success event with an empty payload.
    pub fn done() -> Self {
        Self {
            kind: EventKind::Done,
            data: String::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_terminal(&self) -> bool {
        self.kind != EventKind::Message
    }
}

/// Serialize an event into its wire bytes.
///
/// Payload lines are split on `\r\n`, `\n` and `\r` (the SSE line terminators)
/// and each becomes its own `data:` line, so clients reassemble the original
/// text with `\n` between lines.
pub fn frame(event: &SseEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(event.data.len() + 24);

    if event.kind != EventKind::Message {
        buf.put_slice(b"event: ");
        buf.put_slice(event.kind.as_str().as_bytes());
        buf.put_u8(b'\n');
    }

    for line in split_lines(&event.data) {
        buf.put_slice(b"data: ");
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
    }

    buf.put_u8(b'\n');
    buf.freeze()
}

/// SSE comment used to keep idle connections open. Clients ignore it.
pub fn keep_alive_comment() -> Bytes {
    Bytes::from_static(b": keep-alive\n\n")
}

/// Split on any SSE line terminator. Always yields at least one line.
fn split_lines(data: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(|c: char| c == '\r' || c == '\n') {
            Some(pos) => {
                let skip = if current[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[pos + skip..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

//! Server-sent events decoding for provider responses.
//!
//! [`SseEventStream`] turns a byte stream into assembled events: it buffers
//! partial lines across chunks, accepts `\n` and `\r\n`, joins multi-line
//! `data:` fields and emits an event at each blank line. Comments and unknown
//! fields are ignored.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use futures::Stream;

/// One assembled SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Default)]
struct Pending {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.id.is_none()
    }

    fn take(&mut self) -> SseEvent {
        let pending = std::mem::take(self);
        SseEvent {
            event: pending.event,
            data: pending.data.join("\n"),
            id: pending.id,
        }
    }

    /// Apply one line. Returns a finished event on a blank line.
    fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return (!self.is_empty()).then(|| self.take());
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

/// Decodes SSE events from a stream of byte chunks.
pub struct SseEventStream<S> {
    inner: S,
    buffer: BytesMut,
    pending: Pending,
    exhausted: bool,
}

impl<S> SseEventStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            pending: Pending::default(),
            exhausted: false,
        }
    }

    /// Consume buffered complete lines until an event is ready.
    fn drain_lines(&mut self) -> Option<SseEvent> {
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(newline + 1);
            let mut line = &raw[..newline];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line);
            if let Some(event) = self.pending.feed(&line) {
                return Some(event);
            }
        }
        None
    }
}

impl<S, B, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: Buf,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(event) = this.drain_lines() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.exhausted {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(mut chunk))) => {
                    while chunk.has_remaining() {
                        let piece = chunk.chunk();
                        let len = piece.len();
                        this.buffer.extend_from_slice(piece);
                        chunk.advance(len);
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.exhausted = true;
                    // Flush an unterminated last line and event.
                    if !this.buffer.is_empty() {
                        let rest = this.buffer.split();
                        let line = String::from_utf8_lossy(&rest);
                        if let Some(event) = this.pending.feed(line.trim_end_matches('\r')) {
                            return Poll::Ready(Some(Ok(event)));
                        }
                    }
                    if !this.pending.is_empty() {
                        return Poll::Ready(Some(Ok(this.pending.take())));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

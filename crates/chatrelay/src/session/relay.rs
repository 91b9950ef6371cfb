//! Ordered delivery of session events to the client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::api::{CreatedPayload, ErrorPayload, FinalPayload, PartialPayload, sse};

/// An event on the generation stream.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Created(CreatedPayload),
    Partial(PartialPayload),
    Final(Box<FinalPayload>),
    Error(ErrorPayload),
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Created(_) => sse::CREATED,
            RelayEvent::Partial(_) => sse::PARTIAL,
            RelayEvent::Final(_) => sse::FINAL,
            RelayEvent::Error(_) => sse::ERROR,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Final(_) | RelayEvent::Error(_))
    }

    /// JSON body of the event.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            RelayEvent::Created(payload) => serde_json::to_string(payload),
            RelayEvent::Partial(payload) => serde_json::to_string(payload),
            RelayEvent::Final(payload) => serde_json::to_string(payload),
            RelayEvent::Error(payload) => serde_json::to_string(payload),
        }
    }
}

/// Client connection a session writes to.
pub trait Transport: Send + Sync {
    /// Handshake, run once before the first event.
    fn open(&self) {}

    /// Deliver one event. Returns `false` if the client is gone.
    fn send(&self, event: RelayEvent) -> bool;

    /// No more events will follow.
    fn close(&self);

    /// Cancelled when the client goes away before [`close`](Self::close).
    fn disconnected(&self) -> CancellationToken;
}

pub struct StreamRelay;

impl StreamRelay {
    /// Wrap a transport without touching it. Call [`Emitter::open`] before
    /// the first event.
    pub fn attach(transport: Arc<dyn Transport>) -> Emitter {
        Emitter {
            transport,
            opened: AtomicBool::new(false),
            finished: Mutex::new(false),
        }
    }

    /// Perform the transport handshake and return the emitter for it.
    pub fn start(transport: Arc<dyn Transport>) -> Emitter {
        let emitter = Self::attach(transport);
        emitter.open();
        emitter
    }
}

/// Writes events to a transport. Nothing is written after the terminal event.
pub struct Emitter {
    transport: Arc<dyn Transport>,
    opened: AtomicBool,
    // Held while sending so a partial cannot follow the terminal event.
    finished: Mutex<bool>,
}

impl Emitter {
    /// Run the transport handshake. Later calls do nothing.
    pub fn open(&self) {
        if !self.opened.swap(true, Ordering::AcqRel) {
            self.transport.open();
        }
    }

    /// Send a non-terminal event. Dropped once the stream has finished.
    pub fn emit_partial(&self, event: RelayEvent) -> bool {
        debug_assert!(!event.is_terminal());
        let finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        if *finished {
            return false;
        }
        self.transport.send(event)
    }

    /// Send the terminal event and close the transport. Only the first call
    /// has any effect.
    pub fn emit_terminal(&self, event: RelayEvent) -> bool {
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        if *finished {
            return false;
        }
        *finished = true;
        let delivered = self.transport.send(event);
        self.transport.close();
        delivered
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn disconnected(&self) -> CancellationToken {
        self.transport.disconnected()
    }
}

//! Server-sent events transport for `/api/ask`.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use axum::response::sse::Event;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::relay::{RelayEvent, Transport};

/// Sending half of an SSE response.
pub struct SseTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    disconnected: CancellationToken,
}

impl SseTransport {
    /// Create a transport and the response body it feeds.
    pub fn channel() -> (Arc<Self>, SseBody) {
        let (tx, rx) = mpsc::unbounded_channel();
        let disconnected = CancellationToken::new();
        let transport = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            disconnected: disconnected.clone(),
        });
        let body = SseBody {
            rx,
            disconnected,
            drained: false,
        };
        (transport, body)
    }
}

impl Transport for SseTransport {
    fn send(&self, event: RelayEvent) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(to_sse_event(&event)).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }
}

fn to_sse_event(event: &RelayEvent) -> Event {
    let data = event.data().unwrap_or_else(|e| {
        warn!(event = event.name(), error = %e, "Failed to encode stream event");
        "{}".to_string()
    });
    Event::default().event(event.name()).data(data)
}

/// Response body of an SSE stream.
///
/// Dropping it before the transport closed (the client went away) cancels
/// the transport's `disconnected` token.
pub struct SseBody {
    rx: mpsc::UnboundedReceiver<Event>,
    disconnected: CancellationToken,
    drained: bool,
}

impl Stream for SseBody {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => {
                self.drained = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SseBody {
    fn drop(&mut self) {
        if !self.drained {
            self.disconnected.cancel();
        }
    }
}

//! Streaming generation sessions.
//!
//! # Architecture
//!
//! ```text
//!  POST /api/ask ──▶ SessionManager::open ──register──▶ SessionRegistry
//!                         │                            (conversation id → Session)
//!                         │ spawn                              ▲
//!                         ▼                                    │ lookup
//!                    relay task ◀──── cancel token ──── SessionManager::cancel
//!                    │  provider chunks                  (POST /api/ask/abort)
//!                    ├──▶ Checkpointer ──▶ MessageStore (unfinished=true, ≤1 per interval)
//!                    └──▶ Emitter ──▶ Transport (SSE)
//!
//!  complete │ cancel │ failure │ disconnect
//!           └────────┴─────────┴────────▶ resolve(): CAS Active→Resolving, exactly once
//! ```
//!
//! - **Session**: one in-flight generation: cancellation token, lifecycle
//!   latch, partial text and the fixed fields of the answer message.
//! - **SessionRegistry**: at most one live session per conversation; the
//!   source of truth for "can this still be cancelled".
//! - **Checkpointer**: rate-limited persistence of partial answers.
//! - **StreamRelay / Emitter**: ordered delivery to the client; the terminal
//!   event is sent once and closes the transport.
//! - **SessionManager**: opens sessions, runs the relay task and owns the
//!   resolution protocol. Whichever trigger claims the latch first writes the
//!   single terminal message; the others are no-ops.

mod checkpoint;
mod error;
mod live;
mod manager;
mod partial;
mod registry;
mod relay;
mod resolution;
mod sse;
mod state;

#[cfg(test)]
pub(crate) mod testing;

// Types and errors
pub use error::SessionError;
pub use live::Session;
pub use partial::{PartialOutput, PartialTextAccumulator};
pub use resolution::{Outcome, Resolution, ResponseTemplate, SALVAGE_MIN_CHARS, Trigger};
pub use state::SessionState;

// Lifecycle
pub use checkpoint::Checkpointer;
pub use manager::{GenerationRequest, SessionManager, SessionStarted, StreamSettings};
pub use registry::SessionRegistry;

// Delivery
pub use relay::{Emitter, RelayEvent, StreamRelay, Transport};
pub use sse::{SseBody, SseTransport};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::MessageStore;

use super::live::Session;
use super::state::SessionState;

/// Persists partial answers of one session, at most once per interval.
///
/// Checkpoints are written with `unfinished = true` under the session's
/// write lock and only while the session is still active. A failed write is
/// logged and generation continues.
pub struct Checkpointer {
    session: Arc<Session>,
    messages: Arc<dyn MessageStore>,
    interval: Duration,
    last_persisted: Option<Instant>,
}

impl Checkpointer {
    #[must_use]
    pub fn new(session: Arc<Session>, messages: Arc<dyn MessageStore>, interval: Duration) -> Self {
        Self {
            session,
            messages,
            interval,
            last_persisted: None,
        }
    }

    /// Record the latest partial text. Returns `true` if a checkpoint was written.
    pub async fn on_partial(&mut self, text: &str, now: Instant) -> bool {
        self.session.partial().update_at(text, now);

        if !self.is_due(now) {
            return false;
        }
        self.last_persisted = Some(now);
        self.persist(text).await
    }

    fn is_due(&self, now: Instant) -> bool {
        match self.last_persisted {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        }
    }

    async fn persist(&self, text: &str) -> bool {
        let _writes = self.session.latch().lock_writes().await;
        if self.session.state() != SessionState::Active {
            debug!(session_id = %self.session.id(), "Skipping checkpoint; session is resolving");
            return false;
        }

        let message = self.session.response().checkpoint(text);
        match self.messages.save_message(&message).await {
            Ok(()) => {
                debug!(
                    session_id = %self.session.id(),
                    chars = text.chars().count(),
                    "Checkpoint saved"
                );
                true
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Checkpoint failed; continuing");
                false
            }
        }
    }
}

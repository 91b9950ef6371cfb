use std::sync::{PoisonError, RwLock};

use tokio::time::Instant;

/// Latest partial answer and when it was produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialOutput {
    pub text: String,
    pub updated_at: Option<Instant>,
}

/// Holds the most recent partial text of a session.
///
/// The relay task is the only writer. Readers (cancellation, checkpoints)
/// see the last completed `update`; reads never wait on I/O.
#[derive(Debug, Default)]
pub struct PartialTextAccumulator {
    latest: RwLock<PartialOutput>,
}

impl PartialTextAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, text: impl Into<String>) {
        self.update_at(text, Instant::now());
    }

    pub fn update_at(&self, text: impl Into<String>, at: Instant) {
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        latest.text = text.into();
        latest.updated_at = Some(at);
    }

    pub fn snapshot(&self) -> String {
        self.read().text.clone()
    }

    pub fn output(&self) -> PartialOutput {
        self.read().clone()
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.read().updated_at
    }

    pub fn char_count(&self) -> usize {
        self.read().text.chars().count()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PartialOutput> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }
}

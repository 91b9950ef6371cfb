use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Mutex, MutexGuard};

/// Lifecycle of a session. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Resolving,
    Resolved,
}

impl SessionState {
    const fn as_u8(self) -> u8 {
        match self {
            SessionState::Active => 0,
            SessionState::Resolving => 1,
            SessionState::Resolved => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Active,
            1 => SessionState::Resolving,
            2 => SessionState::Resolved,
            other => unreachable!("invalid session state byte {other}"),
        }
    }
}

/// Session state plus the lock that orders checkpoint and terminal writes.
///
/// Only the caller that wins [`try_begin_resolving`](Self::try_begin_resolving)
/// may write the terminal message. Checkpoints take the same lock and re-check
/// the state, so none can land after the terminal write.
#[derive(Debug)]
pub(crate) struct SessionLatch {
    state: AtomicU8,
    writes: Mutex<()>,
}

impl SessionLatch {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Active.as_u8()),
            writes: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Claim resolution. Returns `true` for exactly one caller.
    pub(crate) fn try_begin_resolving(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Active.as_u8(),
                SessionState::Resolving.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        let previous = self
            .state
            .swap(SessionState::Resolved.as_u8(), Ordering::AcqRel);
        debug_assert_eq!(
            SessionState::from_u8(previous),
            SessionState::Resolving,
            "finish() without a claimed resolution"
        );
    }

    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn moves_forward_once() {
        let latch = SessionLatch::new();
        assert_eq!(latch.state(), SessionState::Active);

        assert!(latch.try_begin_resolving());
        assert!(!latch.try_begin_resolving());
        assert_eq!(latch.state(), SessionState::Resolving);

        latch.finish();
        assert_eq!(latch.state(), SessionState::Resolved);
        assert!(!latch.try_begin_resolving());
    }

    #[test]
    fn one_winner_across_threads() {
        let latch = Arc::new(SessionLatch::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..32)
            .map(|_| {
                let latch = latch.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if latch.try_begin_resolving() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}

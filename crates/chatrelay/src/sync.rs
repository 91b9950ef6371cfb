//! Per-key async locking.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// How often the sweeper looks for idle lock entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Entries untouched for longer than this are dropped by the sweeper.
pub const IDLE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

struct Slot {
    lock: Arc<Mutex<()>>,
    touched: Instant,
}

/// A map of async mutexes, one per key.
///
/// Writers for the same conversation serialize on the same mutex while
/// different conversations proceed in parallel.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<DashMap<String, Slot>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the map and start a sweeper that evicts idle entries.
    #[must_use]
    pub fn with_sweeper(name: &'static str) -> Self {
        let locks = Self::new();
        locks.clone().spawn_sweeper(SWEEP_INTERVAL, IDLE_TTL, name);
        locks
    }

    /// Return the mutex for `key`, creating it on first use.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            lock: Arc::new(Mutex::new(())),
            touched: now,
        });
        slot.touched = now;
        slot.lock.clone()
    }

    /// Acquire the mutex for `key`.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        self.get(key).lock_owned().await
    }

    /// Drop entries idle for longer than `ttl` that nobody currently holds.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            Arc::strong_count(&slot.lock) > 1 || now.duration_since(slot.touched) <= ttl
        });
        before.saturating_sub(self.slots.len())
    }

    fn spawn_sweeper(self, every: Duration, ttl: Duration, name: &'static str) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep(ttl);
                if removed > 0 {
                    debug!(locks = name, removed, remaining = self.len(), "Swept idle locks");
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

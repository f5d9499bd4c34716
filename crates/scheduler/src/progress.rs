//! Progress snapshots and their observers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Jobs queued or running
    pub total: usize,
    /// Jobs still queued
    pub remaining: usize,
    /// Share of `total` that has left the queue, 0 to 100
    pub percent: u8,
}

impl ProgressSnapshot {
    pub const IDLE: Self = Self { total: 0, remaining: 0, percent: 100 };

    pub fn from_counts(queued: usize, running: usize) -> Self {
        let total = queued + running;
        if total == 0 {
            return Self::IDLE;
        }
        let percent = ((running as f64 * 100.0) / total as f64).round() as u8;
        Self { total, remaining: queued, percent }
    }

    pub fn is_idle(&self) -> bool {
        self.total == 0
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::IDLE
    }
}

type Observer = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

struct ReporterState {
    next_id: u64,
    observers: Vec<(u64, Observer)>,
    latest: ProgressSnapshot,
    issued_seq: u64,
    latest_seq: u64,
}

fn lock(state: &Mutex<ReporterState>) -> MutexGuard<'_, ReporterState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broadcasts [`ProgressSnapshot`]s to subscribed observers.
///
/// Observers are called synchronously on the publishing thread, after the
/// reporter's own lock is released.
#[derive(Clone)]
pub struct ProgressReporter {
    state: Arc<Mutex<ReporterState>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ReporterState {
                next_id: 0,
                observers: Vec::new(),
                latest: ProgressSnapshot::IDLE,
                issued_seq: 0,
                latest_seq: 0,
            })),
        }
    }

    /// Registers an observer until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.observers.push((id, Arc::new(observer)));
        Subscription { state: Arc::downgrade(&self.state), id }
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> ProgressSnapshot {
        lock(&self.state).latest
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }

    /// Publishes a snapshot to every observer.
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        let seq = self.reserve();
        self.publish_ordered(seq, snapshot);
    }

    /// Reserves the next sequence number for [`publish_ordered`](Self::publish_ordered).
    pub(crate) fn reserve(&self) -> u64 {
        let mut state = lock(&self.state);
        state.issued_seq += 1;
        state.issued_seq
    }

    /// Publishes unless a snapshot with a later sequence number already went out.
    pub(crate) fn publish_ordered(&self, seq: u64, snapshot: ProgressSnapshot) {
        let observers: Vec<Observer> = {
            let mut state = lock(&self.state);
            if seq <= state.latest_seq {
                return;
            }
            state.latest_seq = seq;
            state.latest = snapshot;
            state.observers.iter().map(|(_, observer)| Arc::clone(observer)).collect()
        };

        for observer in observers {
            observer(&snapshot);
        }
    }
}

/// Keeps an observer registered. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    state: Weak<Mutex<ReporterState>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            // The observer is dropped outside the lock
            let removed = {
                let mut state = lock(&state);
                let index = state.observers.iter().position(|(id, _)| *id == self.id);
                index.map(|i| state.observers.remove(i))
            };
            drop(removed);
        }
    }
}

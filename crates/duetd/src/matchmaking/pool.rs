//! FIFO waiting pool of participants eligible for pairing.

use std::collections::{HashSet, VecDeque};

use duet_core::ConnectionId;

/// Ordered queue of waiting connection handles.
///
/// A handle appears at most once; `enqueue` and `push_front` are no-ops for
/// a handle that is already waiting. Keeping entries Available is the
/// caller's job (see `MatchState`).
#[derive(Debug, Default)]
pub struct WaitingPool {
    queue: VecDeque<ConnectionId>,
    members: HashSet<ConnectionId>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handle at the back. Returns false if already present.
    pub fn enqueue(&mut self, id: ConnectionId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.queue.push_back(id);
        true
    }

    /// Puts a handle back at the front (stale-dequeue retry).
    /// Returns false if already present.
    pub fn push_front(&mut self, id: ConnectionId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.queue.push_front(id);
        true
    }

    /// Removes and returns the oldest handle.
    pub fn pop_front(&mut self) -> Option<ConnectionId> {
        let id = self.queue.pop_front()?;
        self.members.remove(&id);
        Some(id)
    }

    /// Returns the oldest handle without removing it.
    pub fn front(&self) -> Option<ConnectionId> {
        self.queue.front().copied()
    }

    /// Removes a handle wherever it sits. Idempotent.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.queue.retain(|queued| queued != id);
        true
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Snapshot in FIFO order.
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        self.queue.iter().copied().collect()
    }
}

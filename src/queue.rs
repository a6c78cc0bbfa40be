use crate::protocol::PlaneId;
use heapless::{Deque, Vec};

pub const QUEUE_CAPACITY: usize = 8;

type WaitingPlanes = Deque<PlaneId, QUEUE_CAPACITY>;

/// Bounded FIFO of planes waiting for a runway.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    waiting: WaitingPlanes,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self { waiting: Deque::new() }
    }

    /// Appends `id`. Returns false without queuing when the queue is full.
    pub fn enqueue(&mut self, id: PlaneId) -> bool {
        self.waiting.push_back(id).is_ok()
    }

    pub fn dequeue(&mut self) -> Option<PlaneId> {
        self.waiting.pop_front()
    }

    pub fn is_full(&self) -> bool {
        self.waiting.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn contains(&self, id: PlaneId) -> bool {
        self.waiting.iter().any(|waiting| *waiting == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaneId> {
        self.waiting.iter()
    }

    /// Removes every entry matching `predicate`, returning them oldest first.
    /// Remaining entries keep their order.
    pub fn remove_all_matching<F>(&mut self, mut predicate: F) -> Vec<PlaneId, QUEUE_CAPACITY>
    where
        F: FnMut(PlaneId) -> bool,
    {
        let mut removed = Vec::new();
        let mut kept = WaitingPlanes::new();

        while let Some(id) = self.waiting.pop_front() {
            // Both targets hold at most QUEUE_CAPACITY entries
            if predicate(id) {
                let _ = removed.push(id);
            } else {
                let _ = kept.push_back(id);
            }
        }

        self.waiting = kept;
        removed
    }

    /// Removes `id` wherever it sits. Returns whether it was queued.
    pub fn remove(&mut self, id: PlaneId) -> bool {
        !self.remove_all_matching(|waiting| waiting == id).is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

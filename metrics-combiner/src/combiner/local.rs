//! Per-thread agent slots and combiner id allocation.
//!
//! Every combiner is given a small numeric id.  Each thread keeps a vector of agents indexed by
//! that id, so finding the calling thread's agent for a combiner is a bounds-checked index.  When
//! the thread exits, the vector is dropped and every agent in it commits its value back into its
//! combiner.

use std::{any::Any, cell::RefCell, sync::Arc};

use parking_lot::Mutex;

/// Upper bound on the number of combiners alive at the same time.
pub(crate) const MAX_COMBINERS: usize = 1 << 20;

/// Hands out combiner ids, reusing ids released by dropped combiners.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: usize,
    free: Vec<usize>,
    limit: usize,
}

impl IdAllocator {
    pub const fn new(limit: usize) -> Self {
        Self { next: 0, free: Vec::new(), limit }
    }

    pub fn acquire(&mut self) -> Option<usize> {
        if let Some(id) = self.free.pop() {
            return Some(id);
        }

        if self.next >= self.limit {
            return None;
        }

        let id = self.next;
        self.next += 1;
        Some(id)
    }

    pub fn release(&mut self, id: usize) {
        debug_assert!(id < self.next);
        self.free.push(id);
    }
}

static COMBINER_IDS: Mutex<IdAllocator> =
    parking_lot::const_mutex(IdAllocator::new(MAX_COMBINERS));

pub(crate) fn acquire_id() -> Option<usize> {
    COMBINER_IDS.lock().acquire()
}

pub(crate) fn release_id(id: usize) {
    COMBINER_IDS.lock().release(id);
}

/// An agent as seen by the thread that owns it, without its concrete type.
pub(crate) trait LocalAgent: Send + Sync + 'static {
    /// Folds the agent's value into its combiner and unregisters it.
    fn commit_and_erase(self: Arc<Self>);

    /// Gets the agent as `Any`, to recover its concrete type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[derive(Default)]
pub(crate) struct AgentSlots {
    slots: Vec<Option<Arc<dyn LocalAgent>>>,
}

impl AgentSlots {
    pub fn get(&self, id: usize) -> Option<Arc<dyn LocalAgent>> {
        self.slots.get(id).and_then(Clone::clone)
    }

    pub fn insert(&mut self, id: usize, agent: Arc<dyn LocalAgent>) {
        if self.slots.len() <= id {
            self.slots.resize_with(id + 1, || None);
        }
        self.slots[id] = Some(agent);
    }

    pub fn remove(&mut self, id: usize) -> Option<Arc<dyn LocalAgent>> {
        self.slots.get_mut(id).and_then(Option::take)
    }
}

impl Drop for AgentSlots {
    fn drop(&mut self) {
        for agent in self.slots.drain(..).flatten() {
            agent.commit_and_erase();
        }
    }
}

thread_local! {
    static AGENT_SLOTS: RefCell<AgentSlots> = RefCell::new(AgentSlots::default());
}

/// Runs `f` against the calling thread's agent slots.
///
/// Returns `None` without calling `f` if the slots are unavailable: either the thread is tearing
/// down its thread-local storage, or the slots are already borrowed further up the stack.
pub(crate) fn with_slots<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut AgentSlots) -> Option<R>,
{
    AGENT_SLOTS
        .try_with(|slots| match slots.try_borrow_mut() {
            Ok(mut slots) => f(&mut slots),
            Err(_) => None,
        })
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::IdAllocator;

    #[test]
    fn test_ids_are_reused() {
        let mut ids = IdAllocator::new(8);
        assert_eq!(ids.acquire(), Some(0));
        assert_eq!(ids.acquire(), Some(1));
        assert_eq!(ids.acquire(), Some(2));

        ids.release(1);
        assert_eq!(ids.acquire(), Some(1));
        assert_eq!(ids.acquire(), Some(3));
    }

    #[test]
    fn test_ids_exhaust() {
        let mut ids = IdAllocator::new(2);
        assert_eq!(ids.acquire(), Some(0));
        assert_eq!(ids.acquire(), Some(1));
        assert_eq!(ids.acquire(), None);

        ids.release(0);
        assert_eq!(ids.acquire(), Some(0));
        assert_eq!(ids.acquire(), None);
    }
}

//! Thread-local combining of metric values.
//!
//! Writes go to a per-thread [`Agent`], so the hot path never contends with other writers.  The
//! [`AgentCombiner`] owning the agents folds them together on read, drains them on reset, and
//! absorbs each agent's final value when its thread exits.
use std::{
    any::Any,
    fmt,
    ptr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use tracing::error;

mod element;
pub use self::element::{AtomicElement, AtomicPrimitive, Element, ElementContainer, MutexElement};

mod local;
use self::local::{acquire_id, release_id, with_slots, LocalAgent};

/// Describes how agent values are folded into a combined result.
///
/// `fold` must be associative and commutative, and folding into `result_identity()` must leave the
/// folded element unchanged.  Folding `element_identity()` into any result must be a no-op.
pub trait Combine: Send + Sync + 'static {
    /// Type of the combined value.
    type Result: Clone + Send + 'static;

    /// Type of the value held by each agent.
    type Element: Element;

    /// Identity of the combined value.
    fn result_identity(&self) -> Self::Result;

    /// Identity of an agent's value.
    fn element_identity(&self) -> Self::Element;

    /// Folds an agent's value into the combined value.
    fn fold(&self, result: &mut Self::Result, element: Self::Element);
}

/// A thread's partial value for a single combiner.
pub struct Agent<C: Combine> {
    element: CachePadded<<C::Element as Element>::Container>,
    combiner: Weak<Shared<C>>,
}

impl<C: Combine> Agent<C> {
    fn new(element: C::Element, combiner: Weak<Shared<C>>) -> Self {
        Self {
            element: CachePadded::new(
                <<C::Element as Element>::Container as ElementContainer<C::Element>>::new(element),
            ),
            combiner,
        }
    }

    /// Modifies the local value in place.
    #[inline]
    pub fn modify<F, U>(&self, f: F) -> U
    where
        F: FnMut(&mut C::Element) -> U,
    {
        self.element.modify(f)
    }

    /// Loads a copy of the local value.
    pub fn load(&self) -> C::Element {
        self.element.load()
    }

    fn belongs_to(&self, shared: &Arc<Shared<C>>) -> bool {
        ptr::eq(self.combiner.as_ptr(), Arc::as_ptr(shared))
    }
}

impl<C: Combine> LocalAgent for Agent<C> {
    fn commit_and_erase(self: Arc<Self>) {
        // A combiner that is already gone has dropped its agents along with its value.
        if let Some(shared) = self.combiner.upgrade() {
            shared.commit(&self);
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

struct State<C: Combine> {
    global: C::Result,
    agents: Vec<Arc<Agent<C>>>,
}

struct Shared<C: Combine> {
    id: Option<usize>,
    op: C,
    exhausted_reported: AtomicBool,
    state: Mutex<State<C>>,
}

impl<C: Combine> Shared<C> {
    fn commit(&self, agent: &Arc<Agent<C>>) {
        let mut state = self.state.lock();
        let Some(pos) = state.agents.iter().position(|a| Arc::ptr_eq(a, agent)) else {
            return;
        };

        let agent = state.agents.swap_remove(pos);
        let value = agent.element.exchange(self.op.element_identity());
        self.op.fold(&mut state.global, value);
    }

    fn report_exhausted(&self) {
        if !self.exhausted_reported.swap(true, Ordering::Relaxed) {
            error!(
                max_combiners = local::MAX_COMBINERS,
                "combiner ids exhausted; writes to this metric will be dropped"
            );
        }
    }
}

impl<C: Combine> Drop for Shared<C> {
    fn drop(&mut self) {
        self.state.get_mut().agents.clear();
        if let Some(id) = self.id {
            release_id(id);
        }
    }
}

/// Owns the global value of a metric and every thread's agent for it.
pub struct AgentCombiner<C: Combine> {
    shared: Arc<Shared<C>>,
}

impl<C: Combine> AgentCombiner<C> {
    /// Creates a new combiner using `op` to fold values.
    pub fn new(op: C) -> Self {
        Self::with_id(op, acquire_id())
    }

    fn with_id(op: C, id: Option<usize>) -> Self {
        let global = op.result_identity();
        Self {
            shared: Arc::new(Shared {
                id,
                op,
                exhausted_reported: AtomicBool::new(false),
                state: Mutex::new(State { global, agents: Vec::new() }),
            }),
        }
    }

    /// Gets the fold operation.
    pub fn op(&self) -> &C {
        &self.shared.op
    }

    /// Gets the calling thread's agent, creating and registering it on first use.
    ///
    /// Returns `None` when combiner ids were exhausted at creation time, or when the thread is
    /// tearing down its thread-local storage.  Callers drop the write in that case.
    pub fn get_or_create_tls_agent(&self) -> Option<Arc<Agent<C>>> {
        let Some(id) = self.shared.id else {
            self.shared.report_exhausted();
            return None;
        };

        with_slots(|slots| {
            if let Some(existing) = slots.get(id) {
                if let Ok(agent) = existing.into_any().downcast::<Agent<C>>() {
                    if agent.belongs_to(&self.shared) {
                        return Some(agent);
                    }
                }
                // Left over from a dropped combiner that held the same id.
            }

            let agent = Arc::new(Agent::new(
                self.shared.op.element_identity(),
                Arc::downgrade(&self.shared),
            ));
            self.shared.state.lock().agents.push(Arc::clone(&agent));
            slots.insert(id, Arc::clone(&agent) as Arc<dyn LocalAgent>);
            Some(agent)
        })
    }

    /// Folds the global value with every live agent's value.
    ///
    /// Agents are read one after another, so the result is not a point-in-time snapshot across
    /// threads.
    pub fn combine_agents(&self) -> C::Result {
        let state = self.shared.state.lock();
        let mut result = state.global.clone();
        for agent in &state.agents {
            self.shared.op.fold(&mut result, agent.element.load());
        }
        result
    }

    /// Resets the global value and every live agent to identity, returning the prior total.
    pub fn reset_all_agents(&self) -> C::Result {
        let op = &self.shared.op;
        let mut state = self.shared.state.lock();
        let mut prev = std::mem::replace(&mut state.global, op.result_identity());
        for agent in &state.agents {
            op.fold(&mut prev, agent.element.exchange(op.element_identity()));
        }
        prev
    }

    /// Folds `agent`'s value into the global value and unregisters it.
    ///
    /// If `agent` is the calling thread's agent, it is also removed from the thread's slots, and
    /// the next write from this thread creates a new one.
    pub fn commit_and_erase(&self, agent: &Arc<Agent<C>>) {
        if let Some(id) = self.shared.id {
            let _ = with_slots(|slots| {
                let ours = slots
                    .get(id)
                    .and_then(|existing| existing.into_any().downcast::<Agent<C>>().ok())
                    .is_some_and(|existing| Arc::ptr_eq(&existing, agent));
                if ours {
                    slots.remove(id);
                }
                Some(())
            });
        }

        self.shared.commit(agent);
    }

    /// Runs `f` against the global value and `agent`'s value while holding the combiner lock.
    ///
    /// Only the thread owning `agent` may call this.
    pub fn merge_global<F>(&self, agent: &Agent<C>, f: F)
    where
        F: FnOnce(&mut C::Result, &mut C::Element),
    {
        let op = &self.shared.op;
        let mut state = self.shared.state.lock();
        let mut local = agent.element.exchange(op.element_identity());
        f(&mut state.global, &mut local);
        agent.element.store(local);
    }

    /// Number of agents currently registered.
    pub fn live_agents(&self) -> usize {
        self.shared.state.lock().agents.len()
    }
}

impl<C: Combine> fmt::Debug for AgentCombiner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCombiner")
            .field("id", &self.shared.id)
            .field("live_agents", &self.live_agents())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentCombiner, Combine};
    use std::{sync::Arc, thread};

    struct Sum;

    impl Combine for Sum {
        type Result = u64;
        type Element = u64;

        fn result_identity(&self) -> u64 {
            0
        }

        fn element_identity(&self) -> u64 {
            0
        }

        fn fold(&self, result: &mut u64, element: u64) {
            *result += element;
        }
    }

    fn add(combiner: &AgentCombiner<Sum>, value: u64) {
        if let Some(agent) = combiner.get_or_create_tls_agent() {
            agent.modify(|v| *v += value);
        }
    }

    #[test]
    fn test_fold_completeness() {
        let combiner = Arc::new(AgentCombiner::new(Sum));
        let inputs: Vec<Vec<u64>> = vec![vec![1, 2, 3], vec![4], vec![5, 6], vec![]];

        let handles = inputs
            .into_iter()
            .map(|values| {
                let combiner = Arc::clone(&combiner);
                thread::spawn(move || {
                    for value in values {
                        add(&combiner, value);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(combiner.combine_agents(), 21);
        // Every writing thread has exited and committed its agent.
        assert_eq!(combiner.live_agents(), 0);
    }

    #[test]
    fn test_same_thread_reuses_agent() {
        let combiner = AgentCombiner::new(Sum);
        let a = combiner.get_or_create_tls_agent().unwrap();
        let b = combiner.get_or_create_tls_agent().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(combiner.live_agents(), 1);
    }

    #[test]
    fn test_reset_returns_total_then_identity() {
        let combiner = AgentCombiner::new(Sum);
        add(&combiner, 7);
        add(&combiner, 8);

        assert_eq!(combiner.reset_all_agents(), 15);
        assert_eq!(combiner.combine_agents(), 0);
        assert_eq!(combiner.reset_all_agents(), 0);
        assert_eq!(combiner.reset_all_agents(), 0);

        add(&combiner, 2);
        assert_eq!(combiner.combine_agents(), 2);
    }

    #[test]
    fn test_commit_and_erase_keeps_value() {
        let combiner = AgentCombiner::new(Sum);
        add(&combiner, 5);

        let agent = combiner.get_or_create_tls_agent().unwrap();
        combiner.commit_and_erase(&agent);
        assert_eq!(combiner.live_agents(), 0);
        assert_eq!(combiner.combine_agents(), 5);

        // The next write registers a fresh agent.
        add(&combiner, 1);
        let fresh = combiner.get_or_create_tls_agent().unwrap();
        assert!(!Arc::ptr_eq(&agent, &fresh));
        assert_eq!(combiner.combine_agents(), 6);
    }

    #[test]
    fn test_reused_id_gets_fresh_agent() {
        let first = AgentCombiner::new(Sum);
        add(&first, 100);
        let id = first.shared.id;
        drop(first);

        // Ids are handed out from a free list, so the next combiner usually picks up the old id.
        // Either way, it must not observe the stale agent's value.
        let second = AgentCombiner::new(Sum);
        add(&second, 1);
        assert_eq!(second.combine_agents(), 1);
        if second.shared.id == id {
            assert_eq!(second.live_agents(), 1);
        }
    }

    #[test]
    fn test_exhausted_ids_drop_writes() {
        let combiner = AgentCombiner::with_id(Sum, None);
        assert!(combiner.get_or_create_tls_agent().is_none());
        add(&combiner, 10);
        assert_eq!(combiner.combine_agents(), 0);
    }

    #[test]
    fn test_merge_global() {
        let combiner = AgentCombiner::new(Sum);
        add(&combiner, 4);

        let agent = combiner.get_or_create_tls_agent().unwrap();
        combiner.merge_global(&agent, |global, local| {
            *global += *local;
            *local = 0;
        });

        assert_eq!(agent.load(), 0);
        assert_eq!(combiner.combine_agents(), 4);
        assert_eq!(combiner.reset_all_agents(), 4);
    }

    #[test]
    fn test_concurrent_reset_loses_nothing() {
        let combiner = AgentCombiner::new(Sum);
        let mut drained = 0;

        crossbeam_utils::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|_| {
                    for _ in 0..10_000 {
                        add(&combiner, 1);
                    }
                });
            }

            for _ in 0..100 {
                drained += combiner.reset_all_agents();
            }
        })
        .unwrap();

        drained += combiner.reset_all_agents();
        assert_eq!(drained, 40_000);
    }
}

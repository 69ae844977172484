//! Fixed-capacity queue backing sample windows.
use std::collections::VecDeque;

/// A fixed-capacity FIFO queue.
///
/// The capacity only grows.  Once full, [`elim_push`](BoundedQueue::elim_push) evicts the oldest
/// item to make room, so the queue always holds the most recent `capacity` items in push order.
#[derive(Clone, Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    /// Pushes `item`, giving it back if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Pushes `item`, evicting the oldest item first if the queue is full.
    ///
    /// Returns the evicted item, if any.  A zero-capacity queue hands `item` straight back.
    pub fn elim_push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }

        let evicted = if self.is_full() { self.items.pop_front() } else { None };
        self.items.push_back(item);
        evicted
    }

    /// Removes the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Gets the `i`-th oldest item, `top(0)` being the oldest.
    pub fn top(&self, i: usize) -> Option<&T> {
        self.items.get(i)
    }

    /// Gets the `i`-th newest item, `bottom(0)` being the most recently pushed.
    pub fn bottom(&self, i: usize) -> Option<&T> {
        let len = self.items.len();
        if i >= len {
            return None;
        }
        self.items.get(len - 1 - i)
    }

    /// Number of items held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Maximum number of items held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raises the capacity to `capacity`, keeping every item.  Never shrinks.
    pub fn grow(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.items.reserve(capacity - self.items.len());
            self.capacity = capacity;
        }
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}

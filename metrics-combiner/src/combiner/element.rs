//! Storage for an agent's local value.
//!
//! Primitive numeric types live in an atomic and are updated with a compare-and-swap loop, so the
//! owning thread never blocks.  Everything else lives behind a mutex.  Either way, the combiner is
//! free to read, store, or exchange an agent's value from another thread.

use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32, AtomicU64,
    AtomicU8, AtomicUsize, Ordering,
};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

/// Thread-safe cell holding an agent's local value.
pub trait ElementContainer<T>: Send + Sync + 'static {
    /// Creates a container holding `value`.
    fn new(value: T) -> Self
    where
        Self: Sized;

    /// Loads the current value.
    fn load(&self) -> T;

    /// Stores `value`, discarding the current one.
    fn store(&self, value: T);

    /// Stores `value`, returning the previous one.
    fn exchange(&self, value: T) -> T;

    /// Modifies the value in place, returning whatever `f` returned.
    ///
    /// For atomic containers `f` operates on a copy and may run more than once if the value is
    /// concurrently exchanged by the combiner.
    fn modify<F, U>(&self, f: F) -> U
    where
        F: FnMut(&mut T) -> U;
}

/// A value that can be held by an agent.
///
/// Primitive numeric types use [`AtomicElement`].  Other types implement this trait with
/// [`MutexElement`] as their container:
///
/// ```
/// use metrics_combiner::combiner::{Element, MutexElement};
///
/// #[derive(Clone, Default)]
/// struct Histogram(Vec<u32>);
///
/// impl Element for Histogram {
///     type Container = MutexElement<Self>;
/// }
/// ```
pub trait Element: Clone + Send + 'static {
    /// Container used to hold this type inside an agent.
    type Container: ElementContainer<Self>;
}

/// Primitive types with a lock-free atomic representation.
pub trait AtomicPrimitive: Copy + Send + Sync + 'static {
    /// Underlying atomic storage.
    type Atomic: Send + Sync + 'static;

    /// Creates the atomic storage.
    fn new_atomic(value: Self) -> Self::Atomic;

    /// Loads the value.
    fn load(atomic: &Self::Atomic) -> Self;

    /// Stores the value.
    fn store(atomic: &Self::Atomic, value: Self);

    /// Swaps the value.
    fn swap(atomic: &Self::Atomic, value: Self) -> Self;

    /// Compares bitwise and exchanges the value, possibly failing spuriously.
    fn compare_exchange_weak(atomic: &Self::Atomic, current: Self, new: Self) -> Result<Self, Self>;
}

macro_rules! impl_atomic_int {
    ($($ty:ty => $atomic:ty),+) => {$(
        impl AtomicPrimitive for $ty {
            type Atomic = $atomic;

            #[inline]
            fn new_atomic(value: Self) -> Self::Atomic {
                <$atomic>::new(value)
            }

            #[inline]
            fn load(atomic: &Self::Atomic) -> Self {
                atomic.load(Ordering::Relaxed)
            }

            #[inline]
            fn store(atomic: &Self::Atomic, value: Self) {
                atomic.store(value, Ordering::Relaxed);
            }

            #[inline]
            fn swap(atomic: &Self::Atomic, value: Self) -> Self {
                atomic.swap(value, Ordering::Relaxed)
            }

            #[inline]
            fn compare_exchange_weak(atomic: &Self::Atomic, current: Self, new: Self) -> Result<Self, Self> {
                atomic.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed)
            }
        }

        impl Element for $ty {
            type Container = AtomicElement<$ty>;
        }
    )+};
}

macro_rules! impl_atomic_float {
    ($($ty:ty => $atomic:ty),+) => {$(
        impl AtomicPrimitive for $ty {
            type Atomic = $atomic;

            #[inline]
            fn new_atomic(value: Self) -> Self::Atomic {
                <$atomic>::new(value.to_bits())
            }

            #[inline]
            fn load(atomic: &Self::Atomic) -> Self {
                <$ty>::from_bits(atomic.load(Ordering::Relaxed))
            }

            #[inline]
            fn store(atomic: &Self::Atomic, value: Self) {
                atomic.store(value.to_bits(), Ordering::Relaxed);
            }

            #[inline]
            fn swap(atomic: &Self::Atomic, value: Self) -> Self {
                <$ty>::from_bits(atomic.swap(value.to_bits(), Ordering::Relaxed))
            }

            #[inline]
            fn compare_exchange_weak(atomic: &Self::Atomic, current: Self, new: Self) -> Result<Self, Self> {
                atomic
                    .compare_exchange_weak(
                        current.to_bits(),
                        new.to_bits(),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .map(<$ty>::from_bits)
                    .map_err(<$ty>::from_bits)
            }
        }

        impl Element for $ty {
            type Container = AtomicElement<$ty>;
        }
    )+};
}

impl_atomic_int!(
    i8 => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
    isize => AtomicIsize,
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize
);
impl_atomic_float!(f32 => AtomicU32, f64 => AtomicU64);

/// Lock-free container for primitive numeric types.
pub struct AtomicElement<T: AtomicPrimitive> {
    value: T::Atomic,
}

impl<T: AtomicPrimitive> ElementContainer<T> for AtomicElement<T> {
    fn new(value: T) -> Self {
        Self { value: T::new_atomic(value) }
    }

    #[inline]
    fn load(&self) -> T {
        T::load(&self.value)
    }

    #[inline]
    fn store(&self, value: T) {
        T::store(&self.value, value);
    }

    #[inline]
    fn exchange(&self, value: T) -> T {
        T::swap(&self.value, value)
    }

    #[inline]
    fn modify<F, U>(&self, mut f: F) -> U
    where
        F: FnMut(&mut T) -> U,
    {
        // Only the owning thread modifies the value, so the loop only spins when the combiner
        // exchanges the value underneath us, which it does at most once per reset.
        let backoff = Backoff::new();
        let mut current = T::load(&self.value);
        loop {
            let mut next = current;
            let result = f(&mut next);
            match T::compare_exchange_weak(&self.value, current, next) {
                Ok(_) => return result,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }
}

/// Mutex-guarded container for arbitrary types.
pub struct MutexElement<T> {
    value: Mutex<T>,
}

impl<T: Clone + Send + 'static> ElementContainer<T> for MutexElement<T> {
    fn new(value: T) -> Self {
        Self { value: Mutex::new(value) }
    }

    fn load(&self) -> T {
        self.value.lock().clone()
    }

    fn store(&self, value: T) {
        *self.value.lock() = value;
    }

    fn exchange(&self, value: T) -> T {
        std::mem::replace(&mut *self.value.lock(), value)
    }

    fn modify<F, U>(&self, mut f: F) -> U
    where
        F: FnMut(&mut T) -> U,
    {
        let mut guard = self.value.lock();
        f(&mut *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::{AtomicElement, ElementContainer, MutexElement};

    #[test]
    fn test_atomic_int_primitives() {
        let cell = AtomicElement::<i64>::new(5);
        assert_eq!(cell.load(), 5);

        cell.modify(|v| *v += 10);
        assert_eq!(cell.load(), 15);

        assert_eq!(cell.exchange(0), 15);
        assert_eq!(cell.load(), 0);

        cell.store(-3);
        assert_eq!(cell.load(), -3);
    }

    #[test]
    fn test_atomic_float_primitives() {
        let cell = AtomicElement::<f64>::new(0.5);
        cell.modify(|v| *v += 0.25);
        assert_eq!(cell.load(), 0.75);

        assert_eq!(cell.exchange(-1.0), 0.75);
        assert_eq!(cell.load(), -1.0);
    }

    #[test]
    fn test_modify_returns_closure_result() {
        let cell = AtomicElement::<u32>::new(9);
        let was_odd = cell.modify(|v| {
            let odd = *v % 2 == 1;
            *v += 1;
            odd
        });
        assert!(was_odd);
        assert_eq!(cell.load(), 10);
    }

    #[test]
    fn test_atomic_modify_races_exchange() {
        let cell = AtomicElement::<u64>::new(0);
        let mut drained = 0;

        crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| {
                for _ in 0..100_000 {
                    cell.modify(|v| *v += 1);
                }
            });

            for _ in 0..1_000 {
                drained += cell.exchange(0);
            }
        })
        .unwrap();

        drained += cell.exchange(0);
        assert_eq!(drained, 100_000);
    }

    #[test]
    fn test_mutex_element() {
        let cell = MutexElement::new(vec![1, 2]);
        cell.modify(|v| v.push(3));
        assert_eq!(cell.load(), vec![1, 2, 3]);

        assert_eq!(cell.exchange(Vec::new()), vec![1, 2, 3]);
        assert!(cell.load().is_empty());
    }
}

//! Binary operators used to reduce values.
//!
//! An [`Operator`] must be associative and commutative, with no side effects, and
//! `identity() op x == x` must hold.  The fold order used by combiners follows the order agents
//! were registered in, not the order values were written in, so a non-commutative operator yields
//! order-dependent answers.
//!
//! An [`InverseOperator`] undoes an operator (`(x op y) inv y == x`).  When one is available,
//! windowed reads are computed as the difference between two cumulative samples in O(1).  Reducers
//! without one use [`VoidOp`] and windowed reads re-reduce every sample inside the window.

use std::fmt;

/// Numeric types that can be reduced by the built-in operators.
pub trait Arithmetic: Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Additive identity.
    const ZERO: Self;

    /// Smallest representable value, used as the identity of [`MaxTo`].
    const LOWEST: Self;

    /// Largest representable value, used as the identity of [`MinTo`].
    const HIGHEST: Self;

    /// Adds `rhs`, wrapping on integer overflow.
    fn add(self, rhs: Self) -> Self;

    /// Subtracts `rhs`, wrapping on integer overflow.
    fn sub(self, rhs: Self) -> Self;

    /// Divides by `n`, used when rolling series values up into averages.
    fn divide(self, n: u64) -> Self;

    /// Converts to `f64` for export, possibly losing precision.
    fn as_f64(self) -> f64;
}

macro_rules! impl_arithmetic_int {
    ($($ty:ty),+) => {$(
        impl Arithmetic for $ty {
            const ZERO: Self = 0;
            const LOWEST: Self = <$ty>::MIN;
            const HIGHEST: Self = <$ty>::MAX;

            #[inline]
            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            #[inline]
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            fn divide(self, n: u64) -> Self {
                if n == 0 {
                    return self;
                }
                (self as i128 / n as i128) as $ty
            }

            #[inline]
            #[allow(clippy::cast_precision_loss)]
            fn as_f64(self) -> f64 {
                self as f64
            }
        }
    )+};
}

macro_rules! impl_arithmetic_float {
    ($($ty:ty),+) => {$(
        impl Arithmetic for $ty {
            const ZERO: Self = 0.0;
            const LOWEST: Self = <$ty>::NEG_INFINITY;
            const HIGHEST: Self = <$ty>::INFINITY;

            #[inline]
            fn add(self, rhs: Self) -> Self {
                self + rhs
            }

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }

            #[inline]
            #[allow(clippy::cast_precision_loss)]
            fn divide(self, n: u64) -> Self {
                if n == 0 {
                    return self;
                }
                self / n as $ty
            }

            #[inline]
            fn as_f64(self) -> f64 {
                f64::from(self)
            }
        }
    )+};
}

impl_arithmetic_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
impl_arithmetic_float!(f32, f64);

/// An associative, commutative binary operator with an identity value.
pub trait Operator<T>: Send + Sync + 'static {
    /// Whether rolling several values of this operator up into one should average them.
    ///
    /// Sums averaged over a minute read as "per second" again, while maxima and minima are kept
    /// as-is.
    const DIVIDE_ON_ADDITION: bool = false;

    /// The identity value: `identity() op x == x`.
    fn identity(&self) -> T;

    /// Applies `acc = acc op value`.
    fn apply(&self, acc: &mut T, value: &T);
}

/// The inverse of an [`Operator`].
pub trait InverseOperator<T>: Default + Send + Sync + 'static {
    /// Whether this is a real inverse.  [`VoidOp`] is the only operator setting this to `false`.
    const INVERTIBLE: bool = true;

    /// Applies `acc = acc inv value`.
    fn apply_inverse(&self, acc: &mut T, value: &T);
}

/// Sums values.
#[derive(Clone, Copy, Debug, Default)]
pub struct AddTo;

impl<T: Arithmetic> Operator<T> for AddTo {
    const DIVIDE_ON_ADDITION: bool = true;

    fn identity(&self) -> T {
        T::ZERO
    }

    #[inline]
    fn apply(&self, acc: &mut T, value: &T) {
        *acc = acc.add(*value);
    }
}

/// Subtracts values; the inverse of [`AddTo`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MinusFrom;

impl<T: Arithmetic> InverseOperator<T> for MinusFrom {
    #[inline]
    fn apply_inverse(&self, acc: &mut T, value: &T) {
        *acc = acc.sub(*value);
    }
}

/// Keeps the largest value.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxTo;

impl<T: Arithmetic> Operator<T> for MaxTo {
    fn identity(&self) -> T {
        T::LOWEST
    }

    #[inline]
    fn apply(&self, acc: &mut T, value: &T) {
        if *value > *acc {
            *acc = *value;
        }
    }
}

/// Keeps the smallest value.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinTo;

impl<T: Arithmetic> Operator<T> for MinTo {
    fn identity(&self) -> T {
        T::HIGHEST
    }

    #[inline]
    fn apply(&self, acc: &mut T, value: &T) {
        if *value < *acc {
            *acc = *value;
        }
    }
}

/// Placeholder for operators without an inverse.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoidOp;

impl<T> InverseOperator<T> for VoidOp {
    const INVERTIBLE: bool = false;

    fn apply_inverse(&self, _acc: &mut T, _value: &T) {
        debug_assert!(false, "VoidOp has no inverse");
    }
}

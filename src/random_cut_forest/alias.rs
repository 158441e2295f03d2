use ndarray::ScalarOperand;
use num::{Float, FromPrimitive};
use std::fmt;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

/// Float type accepted by the forest. `Send + Sync` lets trees fan out over rayon.
pub trait FType:
    Float
    + FromPrimitive
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + fmt::Debug
    + fmt::Display
    + ScalarOperand
    + Send
    + Sync
{
}

impl<T> FType for T where
    T: Float
        + FromPrimitive
        + AddAssign
        + SubAssign
        + MulAssign
        + DivAssign
        + fmt::Debug
        + fmt::Display
        + ScalarOperand
        + Send
        + Sync
{
}

/// Convert an `f64` into `F`. Lossy for `f32`, never fails for the float types.
#[inline]
pub(crate) fn from_f64<F: FType>(value: f64) -> F {
    F::from_f64(value).unwrap_or_else(F::nan)
}

/// Convert a count into `F`.
#[inline]
pub(crate) fn from_usize<F: FType>(value: usize) -> F {
    F::from_usize(value).unwrap_or_else(F::infinity)
}

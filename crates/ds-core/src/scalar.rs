use core::fmt::{self, Debug};
use core::ops::{Add, Div, Mul, Neg, Sub};

use crate::error::{CoreError, CoreResult};

/// Which numeric representation a scalar type is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarKind {
    Double,
    AutoDiff,
    Symbolic,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Double => "f64",
            ScalarKind::AutoDiff => "AutoDiff",
            ScalarKind::Symbolic => "Expression",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric type a system can be instantiated over.
///
/// Model code is written once against this trait. Comparisons return
/// `Option<bool>` because a symbolic value may not decide them.
pub trait Scalar:
    Clone
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    const KIND: ScalarKind;

    /// Embed a plain number. Derivatives are zero, expressions are constants.
    fn from_f64(value: f64) -> Self;

    /// The numeric value, when one exists.
    fn to_f64(&self) -> Option<f64>;

    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    fn one() -> Self {
        Self::from_f64(1.0)
    }

    fn infinity() -> Self {
        Self::from_f64(f64::INFINITY)
    }

    fn partial_lt(&self, other: &Self) -> Option<bool> {
        Some(self.to_f64()? < other.to_f64()?)
    }

    fn partial_le(&self, other: &Self) -> Option<bool> {
        Some(self.to_f64()? <= other.to_f64()?)
    }
}

impl Scalar for f64 {
    const KIND: ScalarKind = ScalarKind::Double;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(&self) -> Option<f64> {
        Some(*self)
    }
}

/// Extract the numeric value of `value` or fail naming `what`.
pub fn extract_f64<T: Scalar>(value: &T, what: &'static str) -> CoreResult<f64> {
    value
        .to_f64()
        .ok_or(CoreError::NotExtractable { what, kind: T::KIND })
}

/// Clamp into `[lo, hi]`; `None` when a comparison is undecidable.
pub fn partial_clamp<T: Scalar>(value: T, lo: &T, hi: &T) -> Option<T> {
    if value.partial_lt(lo)? {
        return Some(lo.clone());
    }
    if hi.partial_lt(&value)? {
        return Some(hi.clone());
    }
    Some(value)
}

pub fn ensure_finite(v: f64, what: &'static str) -> CoreResult<f64> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AutoDiff, Expression};

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(f64::KIND, ScalarKind::Double);
        assert_eq!(AutoDiff::KIND, ScalarKind::AutoDiff);
        assert_eq!(Expression::KIND, ScalarKind::Symbolic);
        assert_eq!(ScalarKind::Symbolic.to_string(), "Expression");
    }

    #[test]
    fn extract_fails_for_free_variable() {
        let x = Expression::variable("x");
        let err = extract_f64(&x, "time").unwrap_err();
        assert!(format!("{err}").contains("non-constant Expression"));
        assert_eq!(extract_f64(&Expression::constant(2.5), "time").unwrap(), 2.5);
    }

    #[test]
    fn clamp_decides_numeric_and_defers_symbolic() {
        assert_eq!(partial_clamp(5.0, &0.0, &1.0), Some(1.0));
        assert_eq!(partial_clamp(-5.0, &0.0, &1.0), Some(0.0));
        assert_eq!(partial_clamp(0.5, &0.0, &1.0), Some(0.5));
        let x = Expression::variable("x");
        let lo = Expression::constant(0.0);
        let hi = Expression::constant(1.0);
        assert_eq!(partial_clamp(x, &lo, &hi), None);
    }

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(f64::NAN, "test").unwrap_err();
        assert!(format!("{err}").contains("Non-finite"));
    }
}

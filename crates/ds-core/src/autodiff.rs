//! Forward-mode automatic differentiation scalar.
//!
//! An empty gradient stands for "all partials zero" so constants never need to
//! know how many independent variables are in play.

use core::ops::{Add, Div, Mul, Neg, Sub};

use nalgebra::DVector;

use crate::scalar::{Scalar, ScalarKind};

#[derive(Clone, Debug, PartialEq)]
pub struct AutoDiff {
    value: f64,
    derivatives: DVector<f64>,
}

impl AutoDiff {
    pub fn new(value: f64, derivatives: DVector<f64>) -> Self {
        Self { value, derivatives }
    }

    /// A value with no dependence on any independent variable.
    pub fn constant(value: f64) -> Self {
        Self::new(value, DVector::zeros(0))
    }

    /// The `index`-th of `count` independent variables (unit seed).
    pub fn variable(value: f64, index: usize, count: usize) -> Self {
        let mut derivatives = DVector::zeros(count);
        if index < count {
            derivatives[index] = 1.0;
        }
        Self::new(value, derivatives)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn derivatives(&self) -> &DVector<f64> {
        &self.derivatives
    }

    /// Partial with respect to variable `index` (zero when not tracked).
    pub fn derivative(&self, index: usize) -> f64 {
        self.derivatives.get(index).copied().unwrap_or(0.0)
    }

    /// `a * da + b * db`, padding the shorter gradient with zeros.
    fn combine(a: f64, da: &DVector<f64>, b: f64, db: &DVector<f64>) -> DVector<f64> {
        let n = da.len().max(db.len());
        DVector::from_fn(n, |i, _| {
            let x = da.get(i).copied().unwrap_or(0.0);
            let y = db.get(i).copied().unwrap_or(0.0);
            a * x + b * y
        })
    }
}

impl From<f64> for AutoDiff {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl Add for AutoDiff {
    type Output = AutoDiff;
    fn add(self, rhs: AutoDiff) -> AutoDiff {
        let d = Self::combine(1.0, &self.derivatives, 1.0, &rhs.derivatives);
        AutoDiff::new(self.value + rhs.value, d)
    }
}

impl Sub for AutoDiff {
    type Output = AutoDiff;
    fn sub(self, rhs: AutoDiff) -> AutoDiff {
        let d = Self::combine(1.0, &self.derivatives, -1.0, &rhs.derivatives);
        AutoDiff::new(self.value - rhs.value, d)
    }
}

impl Mul for AutoDiff {
    type Output = AutoDiff;
    fn mul(self, rhs: AutoDiff) -> AutoDiff {
        // d(uv) = v du + u dv
        let d = Self::combine(rhs.value, &self.derivatives, self.value, &rhs.derivatives);
        AutoDiff::new(self.value * rhs.value, d)
    }
}

impl Div for AutoDiff {
    type Output = AutoDiff;
    fn div(self, rhs: AutoDiff) -> AutoDiff {
        // d(u/v) = du / v - u dv / v^2
        let inv = 1.0 / rhs.value;
        let d = Self::combine(
            inv,
            &self.derivatives,
            -self.value * inv * inv,
            &rhs.derivatives,
        );
        AutoDiff::new(self.value * inv, d)
    }
}

impl Neg for AutoDiff {
    type Output = AutoDiff;
    fn neg(self) -> AutoDiff {
        AutoDiff::new(-self.value, -self.derivatives)
    }
}

impl Scalar for AutoDiff {
    const KIND: ScalarKind = ScalarKind::AutoDiff;

    fn from_f64(value: f64) -> Self {
        Self::constant(value)
    }

    fn to_f64(&self) -> Option<f64> {
        Some(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_rule() {
        // f(x, y) = x * y at (3, 4)
        let x = AutoDiff::variable(3.0, 0, 2);
        let y = AutoDiff::variable(4.0, 1, 2);
        let f = x * y;
        assert_eq!(f.value(), 12.0);
        assert_eq!(f.derivative(0), 4.0);
        assert_eq!(f.derivative(1), 3.0);
    }

    #[test]
    fn quotient_rule() {
        // f(x) = 1 / x at x = 2 -> f' = -1/4
        let x = AutoDiff::variable(2.0, 0, 1);
        let f = AutoDiff::one() / x;
        assert!((f.value() - 0.5).abs() < 1e-15);
        assert!((f.derivative(0) + 0.25).abs() < 1e-15);
    }

    #[test]
    fn constants_mix_with_seeded_values() {
        let x = AutoDiff::variable(1.5, 0, 3);
        let f = AutoDiff::constant(2.0) * x.clone() - AutoDiff::constant(1.0);
        assert_eq!(f.value(), 2.0);
        assert_eq!(f.derivatives().len(), 3);
        assert_eq!(f.derivative(0), 2.0);
        assert_eq!(f.derivative(2), 0.0);
        assert_eq!((-x).derivative(0), -1.0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn value_part_matches_f64(a in -1e3_f64..1e3, b in 0.1_f64..1e3) {
            let x = AutoDiff::variable(a, 0, 1);
            let y = AutoDiff::constant(b);
            let f = (x.clone() + y.clone()) * x.clone() / y.clone() - x;
            let expected = (a + b) * a / b - a;
            prop_assert!((f.value() - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        }

        #[test]
        fn derivative_of_square(a in -1e3_f64..1e3) {
            let x = AutoDiff::variable(a, 0, 1);
            let f = x.clone() * x;
            prop_assert!((f.derivative(0) - 2.0 * a).abs() <= 1e-9 * a.abs().max(1.0));
        }
    }
}

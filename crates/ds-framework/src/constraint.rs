//! Checkable constraints on a system's context.

use core::any::Any;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use ds_core::{Scalar, ScalarKind};
use nalgebra::DVector;
use tracing::debug;

use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::system::System;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstraintType {
    Equality,
    Inequality,
}

/// Element-wise bounds `lower <= g(context) <= upper`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintBounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
    kind: ConstraintType,
}

impl ConstraintBounds {
    /// `g(context) = 0` with `size` residuals.
    pub fn equality(size: usize) -> Self {
        Self {
            lower: DVector::zeros(size),
            upper: DVector::zeros(size),
            kind: ConstraintType::Equality,
        }
    }

    pub fn inequality(lower: DVector<f64>, upper: DVector<f64>) -> FrameworkResult<Self> {
        if lower.len() != upper.len() {
            return Err(FrameworkError::InvalidArg {
                what: "constraint bounds must have equal sizes",
            });
        }
        if lower.iter().chain(upper.iter()).any(|v| v.is_nan()) {
            return Err(FrameworkError::InvalidArg {
                what: "constraint bounds must not be NaN",
            });
        }
        if lower.iter().zip(upper.iter()).any(|(lo, hi)| lo > hi) {
            return Err(FrameworkError::InvalidArg {
                what: "constraint lower bound exceeds upper bound",
            });
        }
        Ok(Self {
            lower,
            upper,
            kind: ConstraintType::Inequality,
        })
    }

    pub fn size(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    pub fn kind(&self) -> ConstraintType {
        self.kind
    }
}

/// Residual rule of a constraint.
pub type ConstraintCalc<T> =
    Arc<dyn Fn(&dyn System<T>, &Context<T>) -> FrameworkResult<DVector<T>> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintOrigin {
    Internal,
    External,
}

#[derive(Clone)]
pub struct SystemConstraint<T: Scalar> {
    description: String,
    bounds: ConstraintBounds,
    calc: ConstraintCalc<T>,
    origin: ConstraintOrigin,
}

impl<T: Scalar> SystemConstraint<T> {
    pub fn new(
        description: impl Into<String>,
        bounds: ConstraintBounds,
        calc: impl Fn(&dyn System<T>, &Context<T>) -> FrameworkResult<DVector<T>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            bounds,
            calc: Arc::new(calc),
            origin: ConstraintOrigin::Internal,
        }
    }

    pub(crate) fn with_origin(mut self, origin: ConstraintOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn bounds(&self) -> &ConstraintBounds {
        &self.bounds
    }

    pub fn size(&self) -> usize {
        self.bounds.size()
    }

    pub fn origin(&self) -> ConstraintOrigin {
        self.origin
    }

    pub fn is_external(&self) -> bool {
        self.origin == ConstraintOrigin::External
    }

    /// Evaluate the residual `g(context)`.
    pub fn calc(&self, system: &dyn System<T>, context: &Context<T>) -> FrameworkResult<DVector<T>> {
        system.base().validate_context(context)?;
        let value = (self.calc)(system, context)?;
        if value.len() != self.bounds.size() {
            return Err(FrameworkError::ConstraintSize {
                description: self.description.clone(),
                expected: self.bounds.size(),
                actual: value.len(),
            });
        }
        Ok(value)
    }

    /// `Some(true)` when every residual is within bounds (± `tol`),
    /// `Some(false)` when any is outside, `None` when a residual has no
    /// numeric value and none is outside.
    pub fn check_satisfied(
        &self,
        system: &dyn System<T>,
        context: &Context<T>,
        tol: f64,
    ) -> FrameworkResult<Option<bool>> {
        let values = self.calc(system, context)?;
        let mut decided = true;
        for (i, v) in values.iter().enumerate() {
            let Some(v) = v.to_f64() else {
                decided = false;
                continue;
            };
            let lo = self.bounds.lower[i];
            let hi = self.bounds.upper[i];
            let ok = match self.bounds.kind {
                ConstraintType::Equality => (v - lo).abs() <= tol,
                ConstraintType::Inequality => v >= lo - tol && v <= hi + tol,
            };
            if !ok {
                return Ok(Some(false));
            }
        }
        Ok(decided.then_some(true))
    }
}

impl<T: Scalar> fmt::Debug for SystemConstraint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemConstraint")
            .field("description", &self.description)
            .field("bounds", &self.bounds)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// A constraint supplied from outside a system's definition, with an
/// optional rule per scalar type.
#[derive(Clone)]
pub struct ExternalSystemConstraint {
    description: String,
    bounds: ConstraintBounds,
    calcs: HashMap<ScalarKind, Arc<dyn Any + Send + Sync>>,
}

impl ExternalSystemConstraint {
    pub fn new(description: impl Into<String>, bounds: ConstraintBounds) -> Self {
        Self {
            description: description.into(),
            bounds,
            calcs: HashMap::new(),
        }
    }

    /// Provide the rule used when the system is instantiated over `T`.
    pub fn with_calc<T: Scalar>(
        mut self,
        calc: impl Fn(&dyn System<T>, &Context<T>) -> FrameworkResult<DVector<T>> + Send + Sync + 'static,
    ) -> Self {
        let calc: ConstraintCalc<T> = Arc::new(calc);
        self.calcs.insert(T::KIND, Arc::new(calc));
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn bounds(&self) -> &ConstraintBounds {
        &self.bounds
    }

    pub fn has_calc_for(&self, kind: ScalarKind) -> bool {
        self.calcs.contains_key(&kind)
    }

    fn calc_for<T: Scalar>(&self) -> Option<ConstraintCalc<T>> {
        self.calcs
            .get(&T::KIND)
            .and_then(|c| c.downcast_ref::<ConstraintCalc<T>>())
            .cloned()
    }

    /// Concrete constraint for scalar `T`. Without a rule for `T` the
    /// constraint is disabled: no residuals, always satisfied.
    pub(crate) fn instantiate<T: Scalar>(&self) -> SystemConstraint<T> {
        let constraint = match self.calc_for::<T>() {
            Some(calc) => SystemConstraint {
                description: self.description.clone(),
                bounds: self.bounds.clone(),
                calc,
                origin: ConstraintOrigin::External,
            },
            None => {
                debug!(
                    constraint = %self.description,
                    scalar = %T::KIND,
                    "external constraint has no rule for this scalar type"
                );
                SystemConstraint::new(
                    format!("{} (disabled for this scalar type)", self.description),
                    ConstraintBounds::equality(0),
                    |_: &dyn System<T>, _: &Context<T>| Ok(DVector::from_vec(Vec::new())),
                )
            }
        };
        constraint.with_origin(ConstraintOrigin::External)
    }
}

impl fmt::Debug for ExternalSystemConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.calcs.keys().copied().collect();
        kinds.sort();
        f.debug_struct("ExternalSystemConstraint")
            .field("description", &self.description)
            .field("bounds", &self.bounds)
            .field("scalars", &kinds)
            .finish()
    }
}

/// Ordered constraints of one system. Internal constraints come first.
pub(crate) struct ConstraintRegistry<T: Scalar> {
    constraints: Vec<SystemConstraint<T>>,
    externals: Vec<ExternalSystemConstraint>,
}

impl<T: Scalar> Default for ConstraintRegistry<T> {
    fn default() -> Self {
        Self {
            constraints: Vec::new(),
            externals: Vec::new(),
        }
    }
}

impl<T: Scalar> ConstraintRegistry<T> {
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn get(&self, index: usize) -> Option<&SystemConstraint<T>> {
        self.constraints.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemConstraint<T>> {
        self.constraints.iter()
    }

    pub fn first_external(&self) -> Option<&ExternalSystemConstraint> {
        self.externals.first()
    }

    pub fn externals(&self) -> &[ExternalSystemConstraint] {
        &self.externals
    }

    /// Caller checks the internal-before-external ordering.
    pub fn push_internal(&mut self, constraint: SystemConstraint<T>) -> usize {
        self.constraints.push(constraint);
        self.constraints.len() - 1
    }

    pub fn push_external(&mut self, external: ExternalSystemConstraint) -> usize {
        self.constraints.push(external.instantiate::<T>());
        self.externals.push(external);
        self.constraints.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inequality_bounds_are_validated() {
        assert!(ConstraintBounds::inequality(DVector::from_vec(vec![0.0]), DVector::from_vec(vec![1.0])).is_ok());
        assert!(ConstraintBounds::inequality(DVector::from_vec(vec![2.0]), DVector::from_vec(vec![1.0])).is_err());
        assert!(ConstraintBounds::inequality(DVector::zeros(1), DVector::zeros(2)).is_err());
    }

    #[test]
    fn external_calc_is_per_scalar() {
        let ext = ExternalSystemConstraint::new("x >= 0", ConstraintBounds::equality(1))
            .with_calc::<f64>(|_, _| Ok(DVector::from_vec(vec![0.0])));
        assert!(ext.has_calc_for(ScalarKind::Double));
        assert!(!ext.has_calc_for(ScalarKind::AutoDiff));

        let c = ext.instantiate::<f64>();
        assert_eq!(c.description(), "x >= 0");
        assert!(c.is_external());

        let d = ext.instantiate::<ds_core::AutoDiff>();
        assert_eq!(d.description(), "x >= 0 (disabled for this scalar type)");
        assert_eq!(d.size(), 0);
        assert!(d.is_external());
    }
}

//! Scalar conversion and cloning of systems.

use std::sync::Arc;

use ds_core::{AutoDiff, Expression, InputPortIndex, Scalar, ScalarKind};
use ds_values::PortValue;
use tracing::debug;

use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::system::{System, share_boxed};

impl<T: Scalar> dyn System<T> {
    /// Rebuild this system over `U`, carrying over its name and external
    /// constraints. `None` when the registered converter has no `T -> U`
    /// function or the instance refuses.
    pub fn to_scalar_type_maybe<U: Scalar>(&self) -> Option<Arc<dyn System<U>>> {
        let base = self.base();
        let mut converted = base.converter().convert::<T, U>(self)?;
        let target = converted.base_mut();
        target.set_name(base.name());
        target.add_external_constraints(base.external_constraints().iter().cloned());
        debug!(
            system = %base.pathname(),
            from = %T::KIND,
            to = %U::KIND,
            "converted scalar type"
        );
        Some(share_boxed(converted))
    }

    pub fn to_scalar_type<U: Scalar>(&self) -> FrameworkResult<Arc<dyn System<U>>> {
        self.to_scalar_type_maybe::<U>()
            .ok_or_else(|| FrameworkError::ConversionUnsupported {
                system: self.base().label(),
                target: U::KIND,
            })
    }

    pub fn to_autodiff(&self) -> FrameworkResult<Arc<dyn System<AutoDiff>>> {
        self.to_scalar_type::<AutoDiff>()
    }

    pub fn to_autodiff_maybe(&self) -> Option<Arc<dyn System<AutoDiff>>> {
        self.to_scalar_type_maybe::<AutoDiff>()
    }

    pub fn to_symbolic(&self) -> FrameworkResult<Arc<dyn System<Expression>>> {
        self.to_scalar_type::<Expression>()
    }

    pub fn to_symbolic_maybe(&self) -> Option<Arc<dyn System<Expression>>> {
        self.to_scalar_type_maybe::<Expression>()
    }

    /// A fresh system with the same configuration, made by converting to
    /// another scalar type and back.
    pub fn clone_system(&self) -> FrameworkResult<Arc<dyn System<T>>> {
        let round_trip = if T::KIND == ScalarKind::Double {
            self.to_scalar_type_maybe::<AutoDiff>()
                .and_then(|intermediate| intermediate.to_scalar_type_maybe::<T>())
        } else {
            self.to_scalar_type_maybe::<f64>()
                .and_then(|intermediate| intermediate.to_scalar_type_maybe::<T>())
        };
        round_trip.ok_or_else(|| FrameworkError::CloningUnsupported {
            system: self.base().label(),
        })
    }

    /// Copy every input value fixed in `other_context` (owned by the f64
    /// system `other`) onto the same-index port in `context`. Ports with
    /// nothing fixed are left alone.
    pub fn fix_input_ports_from(
        &self,
        other: &dyn System<f64>,
        other_context: &Context<f64>,
        context: &mut Context<T>,
    ) -> FrameworkResult<()> {
        other.base().validate_context(other_context)?;
        self.base().validate_context(context)?;
        if other.num_input_ports() != self.num_input_ports() {
            return Err(FrameworkError::InvalidArg {
                what: "fix_input_ports_from requires systems with the same number of input ports",
            });
        }
        for i in 0..self.num_input_ports() {
            let index = InputPortIndex::new(i);
            let Some(source) = other_context.input_value(index) else {
                continue;
            };
            let value = match source {
                PortValue::Vector(v) => PortValue::Vector(v.map(|x| T::from_f64(*x))),
                PortValue::Abstract(v) => PortValue::Abstract(v.clone()),
            };
            self.get_input_port(index)?.fix_value(context, value)?;
        }
        Ok(())
    }
}

//! Rate-limited first-order actuator.
//!
//! Dynamics: `dx/dt = clamp((cmd - x) / tau, -rate_limit, rate_limit)`.
//! The position must stay within `[position_min, position_max]`, declared
//! as an inequality constraint; a witness function marks arrival at the
//! upper limit.

use core::any::Any;

use ds_core::{CoreError, InputPortIndex, OutputPortIndex, Scalar, partial_clamp};
use ds_framework::{
    ConstraintBounds, Context, DependencyTicket, EventStatus, FrameworkError, FrameworkResult,
    PublishEvent, System, SystemBase, SystemConstraint, SystemFamily, SystemScalarConverter,
    WitnessTriggerDirection,
};
use ds_values::{BasicVector, ContinuousState};
use nalgebra::DVector;
use tracing::debug;

use crate::element;
use crate::error::{PrimitiveError, PrimitiveResult};

/// First-order actuator configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirstOrderLagConfig {
    /// Time constant (seconds).
    pub tau: f64,
    /// Maximum rate of change (1/s).
    pub rate_limit: f64,
    /// Lower position limit.
    pub position_min: f64,
    /// Upper position limit.
    pub position_max: f64,
    /// Position at the start of a run.
    pub initial_position: f64,
}

impl Default for FirstOrderLagConfig {
    fn default() -> Self {
        Self {
            tau: 0.2,
            rate_limit: 5.0,
            position_min: 0.0,
            position_max: 1.0,
            initial_position: 0.0,
        }
    }
}

impl FirstOrderLagConfig {
    pub fn validate(&self) -> PrimitiveResult<()> {
        if !self.tau.is_finite() || self.tau <= 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "tau must be positive",
            });
        }
        if self.rate_limit.is_nan() || self.rate_limit <= 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "rate_limit must be positive",
            });
        }
        if self.position_min.is_nan() || self.position_max.is_nan() || self.position_min > self.position_max {
            return Err(PrimitiveError::InvalidArg {
                what: "position_min must not exceed position_max",
            });
        }
        Ok(())
    }

    /// Position derivative, `None` when the rate limit cannot be decided.
    fn rate<T: Scalar>(&self, position: T, command: T) -> Option<T> {
        let raw = (command - position) / T::from_f64(self.tau);
        partial_clamp(
            raw,
            &T::from_f64(-self.rate_limit),
            &T::from_f64(self.rate_limit),
        )
    }
}

pub struct FirstOrderLag<T: Scalar> {
    base: SystemBase<T>,
    config: FirstOrderLagConfig,
    command: InputPortIndex,
    position: OutputPortIndex,
}

fn position<T: Scalar>(context: &Context<T>) -> FrameworkResult<T> {
    element(context.continuous_state_vector(), 0, "actuator position")
}

impl<T: Scalar> FirstOrderLag<T> {
    pub fn new(config: FirstOrderLagConfig) -> PrimitiveResult<Self> {
        config.validate()?;
        let mut base = SystemBase::of::<Self>();
        base.declare_continuous_state_with(
            BasicVector::from_f64_slice(&[config.initial_position]),
            0,
            0,
            1,
        )?;
        let command = base.declare_vector_input_port("command", 1)?;
        let output = base.declare_vector_output_port(
            "position",
            1,
            [DependencyTicket::XC],
            |_system: &dyn System<T>, context, out: &mut BasicVector<T>| {
                out.set(0, position(context)?)?;
                Ok(())
            },
        )?;

        let bounds = ConstraintBounds::inequality(
            DVector::from_element(1, config.position_min),
            DVector::from_element(1, config.position_max),
        )?;
        base.add_constraint(SystemConstraint::new(
            "position within limits",
            bounds,
            |_system: &dyn System<T>, context: &Context<T>| Ok(DVector::from_element(1, position(context)?)),
        ))?;

        let upper = config.position_max;
        base.declare_witness_function(
            "position reaches upper limit",
            WitnessTriggerDirection::NegativeThenNonNegative,
            move |context: &Context<T>| {
                let x = context
                    .continuous_state_vector()
                    .get(0)
                    .cloned()
                    .unwrap_or_else(T::zero);
                x - T::from_f64(upper)
            },
            Some(
                PublishEvent::<T>::new(|context| {
                    debug!(time = ?context.time().to_f64(), "actuator reached its upper limit");
                    EventStatus::succeeded()
                })
                .into(),
            ),
        );

        base.set_converter(SystemScalarConverter::for_family::<FirstOrderLagFamily>());
        Ok(Self {
            base,
            config,
            command,
            position: output,
        })
    }

    pub fn config(&self) -> &FirstOrderLagConfig {
        &self.config
    }

    pub fn command(&self) -> InputPortIndex {
        self.command
    }

    pub fn position(&self) -> OutputPortIndex {
        self.position
    }
}

pub struct FirstOrderLagFamily;

impl SystemFamily for FirstOrderLagFamily {
    type Of<T: Scalar> = FirstOrderLag<T>;

    fn convert<S: Scalar, U: Scalar>(source: &FirstOrderLag<S>) -> Option<FirstOrderLag<U>> {
        FirstOrderLag::new(source.config.clone()).ok()
    }
}

impl<T: Scalar> System<T> for FirstOrderLag<T> {
    fn base(&self) -> &SystemBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<T> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn do_calc_time_derivatives(
        &self,
        context: &Context<T>,
        derivatives: &mut ContinuousState<T>,
    ) -> FrameworkResult<()> {
        let command = context
            .vector_input(self.command)?
            .ok_or(FrameworkError::InvalidArg {
                what: "input port 'command' has no value",
            })?;
        let command = element(command, 0, "actuator command")?;
        let rate = self
            .config
            .rate(position(context)?, command)
            .ok_or(CoreError::NotExtractable {
                what: "actuator rate limit",
                kind: T::KIND,
            })?;
        derivatives.vector_mut().set(0, rate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::Expression;
    use ds_framework::share;

    #[test]
    fn rate_is_limited() {
        let config = FirstOrderLagConfig::default();
        assert!((config.rate(0.0_f64, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(config.rate(0.0_f64, 2.0).unwrap(), 5.0);
        assert_eq!(config.rate(1.0_f64, -2.0).unwrap(), -5.0);
    }

    #[test]
    fn derivatives_follow_the_command() {
        let lag = FirstOrderLag::<f64>::new(FirstOrderLagConfig::default()).unwrap();
        let command = lag.command();
        let system = share(lag);
        let mut context = system.create_default_context().unwrap();
        system
            .get_input_port(command)
            .unwrap()
            .fix_vector(&mut context, vec![0.5])
            .unwrap();
        let derivatives = system.eval_time_derivatives(&context).unwrap();
        assert!((derivatives.vector().get(0).copied().unwrap() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn missing_command_is_an_error() {
        let system = share(FirstOrderLag::<f64>::new(FirstOrderLagConfig::default()).unwrap());
        let context = system.create_default_context().unwrap();
        assert!(system.eval_time_derivatives(&context).is_err());
    }

    #[test]
    fn constraint_and_witness() {
        let system = share(FirstOrderLag::<f64>::new(FirstOrderLagConfig::default()).unwrap());
        let mut context = system.create_default_context().unwrap();
        assert_eq!(system.num_constraints(), 1);
        assert_eq!(system.check_system_constraints_satisfied(&context, 1e-9).unwrap(), Some(true));

        context.continuous_state_mut().vector_mut().set(0, 1.5).unwrap();
        assert_eq!(system.check_system_constraints_satisfied(&context, 1e-9).unwrap(), Some(false));

        let witnesses = system.get_witness_functions(&context).unwrap();
        assert_eq!(witnesses.len(), 1);
        let w = system.calc_witness_value(&context, witnesses[0]).unwrap();
        assert!((w - 0.5).abs() < 1e-12);
    }

    #[test]
    fn symbolic_conversion_keeps_structure() {
        let system = share(FirstOrderLag::<f64>::new(FirstOrderLagConfig::default()).unwrap());
        let symbolic = system.to_symbolic().unwrap();
        assert_eq!(symbolic.num_continuous_states(), 1);
        assert_eq!(symbolic.num_constraints(), 1);
        let mut context = symbolic.create_default_context().unwrap();
        symbolic
            .get_input_port(InputPortIndex::new(0))
            .unwrap()
            .fix_vector(&mut context, vec![Expression::variable("cmd")])
            .unwrap();
        // The rate limit cannot be decided for a free variable.
        assert!(symbolic.eval_time_derivatives(&context).is_err());
    }
}

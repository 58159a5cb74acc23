//! Damped torsional shaft.
//!
//! State is `q = [theta]`, `v = [omega]`. With inertia `J`, viscous
//! damping `c` and torsional stiffness `k`:
//!
//! ```text
//! dtheta/dt = omega
//! domega/dt = (tau - c*omega - k*theta) / J
//! ```
//!
//! The external torque input is optional; an unconnected port means zero
//! applied torque.

use core::any::Any;

use ds_core::{CacheIndex, InputPortIndex, NumericParameterIndex, OutputPortIndex, Scalar};
use ds_framework::{
    Context, DependencyTicket, FrameworkError, FrameworkResult, System, SystemBase, SystemFamily,
    SystemScalarConverter,
};
use ds_values::{BasicVector, ContinuousState};

use crate::element;
use crate::error::{PrimitiveError, PrimitiveResult};

/// Shaft configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaftConfig {
    /// Rotational inertia (kg·m²).
    pub inertia: f64,
    /// Viscous damping coefficient (N·m·s/rad).
    pub damping: f64,
    /// Torsional stiffness (N·m/rad).
    pub stiffness: f64,
    pub initial_angle: f64,
    pub initial_speed: f64,
}

impl Default for ShaftConfig {
    fn default() -> Self {
        Self {
            inertia: 1.0,
            damping: 0.1,
            stiffness: 0.0,
            initial_angle: 0.0,
            initial_speed: 0.0,
        }
    }
}

impl ShaftConfig {
    pub fn validate(&self) -> PrimitiveResult<()> {
        if !self.inertia.is_finite() || self.inertia <= 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "inertia must be positive",
            });
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "damping must be non-negative",
            });
        }
        if !self.stiffness.is_finite() || self.stiffness < 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "stiffness must be non-negative",
            });
        }
        Ok(())
    }
}

const INERTIA: usize = 0;
const DAMPING: usize = 1;
const STIFFNESS: usize = 2;

pub struct RotatingShaft<T: Scalar> {
    base: SystemBase<T>,
    config: ShaftConfig,
    parameters: NumericParameterIndex,
    torque: InputPortIndex,
    speed: OutputPortIndex,
    friction: CacheIndex,
}

/// `(theta, omega)` from the context.
fn angle_and_speed<T: Scalar>(context: &Context<T>) -> FrameworkResult<(T, T)> {
    let x = context.continuous_state_vector();
    Ok((element(x, 0, "shaft angle")?, element(x, 1, "shaft speed")?))
}

impl<T: Scalar> RotatingShaft<T> {
    pub fn new(config: ShaftConfig) -> PrimitiveResult<Self> {
        config.validate()?;
        let mut base = SystemBase::of::<Self>();
        base.declare_continuous_state_with(
            BasicVector::from_f64_slice(&[config.initial_angle, config.initial_speed]),
            1,
            1,
            0,
        )?;
        let parameters = base.declare_numeric_parameter(BasicVector::from_f64_slice(&[
            config.inertia,
            config.damping,
            config.stiffness,
        ]));
        let parameter_ticket = base
            .numeric_parameter_ticket(parameters)
            .unwrap_or(DependencyTicket::PN);
        let torque = base.declare_vector_input_port("torque", 1)?;
        let speed = base.declare_vector_output_port(
            "speed",
            1,
            [DependencyTicket::XC],
            |_system: &dyn System<T>, context, out: &mut BasicVector<T>| {
                let (_, omega) = angle_and_speed(context)?;
                out.set(0, omega)?;
                Ok(())
            },
        )?;
        // Damping torque -c*omega, shared by the derivatives and the power.
        let friction = base.declare_cache_entry(
            "friction torque",
            [DependencyTicket::XC, parameter_ticket],
            move |_system: &dyn System<T>, context: &Context<T>| {
                let (_, omega) = angle_and_speed(context)?;
                let c = element(context.numeric_parameter(parameters)?, DAMPING, "shaft damping")?;
                Ok(-(c * omega))
            },
        )?;

        base.set_converter(SystemScalarConverter::for_family::<ShaftFamily>());
        Ok(Self {
            base,
            config,
            parameters,
            torque,
            speed,
            friction,
        })
    }

    pub fn config(&self) -> &ShaftConfig {
        &self.config
    }

    pub fn parameters(&self) -> NumericParameterIndex {
        self.parameters
    }

    pub fn torque(&self) -> InputPortIndex {
        self.torque
    }

    pub fn speed(&self) -> OutputPortIndex {
        self.speed
    }

    pub fn friction_torque(&self) -> CacheIndex {
        self.friction
    }

    fn parameter(&self, context: &Context<T>, index: usize) -> FrameworkResult<T> {
        element(context.numeric_parameter(self.parameters)?, index, "shaft parameter")
    }

    fn applied_torque(&self, context: &Context<T>) -> FrameworkResult<T> {
        match context.vector_input(self.torque)? {
            Some(tau) => element(tau, 0, "shaft torque"),
            None => Ok(T::zero()),
        }
    }

    fn eval_friction(&self, context: &Context<T>) -> FrameworkResult<T> {
        let entry = self
            .base
            .cache_entry(self.friction)
            .ok_or(FrameworkError::InvalidArg {
                what: "cache entry index out of range",
            })?;
        Ok(entry.eval::<T>(self, context)?.as_ref().clone())
    }
}

pub struct ShaftFamily;

impl SystemFamily for ShaftFamily {
    type Of<T: Scalar> = RotatingShaft<T>;

    fn convert<S: Scalar, U: Scalar>(source: &RotatingShaft<S>) -> Option<RotatingShaft<U>> {
        RotatingShaft::new(source.config.clone()).ok()
    }
}

impl<T: Scalar> System<T> for RotatingShaft<T> {
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
        let (theta, omega) = angle_and_speed(context)?;
        let inertia = self.parameter(context, INERTIA)?;
        let stiffness = self.parameter(context, STIFFNESS)?;
        let net = self.applied_torque(context)? + self.eval_friction(context)? - stiffness * theta;
        let xdot = derivatives.vector_mut();
        xdot.set(0, omega)?;
        xdot.set(1, net / inertia)?;
        Ok(())
    }

    fn do_calc_potential_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        let (theta, _) = angle_and_speed(context)?;
        let k = self.parameter(context, STIFFNESS)?;
        Ok(T::from_f64(0.5) * k * theta.clone() * theta)
    }

    fn do_calc_kinetic_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        let (_, omega) = angle_and_speed(context)?;
        let inertia = self.parameter(context, INERTIA)?;
        Ok(T::from_f64(0.5) * inertia * omega.clone() * omega)
    }

    /// Rate at which the spring does work on the shaft.
    fn do_calc_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        let (theta, omega) = angle_and_speed(context)?;
        let k = self.parameter(context, STIFFNESS)?;
        Ok(-(k * theta * omega))
    }

    fn do_calc_non_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        let (_, omega) = angle_and_speed(context)?;
        let torque = self.applied_torque(context)? + self.eval_friction(context)?;
        Ok(torque * omega)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::AutoDiff;
    use ds_framework::share;

    fn spring() -> ShaftConfig {
        ShaftConfig {
            inertia: 2.0,
            damping: 0.1,
            stiffness: 4.0,
            initial_angle: 0.5,
            initial_speed: 50.0,
        }
    }

    #[test]
    fn acceleration_from_torque() {
        let shaft = RotatingShaft::<f64>::new(ShaftConfig {
            initial_angle: 0.0,
            ..spring()
        })
        .unwrap();
        let torque = shaft.torque();
        let system = share(shaft);
        let mut context = system.create_default_context().unwrap();
        system
            .get_input_port(torque)
            .unwrap()
            .fix_vector(&mut context, vec![10.0])
            .unwrap();

        let xdot = system.eval_time_derivatives(&context).unwrap();
        // (10 - 0.1 * 50) / 2
        assert!((xdot.vector().get(0).copied().unwrap() - 50.0).abs() < 1e-12);
        assert!((xdot.vector().get(1).copied().unwrap() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn unconnected_torque_is_zero() {
        let system = share(RotatingShaft::<f64>::new(spring()).unwrap());
        let context = system.create_default_context().unwrap();
        let xdot = system.eval_time_derivatives(&context).unwrap();
        // (-0.1 * 50 - 4 * 0.5) / 2
        assert!((xdot.vector().get(1).copied().unwrap() + 3.5).abs() < 1e-12);
    }

    #[test]
    fn angle_rate_is_the_speed() {
        let system = share(RotatingShaft::<f64>::new(spring()).unwrap());
        let context = system.create_default_context().unwrap();
        let mut qdot = BasicVector::zeros(1);
        system
            .map_velocity_to_qdot(&context, &BasicVector::from_f64_slice(&[3.0]), &mut qdot)
            .unwrap();
        assert_eq!(qdot.get(0).copied(), Some(3.0));
        let mut v = BasicVector::zeros(1);
        system.map_qdot_to_velocity(&context, &qdot, &mut v).unwrap();
        assert_eq!(v.get(0).copied(), Some(3.0));
    }

    #[test]
    fn explicit_derivatives_zero_the_residual() {
        let system = share(RotatingShaft::<f64>::new(spring()).unwrap());
        let context = system.create_default_context().unwrap();
        let xdot = system.eval_time_derivatives(&context).unwrap();
        let mut residual = system.allocate_implicit_time_derivatives_residual();
        system
            .calc_implicit_time_derivatives_residual(&context, &xdot, &mut residual)
            .unwrap();
        assert!(residual.iter().all(|r| r.abs() < 1e-12));

        let mut proposed = system.allocate_time_derivatives();
        proposed.set_from_slice(&[50.0, 0.0]).unwrap();
        system
            .calc_implicit_time_derivatives_residual(&context, &proposed, &mut residual)
            .unwrap();
        assert!((residual.get(1).copied().unwrap() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn energy_accounting() {
        let system = share(RotatingShaft::<f64>::new(spring()).unwrap());
        let context = system.create_default_context().unwrap();
        assert!((system.eval_potential_energy(&context).unwrap() - 0.5).abs() < 1e-12);
        assert!((system.eval_kinetic_energy(&context).unwrap() - 2500.0).abs() < 1e-9);
        assert!((system.eval_conservative_power(&context).unwrap() + 100.0).abs() < 1e-12);
        assert!((system.eval_non_conservative_power(&context).unwrap() + 250.0).abs() < 1e-9);

        // dKE/dt = PC + PNC, and d(PE + KE)/dt = PNC.
        let xdot = system.eval_time_derivatives(&context).unwrap();
        let (theta, omega) = (0.5, 50.0);
        let (thetadot, omegadot) = (
            xdot.vector().get(0).copied().unwrap(),
            xdot.vector().get(1).copied().unwrap(),
        );
        let dpe_dt = 4.0 * theta * thetadot;
        let dke_dt = 2.0 * omega * omegadot;
        let pc = system.eval_conservative_power(&context).unwrap();
        let pnc = system.eval_non_conservative_power(&context).unwrap();
        assert!((dke_dt - (pc + pnc)).abs() < 1e-9);
        assert!((dpe_dt + dke_dt - pnc).abs() < 1e-9);
    }

    #[test]
    fn friction_follows_parameter_changes() {
        let shaft = RotatingShaft::<f64>::new(spring()).unwrap();
        let (parameters, friction) = (shaft.parameters(), shaft.friction_torque());
        let system = share(shaft);
        let mut context = system.create_default_context().unwrap();
        let before = *system.eval_cache_entry::<f64>(&context, friction).unwrap();
        assert!((before + 5.0).abs() < 1e-12);

        context
            .numeric_parameter_mut(parameters)
            .unwrap()
            .set(DAMPING, 0.2)
            .unwrap();
        let after = *system.eval_cache_entry::<f64>(&context, friction).unwrap();
        assert!((after + 10.0).abs() < 1e-12);
    }

    #[test]
    fn autodiff_sensitivity_to_speed() {
        let system = share(RotatingShaft::<f64>::new(spring()).unwrap());
        let autodiff = system.to_autodiff().unwrap();
        let mut context = autodiff.create_default_context().unwrap();
        context
            .continuous_state_mut()
            .vector_mut()
            .set(1, AutoDiff::variable(50.0, 0, 1))
            .unwrap();
        let xdot = autodiff.eval_time_derivatives(&context).unwrap();
        // d(omegadot)/d(omega) = -c / J
        let omegadot = xdot.vector().get(1).cloned().unwrap();
        assert!((omegadot.derivative(0) + 0.05).abs() < 1e-12);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(RotatingShaft::<f64>::new(ShaftConfig { inertia: 0.0, ..spring() }).is_err());
        assert!(RotatingShaft::<f64>::new(ShaftConfig { damping: -1.0, ..spring() }).is_err());
    }
}

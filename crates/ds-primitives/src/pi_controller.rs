//! Sampled PI controller.
//!
//! Each sample computes `e = sp - pv` and
//! `u = clamp(kp * e + (kp / ti) * integral, out_min, out_max)`.
//! While the output is saturated the integral is frozen (anti-windup).
//! The discrete state is one group `[integral, u]`; the output port holds
//! `u` between samples.

use core::any::Any;

use ds_core::{DiscreteStateIndex, InputPortIndex, OutputPortIndex, Scalar, partial_clamp};
use ds_framework::{
    Context, DependencyTicket, DiscreteUpdateEvent, EventStatus, System, SystemBase, SystemFamily,
    SystemScalarConverter,
};
use ds_values::{BasicVector, DiscreteValues};

use crate::element;
use crate::error::{PrimitiveError, PrimitiveResult};

/// PI controller configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PiConfig {
    /// Proportional gain.
    pub kp: f64,
    /// Integral time constant (seconds).
    pub ti: f64,
    /// Minimum output.
    pub out_min: f64,
    /// Maximum output.
    pub out_max: f64,
    /// Sample period (seconds).
    pub period: f64,
}

impl Default for PiConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ti: 1.0,
            out_min: -1.0,
            out_max: 1.0,
            period: 0.1,
        }
    }
}

impl PiConfig {
    pub fn validate(&self) -> PrimitiveResult<()> {
        if !self.ti.is_finite() || self.ti <= 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "ti must be positive",
            });
        }
        if self.out_min.is_nan() || self.out_max.is_nan() || self.out_min >= self.out_max {
            return Err(PrimitiveError::InvalidArg {
                what: "out_min must be less than out_max",
            });
        }
        if !self.period.is_finite() || self.period <= 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "sample period must be positive and finite",
            });
        }
        Ok(())
    }

    /// New `(integral, output)` after one sample of length `dt`; `None`
    /// when saturation cannot be decided for the scalar type.
    fn step<T: Scalar>(&self, integral: T, pv: T, sp: T, dt: f64) -> Option<(T, T)> {
        let kp = T::from_f64(self.kp);
        let ki = T::from_f64(self.kp / self.ti);
        let error = sp - pv;
        let integrated = integral.clone() + error.clone() * T::from_f64(dt);
        let raw = kp * error + ki * integrated.clone();
        let output = partial_clamp(
            raw.clone(),
            &T::from_f64(self.out_min),
            &T::from_f64(self.out_max),
        )?;
        let integral = if output == raw { integrated } else { integral };
        Some((integral, output))
    }
}

pub struct DiscretePiController<T: Scalar> {
    base: SystemBase<T>,
    config: PiConfig,
    pv: InputPortIndex,
    sp: InputPortIndex,
    output: OutputPortIndex,
    state: DiscreteStateIndex,
}

const INTEGRAL: usize = 0;
const OUTPUT: usize = 1;

fn scalar_input<T: Scalar>(context: &Context<T>, port: InputPortIndex, name: &str) -> Result<T, String> {
    match context.vector_input(port) {
        Ok(Some(value)) => element(value, 0, "controller input").map_err(|e| e.to_string()),
        Ok(None) => Err(format!("input port '{name}' has no value")),
        Err(err) => Err(err.to_string()),
    }
}

/// Shared body of the sample and initialization updates.
fn update<T: Scalar>(
    config: &PiConfig,
    ports: (InputPortIndex, InputPortIndex),
    state: DiscreteStateIndex,
    dt: f64,
    context: &Context<T>,
    discrete: &mut DiscreteValues<T>,
) -> EventStatus {
    let (pv, sp) = match (scalar_input(context, ports.0, "pv"), scalar_input(context, ports.1, "sp")) {
        (Ok(pv), Ok(sp)) => (pv, sp),
        (Err(msg), _) | (_, Err(msg)) => return EventStatus::failed(msg),
    };
    let group = match discrete.group_mut(state.index()) {
        Ok(group) => group,
        Err(err) => return EventStatus::failed(err.to_string()),
    };
    let integral = match element(group, INTEGRAL, "controller integral") {
        Ok(v) => v,
        Err(err) => return EventStatus::failed(err.to_string()),
    };
    let Some((integral, output)) = config.step(integral, pv, sp, dt) else {
        return EventStatus::failed("controller saturation is undecidable for this scalar type");
    };
    match group.set(INTEGRAL, integral).and_then(|()| group.set(OUTPUT, output)) {
        Ok(()) => EventStatus::succeeded(),
        Err(err) => EventStatus::failed(err.to_string()),
    }
}

impl<T: Scalar> DiscretePiController<T> {
    pub fn new(config: PiConfig) -> PrimitiveResult<Self> {
        config.validate()?;
        let mut base = SystemBase::of::<Self>();
        let pv = base.declare_vector_input_port("pv", 1)?;
        let sp = base.declare_vector_input_port("sp", 1)?;
        let state = base.declare_discrete_state(BasicVector::from_f64_slice(&[0.0, 0.0]));
        let ticket = base.discrete_state_ticket(state).unwrap_or(DependencyTicket::XD);
        let output = base.declare_vector_output_port(
            "u",
            1,
            [ticket],
            move |_system: &dyn System<T>, context, out: &mut BasicVector<T>| {
                let u = element(context.discrete_state_vector(state)?, OUTPUT, "controller output")?;
                out.set(0, u)?;
                Ok(())
            },
        )?;

        let sample = config.clone();
        base.declare_periodic_event(
            config.period,
            0.0,
            DiscreteUpdateEvent::<T>::new(move |context, discrete| {
                update(&sample, (pv, sp), state, sample.period, context, discrete)
            }),
        )?;
        // Prime the held output from the initial inputs without integrating.
        let prime = config.clone();
        base.declare_initialization_event(DiscreteUpdateEvent::<T>::new(move |context, discrete| {
            update(&prime, (pv, sp), state, 0.0, context, discrete)
        }));

        base.set_converter(SystemScalarConverter::non_symbolic_for_family::<PiControllerFamily>());
        Ok(Self {
            base,
            config,
            pv,
            sp,
            output,
            state,
        })
    }

    pub fn config(&self) -> &PiConfig {
        &self.config
    }

    pub fn pv(&self) -> InputPortIndex {
        self.pv
    }

    pub fn sp(&self) -> InputPortIndex {
        self.sp
    }

    pub fn output(&self) -> OutputPortIndex {
        self.output
    }

    pub fn state(&self) -> DiscreteStateIndex {
        self.state
    }
}

pub struct PiControllerFamily;

impl SystemFamily for PiControllerFamily {
    type Of<T: Scalar> = DiscretePiController<T>;

    fn convert<S: Scalar, U: Scalar>(source: &DiscretePiController<S>) -> Option<DiscretePiController<U>> {
        DiscretePiController::new(source.config.clone()).ok()
    }
}

impl<T: Scalar> System<T> for DiscretePiController<T> {
    fn base(&self) -> &SystemBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<T> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

//! Zero-order hold.
//!
//! Samples a vector input every `period` seconds into a discrete state and
//! holds it on the output between samples. The update is a difference
//! equation `x[n+1] = u[n]`.

use core::any::Any;

use ds_core::{DiscreteStateIndex, InputPortIndex, OutputPortIndex, Scalar};
use ds_framework::{
    DependencyTicket, DiscreteUpdateEvent, EventStatus, System, SystemBase, SystemFamily,
    SystemScalarConverter,
};
use ds_values::BasicVector;

use crate::error::{PrimitiveError, PrimitiveResult};

pub struct ZeroOrderHold<T: Scalar> {
    base: SystemBase<T>,
    period: f64,
    initial: Vec<f64>,
    input: InputPortIndex,
    output: OutputPortIndex,
    held: DiscreteStateIndex,
}

impl<T: Scalar> ZeroOrderHold<T> {
    /// Hold of `initial.len()` signals, starting from `initial`.
    pub fn new(period: f64, initial: &[f64]) -> PrimitiveResult<Self> {
        if !period.is_finite() || period <= 0.0 {
            return Err(PrimitiveError::InvalidArg {
                what: "sample period must be positive and finite",
            });
        }
        if initial.is_empty() {
            return Err(PrimitiveError::InvalidArg {
                what: "zero-order hold needs at least one signal",
            });
        }
        let size = initial.len();
        let mut base = SystemBase::of::<Self>();
        let input = base.declare_vector_input_port("u", size)?;
        let held = base.declare_discrete_state(BasicVector::from_f64_slice(initial));
        let ticket = base.discrete_state_ticket(held).unwrap_or(DependencyTicket::XD);
        let output = base.declare_vector_output_port(
            "y",
            size,
            [ticket],
            move |_system: &dyn System<T>, context, out: &mut BasicVector<T>| {
                out.set_from(context.discrete_state_vector(held)?)?;
                Ok(())
            },
        )?;
        base.declare_periodic_event(
            period,
            0.0,
            DiscreteUpdateEvent::<T>::new(move |context, discrete| {
                let sample = match context.vector_input(input) {
                    Ok(Some(u)) => u,
                    Ok(None) => return EventStatus::failed("input port 'u' has no value"),
                    Err(err) => return EventStatus::failed(err.to_string()),
                };
                match discrete.group_mut(held.index()).and_then(|x| x.set_from(sample)) {
                    Ok(()) => EventStatus::succeeded(),
                    Err(err) => EventStatus::failed(err.to_string()),
                }
            }),
        )?;
        base.set_converter(SystemScalarConverter::for_family::<ZeroOrderHoldFamily>());
        Ok(Self {
            base,
            period,
            initial: initial.to_vec(),
            input,
            output,
            held,
        })
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn input(&self) -> InputPortIndex {
        self.input
    }

    pub fn output(&self) -> OutputPortIndex {
        self.output
    }

    pub fn held_state(&self) -> DiscreteStateIndex {
        self.held
    }
}

pub struct ZeroOrderHoldFamily;

impl SystemFamily for ZeroOrderHoldFamily {
    type Of<T: Scalar> = ZeroOrderHold<T>;

    fn convert<S: Scalar, U: Scalar>(source: &ZeroOrderHold<S>) -> Option<ZeroOrderHold<U>> {
        ZeroOrderHold::new(source.period, &source.initial).ok()
    }
}

impl<T: Scalar> System<T> for ZeroOrderHold<T> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use ds_framework::{FrameworkError, share};

    #[test]
    fn samples_on_its_period() {
        let zoh = ZeroOrderHold::<f64>::new(0.1, &[0.0, 0.0]).unwrap();
        let (input, output) = (zoh.input(), zoh.output());
        let system = share(zoh);
        let mut context = system.create_default_context().unwrap();
        system
            .get_input_port(input)
            .unwrap()
            .fix_vector(&mut context, BasicVector::from_vec(vec![2.0, 3.0]))
            .unwrap();

        let mut events = system.allocate_composite_event_collection();
        let next = system.calc_next_update_time(&context, &mut events).unwrap();
        assert!((next - 0.1).abs() < 1e-12);
        assert!(events.has_discrete_update_events());

        context.set_time(next).unwrap();
        let status = system.handle_simultaneous_events(&mut context, &events).unwrap();
        assert!(!status.is_failure());
        assert_eq!(
            system.eval_vector_output(&context, output).unwrap().to_f64_vec(),
            Some(vec![2.0, 3.0])
        );
    }

    #[test]
    fn is_a_difference_equation_system() {
        let system = share(ZeroOrderHold::<f64>::new(0.25, &[1.0]).unwrap());
        assert_eq!(system.is_difference_equation_system(), Some(0.25));
    }

    #[test]
    fn unique_update_matches_manual_update() {
        let zoh = ZeroOrderHold::<f64>::new(0.5, &[1.0]).unwrap();
        let input = zoh.input();
        let system = share(zoh);
        let mut context = system.create_default_context().unwrap();
        system
            .get_input_port(input)
            .unwrap()
            .fix_vector(&mut context, BasicVector::from_vec(vec![7.0]))
            .unwrap();
        let updated = system.eval_unique_periodic_discrete_update(&context).unwrap();
        assert_eq!(updated.group(0).unwrap().to_f64_vec(), Some(vec![7.0]));
        // The context itself is untouched.
        assert_eq!(
            context.discrete_state_vector(DiscreteStateIndex::new(0)).unwrap().to_f64_vec(),
            Some(vec![1.0])
        );
    }

    #[test]
    fn missing_input_fails_the_unique_update() {
        let system = share(ZeroOrderHold::<f64>::new(0.5, &[1.0]).unwrap());
        let context = system.create_default_context().unwrap();
        let mut discrete = system.allocate_discrete_variables();
        let err = system
            .calc_unique_periodic_discrete_update(&context, &mut discrete)
            .unwrap_err();
        assert!(matches!(err, FrameworkError::EventHandlerFailed { .. }));
    }

    #[test]
    fn rejects_bad_period() {
        assert!(ZeroOrderHold::<f64>::new(0.0, &[1.0]).is_err());
        assert!(ZeroOrderHold::<f64>::new(f64::INFINITY, &[1.0]).is_err());
    }
}

//! Leaf systems shared by the integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ds_core::{DiscreteStateIndex, InputPortIndex, NumericParameterIndex, OutputPortIndex};
use ds_framework::{
    AnyEvent, Context, DependencyTicket, DiscreteUpdateEvent, EventStatus, FrameworkResult, PublishEvent,
    System, SystemBase, UnrestrictedUpdateEvent,
};
use ds_values::{BasicVector, ContinuousState};

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// One continuous state `x` with `dx/dt = -x`, one discrete counter, a gain
/// parameter, an input `u` and an output `y = gain * x` that counts how
/// often it is recomputed.
pub struct Decay {
    base: SystemBase<f64>,
    pub calls: Arc<AtomicUsize>,
    pub input: InputPortIndex,
    pub output: OutputPortIndex,
    pub gain: NumericParameterIndex,
    pub counter: DiscreteStateIndex,
}

impl Decay {
    pub fn new(name: &str) -> Self {
        let mut base = SystemBase::of::<Self>();
        base.set_name(name);
        base.declare_continuous_state_with(BasicVector::from_f64_slice(&[1.0]), 0, 0, 1)
            .unwrap();
        let counter = base.declare_discrete_state(BasicVector::from_f64_slice(&[0.0]));
        let gain = base.declare_numeric_parameter(BasicVector::from_f64_slice(&[2.0]));
        let gain_ticket = base.numeric_parameter_ticket(gain).unwrap();
        let input = base.declare_vector_input_port("u", 1).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let output = base
            .declare_vector_output_port(
                "y",
                1,
                [DependencyTicket::XC, gain_ticket],
                move |_system: &dyn System<f64>, context: &Context<f64>, out: &mut BasicVector<f64>| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    let x = context.continuous_state_vector().get(0).copied().unwrap_or(0.0);
                    let k = context.numeric_parameter(gain)?.get(0).copied().unwrap_or(0.0);
                    out.set(0, k * x)?;
                    Ok(())
                },
            )
            .unwrap();
        Self {
            base,
            calls,
            input,
            output,
            gain,
            counter,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Counter increments every `period` seconds.
    pub fn with_periodic_count(mut self, period: f64, offset: f64) -> Self {
        let counter = self.counter;
        self.base
            .declare_periodic_event(
                period,
                offset,
                DiscreteUpdateEvent::<f64>::new(move |_context, discrete| {
                    increment(discrete.group_mut(counter.index()).ok())
                }),
            )
            .unwrap();
        self
    }

    /// One per-step event of each kind, recording their order in `log`.
    pub fn with_logged_per_step_events(mut self, log: &EventLog) -> Self {
        let name = self.base.name().to_string();
        let (a, b, c) = (Arc::clone(log), Arc::clone(log), Arc::clone(log));
        let (na, nb, nc) = (name.clone(), name.clone(), name);
        self.base
            .declare_per_step_event(PublishEvent::<f64>::new(move |_context| {
                a.lock().unwrap().push(format!("{na}:publish"));
                EventStatus::succeeded()
            }));
        self.base
            .declare_per_step_event(DiscreteUpdateEvent::<f64>::new(move |_context, _discrete| {
                b.lock().unwrap().push(format!("{nb}:discrete"));
                EventStatus::succeeded()
            }));
        self.base.declare_per_step_event(UnrestrictedUpdateEvent::<f64>::new(
            move |_context, _state| {
                c.lock().unwrap().push(format!("{nc}:unrestricted"));
                EventStatus::succeeded()
            },
        ));
        self
    }

    pub fn with_per_step_event(mut self, event: impl Into<AnyEvent<f64>>) -> Self {
        self.base.declare_per_step_event(event);
        self
    }

    pub fn with_forced_publish(mut self, log: &EventLog) -> Self {
        let log = Arc::clone(log);
        let name = self.base.name().to_string();
        self.base
            .declare_forced_event(PublishEvent::<f64>::new(move |_context| {
                log.lock().unwrap().push(format!("{name}:forced"));
                EventStatus::succeeded()
            }));
        self
    }
}

fn increment(group: Option<&mut BasicVector<f64>>) -> EventStatus {
    let Some(group) = group else {
        return EventStatus::failed("missing counter group");
    };
    let next = group.get(0).copied().unwrap_or(0.0) + 1.0;
    match group.set(0, next) {
        Ok(()) => EventStatus::succeeded(),
        Err(err) => EventStatus::failed(err.to_string()),
    }
}

impl System<f64> for Decay {
    fn base(&self) -> &SystemBase<f64> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<f64> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn do_calc_time_derivatives(
        &self,
        context: &Context<f64>,
        derivatives: &mut ContinuousState<f64>,
    ) -> FrameworkResult<()> {
        let x = context.continuous_state_vector().get(0).copied().unwrap_or(0.0);
        derivatives.vector_mut().set(0, -x)?;
        Ok(())
    }

    fn do_calc_kinetic_energy(&self, context: &Context<f64>) -> FrameworkResult<f64> {
        let x = context.continuous_state_vector().get(0).copied().unwrap_or(0.0);
        Ok(0.5 * x * x)
    }
}

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn drain(log: &EventLog) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

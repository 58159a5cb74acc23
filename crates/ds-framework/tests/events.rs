//! Event collection, ordering and dispatch.

mod common;

use std::any::Any;

use common::{Decay, drain, init_tracing, new_log};
use ds_framework::{
    CompositeEventCollection, Context, DiagramBuilder, DiscreteUpdateEvent, EventDispatch,
    EventPhase, EventStatus, FrameworkError, FrameworkResult, PublishEvent, System, SystemBase,
    UnrestrictedUpdateEvent, share,
};
use ds_values::{BasicVector, Value};

fn per_step(system: &dyn System<f64>, context: &Context<f64>) -> CompositeEventCollection<f64> {
    let mut events = system.allocate_composite_event_collection();
    system.get_per_step_events(context, &mut events).unwrap();
    events
}

#[test]
fn leaf_applies_unrestricted_then_discrete_then_publish() {
    init_tracing();
    let log = new_log();
    let system = share(Decay::new("p").with_logged_per_step_events(&log));
    let mut context = system.create_default_context().unwrap();
    let events = per_step(system.as_ref(), &context);
    assert!(events.has_publish_events());
    assert!(events.has_discrete_update_events());
    assert!(events.has_unrestricted_update_events());

    let status = system.handle_simultaneous_events(&mut context, &events).unwrap();
    assert!(!status.is_failure());
    assert_eq!(drain(&log), ["p:unrestricted", "p:discrete", "p:publish"]);
}

#[test]
fn diagram_finishes_each_kind_across_children_before_the_next() {
    let log = new_log();
    let mut builder = DiagramBuilder::new().with_name("root");
    builder
        .add_system(share(Decay::new("a").with_logged_per_step_events(&log)))
        .unwrap();
    builder
        .add_system(share(Decay::new("b").with_logged_per_step_events(&log)))
        .unwrap();
    let diagram = builder.build().unwrap();
    let mut context = diagram.create_default_context().unwrap();
    let events = per_step(diagram.as_ref(), &context);

    diagram.handle_simultaneous_events(&mut context, &events).unwrap();
    assert_eq!(
        drain(&log),
        [
            "a:unrestricted",
            "b:unrestricted",
            "a:discrete",
            "b:discrete",
            "a:publish",
            "b:publish",
        ]
    );
}

#[test]
fn dispatch_steps_must_be_taken_in_order() {
    let log = new_log();
    let system = share(Decay::new("p").with_logged_per_step_events(&log));
    let mut context = system.create_default_context().unwrap();
    let events = per_step(system.as_ref(), &context);

    let mut dispatch = EventDispatch::new(system.as_ref());
    assert_eq!(dispatch.phase(), EventPhase::Idle);
    assert!(matches!(
        dispatch.publish(&context),
        Err(FrameworkError::EventPhase { operation: "publish", .. })
    ));

    dispatch.collect(&events).unwrap();
    assert!(matches!(
        dispatch.apply_discrete(&mut context),
        Err(FrameworkError::EventPhase { .. })
    ));
    dispatch.apply_unrestricted(&mut context).unwrap();
    assert_eq!(dispatch.phase(), EventPhase::UnrestrictedApplied);
    assert_eq!(drain(&log), ["p:unrestricted"]);

    let status = dispatch.run(&mut context).unwrap();
    assert_eq!(dispatch.phase(), EventPhase::PublishApplied);
    assert!(!status.is_failure());
    assert_eq!(drain(&log), ["p:discrete", "p:publish"]);

    assert!(dispatch.collect(&events).is_err());
}

#[test]
fn failure_skips_the_remaining_kinds() {
    let log = new_log();
    let decay = Decay::new("p")
        .with_logged_per_step_events(&log)
        .with_per_step_event(UnrestrictedUpdateEvent::<f64>::new(|_context, state| {
            let _ = state.continuous_mut().vector_mut().set(0, 42.0);
            EventStatus::failed("boom")
        }));
    let system = share(decay);
    let mut context = system.create_default_context().unwrap();
    let events = per_step(system.as_ref(), &context);

    let status = system.handle_simultaneous_events(&mut context, &events).unwrap();
    assert!(status.is_failure());
    assert_eq!(status.message(), "boom");
    assert!(status.system().unwrap().contains("::p"));
    assert_eq!(drain(&log), ["p:unrestricted"]);
    // The failed update was not committed.
    assert_eq!(context.continuous_state_vector().get(0).copied(), Some(1.0));
    assert!(status.throw_on_failure("handle_simultaneous_events").is_err());
}

#[test]
fn unrestricted_handler_may_not_resize_state() {
    let decay = Decay::new("p").with_per_step_event(UnrestrictedUpdateEvent::<f64>::new(
        |_context, state| {
            state.abstract_state_mut().push(Value::boxed(1_u8));
            EventStatus::succeeded()
        },
    ));
    let system = share(decay);
    let mut context = system.create_default_context().unwrap();
    let events = per_step(system.as_ref(), &context);
    let err = system
        .handle_simultaneous_events(&mut context, &events)
        .unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::ShapeChanged {
            operation: "calc_unrestricted_update",
            ..
        }
    ));
}

#[test]
fn discrete_handler_may_not_resize_groups() {
    let decay = Decay::new("p").with_per_step_event(DiscreteUpdateEvent::<f64>::new(
        |_context, discrete| match discrete.group_mut(0) {
            Ok(group) => {
                *group = BasicVector::zeros(3);
                EventStatus::succeeded()
            }
            Err(err) => EventStatus::failed(err.to_string()),
        },
    ));
    let system = share(decay);
    let context = system.create_default_context().unwrap();
    let events = per_step(system.as_ref(), &context);
    let mut discrete = system.allocate_discrete_variables();
    let err = system
        .calc_discrete_variable_update(&context, events.discrete_update_events(), &mut discrete)
        .unwrap_err();
    assert!(err.to_string().contains("cannot be changed"));
}

#[test]
fn next_update_time_picks_the_earliest_child() {
    let a = share(Decay::new("a").with_periodic_count(0.5, 0.0));
    let b = share(Decay::new("b").with_periodic_count(0.3, 0.0));
    let (a_counter, b_counter) = (
        a.as_any().downcast_ref::<Decay>().unwrap().counter,
        b.as_any().downcast_ref::<Decay>().unwrap().counter,
    );
    let mut builder = DiagramBuilder::new();
    builder.add_system(a.clone()).unwrap();
    builder.add_system(b.clone()).unwrap();
    let diagram = builder.build().unwrap();
    let mut context = diagram.create_default_context().unwrap();

    let mut events = diagram.allocate_composite_event_collection();
    let next = diagram.calc_next_update_time(&context, &mut events).unwrap();
    assert!((next - 0.3).abs() < 1e-12);

    context.set_time(next).unwrap();
    diagram.handle_simultaneous_events(&mut context, &events).unwrap();
    let count = |system: &dyn System<f64>, index| {
        diagram
            .get_subsystem_context(system, &context)
            .unwrap()
            .discrete_state_vector(index)
            .unwrap()
            .get(0)
            .copied()
            .unwrap()
    };
    assert_eq!(count(a.as_ref(), a_counter), 0.0);
    assert_eq!(count(b.as_ref(), b_counter), 1.0);
}

#[test]
fn no_periodic_events_means_never() {
    let system = share(Decay::new("p"));
    let context = system.create_default_context().unwrap();
    let mut events = system.allocate_composite_event_collection();
    let next = system.calc_next_update_time(&context, &mut events).unwrap();
    assert_eq!(next, f64::INFINITY);
    assert!(!events.has_events());
}

#[test]
fn events_from_another_system_are_rejected() {
    let a = share(Decay::new("a"));
    let b = share(Decay::new("b"));
    let context = a.create_default_context().unwrap();
    let mut foreign = b.allocate_composite_event_collection();
    assert!(matches!(
        a.calc_next_update_time(&context, &mut foreign),
        Err(FrameworkError::ContextMismatch { .. })
    ));
}

/// Schedules a publish event at the current time.
struct Immediate {
    base: SystemBase<f64>,
}

impl System<f64> for Immediate {
    fn base(&self) -> &SystemBase<f64> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<f64> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn do_calc_next_update_time(
        &self,
        context: &Context<f64>,
        events: &mut CompositeEventCollection<f64>,
    ) -> FrameworkResult<f64> {
        events.add_event(PublishEvent::<f64>::new(|_| EventStatus::succeeded()).into());
        Ok(*context.time())
    }
}

#[test]
fn update_at_the_current_time_reports_the_true_time() {
    let system = share(Immediate {
        base: SystemBase::of::<Immediate>(),
    });
    let mut context = system.create_default_context().unwrap();
    context.set_time(1.0).unwrap();
    let mut events = system.allocate_composite_event_collection();
    assert_eq!(system.calc_next_update_time(&context, &mut events).unwrap(), 1.0);

    context.set_true_time(Some(1.0 - 1e-12));
    assert_eq!(
        system.calc_next_update_time(&context, &mut events).unwrap(),
        1.0 - 1e-12
    );
}

#[test]
fn unique_periodic_update_requires_one_timing() {
    let none = share(Decay::new("none"));
    let context = none.create_default_context().unwrap();
    let mut discrete = none.allocate_discrete_variables();
    assert!(none.get_unique_periodic_discrete_update_attribute().is_none());
    assert!(matches!(
        none.calc_unique_periodic_discrete_update(&context, &mut discrete),
        Err(FrameworkError::NoUniquePeriodicUpdate { .. })
    ));

    let two = share(
        Decay::new("two")
            .with_periodic_count(0.5, 0.0)
            .with_periodic_count(0.25, 0.0),
    );
    let context = two.create_default_context().unwrap();
    let mut discrete = two.allocate_discrete_variables();
    assert!(two.get_unique_periodic_discrete_update_attribute().is_none());
    assert!(two.is_difference_equation_system().is_none());
    assert!(matches!(
        two.calc_unique_periodic_discrete_update(&context, &mut discrete),
        Err(FrameworkError::NoUniquePeriodicUpdate { .. })
    ));
}

#[test]
fn unique_periodic_update_across_a_diagram() {
    let mut builder = DiagramBuilder::new();
    builder
        .add_system(share(Decay::new("a").with_periodic_count(0.5, 0.0)))
        .unwrap();
    builder
        .add_system(share(Decay::new("b").with_periodic_count(0.5, 0.0)))
        .unwrap();
    let diagram = builder.build().unwrap();
    let context = diagram.create_default_context().unwrap();

    let timing = diagram.get_unique_periodic_discrete_update_attribute().unwrap();
    assert_eq!(timing.period(), 0.5);
    let updated = diagram.eval_unique_periodic_discrete_update(&context).unwrap();
    for child in 0..2 {
        let group = updated.subsystem(child).unwrap().group(0).unwrap();
        assert_eq!(group.get(0).copied(), Some(1.0));
    }
}

#[test]
fn mixed_timings_in_a_diagram_are_ambiguous() {
    let mut builder = DiagramBuilder::new();
    builder
        .add_system(share(Decay::new("a").with_periodic_count(0.5, 0.0)))
        .unwrap();
    builder
        .add_system(share(Decay::new("b").with_periodic_count(0.5, 0.1)))
        .unwrap();
    let diagram = builder.build().unwrap();
    let context = diagram.create_default_context().unwrap();
    assert!(diagram.get_unique_periodic_discrete_update_attribute().is_none());
    let mut discrete = diagram.allocate_discrete_variables();
    assert!(matches!(
        diagram.calc_unique_periodic_discrete_update(&context, &mut discrete),
        Err(FrameworkError::NoUniquePeriodicUpdate { .. })
    ));
}

#[test]
fn forced_publish_reaches_every_child() {
    let log = new_log();
    let mut builder = DiagramBuilder::new();
    builder
        .add_system(share(Decay::new("a").with_forced_publish(&log)))
        .unwrap();
    builder
        .add_system(share(Decay::new("b").with_forced_publish(&log)))
        .unwrap();
    let diagram = builder.build().unwrap();
    let context = diagram.create_default_context().unwrap();
    diagram.forced_publish(&context).unwrap();
    assert_eq!(drain(&log), ["a:forced", "b:forced"]);
}

//! Event collection and dispatch.
//!
//! Provides:
//! - collection queries (`calc_next_update_time`, periodic, per-step,
//!   initialization and forced events)
//! - calc/apply pairs for unrestricted and discrete updates, plus publish
//! - the unique periodic discrete update and difference-equation detection
//! - `EventDispatch`, which applies one set of simultaneous events in the
//!   fixed order unrestricted, discrete, publish

use std::collections::BTreeMap;
use std::sync::Arc;

use ds_core::{Scalar, extract_f64};
use ds_values::{DiscreteValues, State};
use tracing::debug;

use crate::collection::{CompositeEventCollection, EventCollection};
use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::event::{
    AnyEvent, DiscreteUpdateEvent, PeriodicEventData, PublishEvent, UnrestrictedUpdateEvent,
};
use crate::status::EventStatus;
use crate::system::System;
use crate::ticket::DependencyTicket as D;

impl<T: Scalar> dyn System<T> {
    /// Empty collection shaped like this system's context tree.
    pub fn allocate_composite_event_collection(&self) -> CompositeEventCollection<T> {
        let mut events = CompositeEventCollection::new(self.base().id());
        for child in self.subsystems() {
            events.push_child(child.allocate_composite_event_collection());
        }
        events
    }

    /// Every forced event declared in the tree.
    pub fn allocate_forced_event_collection(&self) -> CompositeEventCollection<T> {
        let mut events = CompositeEventCollection::new(self.base().id());
        for event in self.base().forced_events() {
            events.add_event(event.clone());
        }
        for child in self.subsystems() {
            events.push_child(child.allocate_forced_event_collection());
        }
        events
    }

    fn validate_query(
        &self,
        context: &Context<T>,
        events: &CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(events, "CompositeEventCollection")
    }

    // ---- collection ----

    /// Time of the next scheduled update; `events` is cleared and filled
    /// with the events due then.
    pub fn calc_next_update_time(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<T> {
        self.validate_query(context, events)?;
        events.clear();
        let time = self.do_calc_next_update_time(context, events)?;
        let next = extract_f64(&time, "next update time")?;
        if next.is_nan() {
            return Err(FrameworkError::NanNextUpdateTime {
                system: self.base().label(),
            });
        }
        if next.is_finite() && !events.has_events() {
            return Err(FrameworkError::UnscheduledNextUpdate {
                system: self.base().label(),
                time: next,
            });
        }
        if let Some(true_time) = context.true_time() {
            if context.time().to_f64() == Some(next) {
                debug!(system = %self.base().pathname(), next, "next update at current time; using true time");
                return Ok(true_time.clone());
            }
        }
        debug!(system = %self.base().pathname(), next, "next update time");
        Ok(time)
    }

    pub fn get_periodic_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        self.validate_query(context, events)?;
        events.clear();
        self.do_get_periodic_events(context, events)
    }

    pub fn get_per_step_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        self.validate_query(context, events)?;
        events.clear();
        self.do_get_per_step_events(context, events)
    }

    pub fn get_initialization_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        self.validate_query(context, events)?;
        events.clear();
        self.do_get_initialization_events(context, events)
    }

    pub fn map_periodic_events_by_timing(&self) -> BTreeMap<PeriodicEventData, Vec<AnyEvent<T>>> {
        self.do_map_periodic_events_by_timing()
    }

    // ---- dispatch ----

    /// Notification only; nothing in the context changes.
    pub fn publish(
        &self,
        context: &Context<T>,
        events: &EventCollection<PublishEvent<T>>,
    ) -> FrameworkResult<EventStatus> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(events, "EventCollection")?;
        let mut status = self.dispatch_publish_handler(context, events)?;
        status.attribute_to(|| base.label());
        debug!(system = %base.pathname(), severity = %status.severity(), "publish");
        Ok(status)
    }

    /// Compute new discrete values into `discrete` without touching the
    /// context. The group count and sizes must come out unchanged.
    pub fn calc_discrete_variable_update(
        &self,
        context: &Context<T>,
        events: &EventCollection<DiscreteUpdateEvent<T>>,
        discrete: &mut DiscreteValues<T>,
    ) -> FrameworkResult<EventStatus> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(events, "EventCollection")?;
        base.validate_created_for(discrete, "DiscreteValues")?;
        discrete.set_from(&context.clone_discrete_state())?;
        let before = discrete.group_sizes();
        let mut status = self.dispatch_discrete_variable_update_handler(context, events, discrete)?;
        let after = discrete.group_sizes();
        if before != after {
            return Err(FrameworkError::ShapeChanged {
                system: base.label(),
                operation: "calc_discrete_variable_update",
                before: format!("discrete={before:?}"),
                after: format!("discrete={after:?}"),
            });
        }
        status.attribute_to(|| base.label());
        debug!(system = %base.pathname(), severity = %status.severity(), "discrete update");
        Ok(status)
    }

    /// Commit values produced by [`calc_discrete_variable_update`].
    ///
    /// [`calc_discrete_variable_update`]: #method.calc_discrete_variable_update
    pub fn apply_discrete_variable_update(
        &self,
        events: &EventCollection<DiscreteUpdateEvent<T>>,
        discrete: &mut DiscreteValues<T>,
        context: &mut Context<T>,
    ) -> FrameworkResult<()> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(discrete, "DiscreteValues")?;
        self.do_apply_discrete_variable_update(events, discrete, context)
    }

    /// Compute a complete new state into `state` without touching the
    /// context. Every state dimension must come out unchanged.
    pub fn calc_unrestricted_update(
        &self,
        context: &Context<T>,
        events: &EventCollection<UnrestrictedUpdateEvent<T>>,
        state: &mut State<T>,
    ) -> FrameworkResult<EventStatus> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(events, "EventCollection")?;
        base.validate_created_for(state, "State")?;
        state.set_from(&context.clone_state())?;
        let before = state.shape();
        let mut status = self.dispatch_unrestricted_update_handler(context, events, state)?;
        let after = state.shape();
        if before != after {
            return Err(FrameworkError::ShapeChanged {
                system: base.label(),
                operation: "calc_unrestricted_update",
                before: before.to_string(),
                after: after.to_string(),
            });
        }
        status.attribute_to(|| base.label());
        debug!(system = %base.pathname(), severity = %status.severity(), "unrestricted update");
        Ok(status)
    }

    pub fn apply_unrestricted_update(
        &self,
        events: &EventCollection<UnrestrictedUpdateEvent<T>>,
        state: &mut State<T>,
        context: &mut Context<T>,
    ) -> FrameworkResult<()> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(state, "State")?;
        self.do_apply_unrestricted_update(events, state, context)
    }

    // ---- forced events ----

    pub fn forced_publish(&self, context: &Context<T>) -> FrameworkResult<()> {
        let events = self.allocate_forced_event_collection();
        self.publish(context, events.publish_events())?
            .throw_on_failure("forced_publish")
    }

    pub fn calc_forced_discrete_variable_update(
        &self,
        context: &Context<T>,
        discrete: &mut DiscreteValues<T>,
    ) -> FrameworkResult<()> {
        let events = self.allocate_forced_event_collection();
        self.calc_discrete_variable_update(context, events.discrete_update_events(), discrete)?
            .throw_on_failure("calc_forced_discrete_variable_update")
    }

    pub fn calc_forced_unrestricted_update(
        &self,
        context: &Context<T>,
        state: &mut State<T>,
    ) -> FrameworkResult<()> {
        let events = self.allocate_forced_event_collection();
        self.calc_unrestricted_update(context, events.unrestricted_update_events(), state)?
            .throw_on_failure("calc_forced_unrestricted_update")
    }

    // ---- unique periodic discrete update ----

    /// The one timing shared by every periodic discrete update in the tree;
    /// `None` if there are none or they use more than one timing.
    pub fn get_unique_periodic_discrete_update_attribute(&self) -> Option<PeriodicEventData> {
        let mut unique = None;
        for (timing, events) in self.map_periodic_events_by_timing() {
            if events.iter().any(AnyEvent::is_discrete_update) {
                if unique.is_some() {
                    return None;
                }
                unique = Some(timing);
            }
        }
        unique
    }

    /// Apply exactly the periodic discrete updates to scratch values seeded
    /// from the context.
    pub fn calc_unique_periodic_discrete_update(
        &self,
        context: &Context<T>,
        discrete: &mut DiscreteValues<T>,
    ) -> FrameworkResult<()> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(discrete, "DiscreteValues")?;
        let mut collection = self.allocate_composite_event_collection();
        let mut timing = None;
        self.do_find_unique_periodic_discrete_updates(
            context,
            &mut timing,
            collection.discrete_update_events_mut(),
        )?;
        if timing.is_none() {
            return Err(FrameworkError::NoUniquePeriodicUpdate {
                system: base.label(),
                detail: "there are no periodic discrete update events",
            });
        }
        self.calc_discrete_variable_update(context, collection.discrete_update_events(), discrete)?
            .throw_on_failure("calc_unique_periodic_discrete_update")
    }

    pub fn eval_unique_periodic_discrete_update(
        &self,
        context: &Context<T>,
    ) -> FrameworkResult<Arc<DiscreteValues<T>>> {
        self.base()
            .standard_entry(D::UNIQUE_PERIODIC_DISCRETE_UPDATE)?
            .eval(self, context)
    }

    /// Period of `x[n+1] = f(n, x[n], u[n])`: no continuous or abstract
    /// state, one discrete group, a unique periodic discrete timing with
    /// zero offset.
    pub fn is_difference_equation_system(&self) -> Option<f64> {
        if self.num_continuous_states() != 0
            || self.num_abstract_states() != 0
            || self.num_discrete_state_groups() != 1
        {
            return None;
        }
        let timing = self.get_unique_periodic_discrete_update_attribute()?;
        (timing.offset() == 0.0).then_some(timing.period())
    }

    // ---- simultaneous events ----

    /// Collect the initialization events and apply them in order, turning
    /// a handler failure into an error.
    pub fn execute_initialization_events(&self, context: &mut Context<T>) -> FrameworkResult<()> {
        let mut events = self.allocate_composite_event_collection();
        self.get_initialization_events(context, &mut events)?;
        let mut dispatch = EventDispatch::new(self);
        dispatch.collect(&events)?;
        dispatch
            .run(context)?
            .throw_on_failure("execute_initialization_events")
    }

    /// Apply `events` in the order unrestricted, discrete, publish, stopping
    /// at the first failure.
    pub fn handle_simultaneous_events(
        &self,
        context: &mut Context<T>,
        events: &CompositeEventCollection<T>,
    ) -> FrameworkResult<EventStatus> {
        let mut dispatch = EventDispatch::new(self);
        dispatch.collect(events)?;
        dispatch.run(context)
    }
}

/// Progress through one round of simultaneous events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPhase {
    Idle,
    EventsCollected,
    UnrestrictedApplied,
    DiscreteApplied,
    PublishApplied,
}

impl EventPhase {
    fn name(self) -> &'static str {
        match self {
            EventPhase::Idle => "Idle",
            EventPhase::EventsCollected => "EventsCollected",
            EventPhase::UnrestrictedApplied => "UnrestrictedApplied",
            EventPhase::DiscreteApplied => "DiscreteApplied",
            EventPhase::PublishApplied => "PublishApplied",
        }
    }
}

/// Applies a set of simultaneous events in the fixed order unrestricted,
/// discrete, publish. Each step must be taken in turn; once a handler fails
/// the remaining steps only advance the phase.
pub struct EventDispatch<'s, T: Scalar> {
    system: &'s dyn System<T>,
    events: CompositeEventCollection<T>,
    phase: EventPhase,
    status: EventStatus,
}

impl<'s, T: Scalar> EventDispatch<'s, T> {
    pub fn new(system: &'s dyn System<T>) -> Self {
        Self {
            system,
            events: system.allocate_composite_event_collection(),
            phase: EventPhase::Idle,
            status: EventStatus::did_nothing(),
        }
    }

    pub fn phase(&self) -> EventPhase {
        self.phase
    }

    /// Most severe status seen so far.
    pub fn status(&self) -> &EventStatus {
        &self.status
    }

    fn advance(
        &mut self,
        operation: &'static str,
        expected: EventPhase,
        next: EventPhase,
    ) -> FrameworkResult<()> {
        if self.phase != expected {
            return Err(FrameworkError::EventPhase {
                operation,
                expected: expected.name(),
                actual: self.phase.name(),
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn collect(&mut self, events: &CompositeEventCollection<T>) -> FrameworkResult<()> {
        self.system
            .base()
            .validate_created_for(events, "CompositeEventCollection")?;
        self.advance("collect", EventPhase::Idle, EventPhase::EventsCollected)?;
        self.events.set_from(events);
        Ok(())
    }

    pub fn apply_unrestricted(&mut self, context: &mut Context<T>) -> FrameworkResult<()> {
        self.advance(
            "apply_unrestricted",
            EventPhase::EventsCollected,
            EventPhase::UnrestrictedApplied,
        )?;
        let events = self.events.unrestricted_update_events();
        if self.status.is_failure() || !events.has_events() {
            return Ok(());
        }
        let mut state = context.clone_state();
        let status = self.system.calc_unrestricted_update(context, events, &mut state)?;
        if !status.is_failure() {
            self.system.apply_unrestricted_update(events, &mut state, context)?;
        }
        self.status.keep_more_severe(status);
        Ok(())
    }

    pub fn apply_discrete(&mut self, context: &mut Context<T>) -> FrameworkResult<()> {
        self.advance(
            "apply_discrete",
            EventPhase::UnrestrictedApplied,
            EventPhase::DiscreteApplied,
        )?;
        let events = self.events.discrete_update_events();
        if self.status.is_failure() || !events.has_events() {
            return Ok(());
        }
        let mut discrete = context.clone_discrete_state();
        let status = self
            .system
            .calc_discrete_variable_update(context, events, &mut discrete)?;
        if !status.is_failure() {
            self.system
                .apply_discrete_variable_update(events, &mut discrete, context)?;
        }
        self.status.keep_more_severe(status);
        Ok(())
    }

    pub fn publish(&mut self, context: &Context<T>) -> FrameworkResult<()> {
        self.advance("publish", EventPhase::DiscreteApplied, EventPhase::PublishApplied)?;
        let events = self.events.publish_events();
        if self.status.is_failure() || !events.has_events() {
            return Ok(());
        }
        let status = self.system.publish(context, events)?;
        self.status.keep_more_severe(status);
        Ok(())
    }

    /// Take every remaining step and return the most severe status.
    pub fn run(&mut self, context: &mut Context<T>) -> FrameworkResult<EventStatus> {
        if self.phase == EventPhase::EventsCollected {
            self.apply_unrestricted(context)?;
        }
        if self.phase == EventPhase::UnrestrictedApplied {
            self.apply_discrete(context)?;
        }
        if self.phase == EventPhase::DiscreteApplied {
            self.publish(context)?;
        }
        if self.phase != EventPhase::PublishApplied {
            return Err(FrameworkError::EventPhase {
                operation: "run",
                expected: EventPhase::EventsCollected.name(),
                actual: self.phase.name(),
            });
        }
        Ok(self.status.clone())
    }
}

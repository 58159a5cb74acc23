//! The `System` trait: per-node hooks the kernel calls.
//!
//! Every hook has a leaf default driven by what was declared on the node's
//! [`SystemBase`]. Composite systems override the recursive ones. Callers
//! never invoke hooks directly; they go through the validated methods on
//! `dyn System<T>` (see `evaluation`, `scheduler`, `conversion`).

use core::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use ds_core::{InputPortIndex, OutputPortIndex, Scalar, extract_f64};
use ds_values::{BasicVector, ContinuousState, DiscreteValues, Parameters, State};
use rand::RngCore;

use crate::base::SystemBase;
use crate::collection::{CompositeEventCollection, EventCollection};
use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::event::{
    AnyEvent, DiscreteUpdateEvent, PeriodicEventData, PublishEvent, UnrestrictedUpdateEvent,
};
use crate::status::EventStatus;
use crate::witness::WitnessFunction;

pub trait System<T: Scalar>: Any + Send + Sync {
    fn base(&self) -> &SystemBase<T>;

    fn base_mut(&mut self) -> &mut SystemBase<T>;

    fn as_any(&self) -> &dyn Any;

    /// Children of a composite system, in context order.
    fn subsystems(&self) -> &[Arc<dyn System<T>>] {
        &[]
    }

    /// Called once when this system is shared; composites hand `me` to
    /// their children as the parent registration.
    fn register_subsystems(&self, me: &Weak<dyn System<T>>) {
        let _ = me;
    }

    // ---- defaults ----

    fn set_default_state(&self, context: &Context<T>, state: &mut State<T>) -> FrameworkResult<()> {
        let _ = context;
        self.base().set_default_state(state)
    }

    fn set_default_parameters(
        &self,
        context: &Context<T>,
        parameters: &mut Parameters<T>,
    ) -> FrameworkResult<()> {
        let _ = context;
        self.base().set_default_parameters(parameters)
    }

    /// Draw a state from `rng`. Systems without a distribution keep their
    /// defaults.
    fn set_random_state(
        &self,
        context: &Context<T>,
        state: &mut State<T>,
        rng: &mut dyn RngCore,
    ) -> FrameworkResult<()> {
        let _ = rng;
        self.set_default_state(context, state)
    }

    fn set_random_parameters(
        &self,
        context: &Context<T>,
        parameters: &mut Parameters<T>,
        rng: &mut dyn RngCore,
    ) -> FrameworkResult<()> {
        let _ = rng;
        self.set_default_parameters(context, parameters)
    }

    // ---- continuous dynamics and energy ----

    fn do_calc_time_derivatives(
        &self,
        context: &Context<T>,
        derivatives: &mut ContinuousState<T>,
    ) -> FrameworkResult<()> {
        let _ = context;
        if derivatives.size() == 0 {
            return Ok(());
        }
        Err(FrameworkError::MissingOverride {
            system: self.base().label(),
            hook: "do_calc_time_derivatives",
        })
    }

    fn do_calc_potential_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        let _ = context;
        Ok(T::zero())
    }

    fn do_calc_kinetic_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        let _ = context;
        Ok(T::zero())
    }

    fn do_calc_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        let _ = context;
        Ok(T::zero())
    }

    fn do_calc_non_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        let _ = context;
        Ok(T::zero())
    }

    /// `proposed - f(x)` for the explicit dynamics `f`. Systems with an
    /// implicit formulation override this.
    fn do_calc_implicit_time_derivatives_residual(
        &self,
        context: &Context<T>,
        proposed_derivatives: &ContinuousState<T>,
        residual: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        let mut xcdot = proposed_derivatives.clone();
        self.do_calc_time_derivatives(context, &mut xcdot)?;
        let proposed = proposed_derivatives.to_vec();
        for (i, (p, f)) in proposed.into_iter().zip(xcdot.to_vec()).enumerate() {
            residual.set(i, p - f)?;
        }
        Ok(())
    }

    // ---- generalized coordinates ----

    /// `qdot = N(q) v`. The identity unless `q` and `v` differ in size, in
    /// which case the system must provide its own mapping.
    fn do_map_velocity_to_qdot(
        &self,
        context: &Context<T>,
        generalized_velocity: &BasicVector<T>,
        qdot: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        if context.num_generalized_positions() != context.num_generalized_velocities() {
            return Err(FrameworkError::MissingOverride {
                system: self.base().label(),
                hook: "do_map_velocity_to_qdot",
            });
        }
        qdot.set_from(generalized_velocity)?;
        Ok(())
    }

    /// Inverse of [`System::do_map_velocity_to_qdot`].
    fn do_map_qdot_to_velocity(
        &self,
        context: &Context<T>,
        qdot: &BasicVector<T>,
        generalized_velocity: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        if context.num_generalized_positions() != context.num_generalized_velocities() {
            return Err(FrameworkError::MissingOverride {
                system: self.base().label(),
                hook: "do_map_qdot_to_velocity",
            });
        }
        generalized_velocity.set_from(qdot)?;
        Ok(())
    }

    // ---- event collection ----

    /// Earliest upcoming periodic sample and the events due at it.
    fn do_calc_next_update_time(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<T> {
        let now = extract_f64(context.time(), "context time")?;
        let base = self.base();
        let mut next = f64::INFINITY;
        let mut due: Vec<&AnyEvent<T>> = Vec::new();
        for (timing, event) in base.periodic_events() {
            let t = timing.next_sample_time(now);
            if t < next {
                next = t;
                due.clear();
                due.push(event);
            } else if t == next {
                due.push(event);
            }
        }
        for event in due {
            events.add_event(event.clone());
        }
        Ok(T::from_f64(next))
    }

    fn do_get_periodic_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        let _ = context;
        for (_, event) in self.base().periodic_events() {
            events.add_event(event.clone());
        }
        Ok(())
    }

    fn do_get_per_step_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        let _ = context;
        for event in self.base().per_step_events() {
            events.add_event(event.clone());
        }
        Ok(())
    }

    fn do_get_initialization_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        let _ = context;
        for event in self.base().initialization_events() {
            events.add_event(event.clone());
        }
        Ok(())
    }

    /// Periodic events of this system and its descendants grouped by timing.
    fn do_map_periodic_events_by_timing(&self) -> BTreeMap<PeriodicEventData, Vec<AnyEvent<T>>> {
        let mut map: BTreeMap<PeriodicEventData, Vec<AnyEvent<T>>> = BTreeMap::new();
        for (timing, event) in self.base().periodic_events() {
            map.entry(*timing).or_default().push(event.clone());
        }
        map
    }

    /// Collect the periodic discrete updates, requiring they all share one
    /// timing. `timing` carries the timing seen so far across the tree.
    fn do_find_unique_periodic_discrete_updates(
        &self,
        context: &Context<T>,
        timing: &mut Option<PeriodicEventData>,
        events: &mut EventCollection<DiscreteUpdateEvent<T>>,
    ) -> FrameworkResult<()> {
        let _ = context;
        for (event_timing, event) in self.base().periodic_events() {
            let AnyEvent::DiscreteUpdate(update) = event else {
                continue;
            };
            match *timing {
                None => *timing = Some(*event_timing),
                Some(seen) if seen != *event_timing => {
                    return Err(FrameworkError::NoUniquePeriodicUpdate {
                        system: self.base().label(),
                        detail: "periodic discrete update events have more than one timing",
                    });
                }
                Some(_) => {}
            }
            events.add_event(update.clone());
        }
        Ok(())
    }

    // ---- dispatch ----

    fn dispatch_publish_handler(
        &self,
        context: &Context<T>,
        events: &EventCollection<PublishEvent<T>>,
    ) -> FrameworkResult<EventStatus> {
        let mut status = EventStatus::did_nothing();
        for event in events.events() {
            status.keep_more_severe(event.handle(context));
            if status.is_failure() {
                break;
            }
        }
        Ok(status)
    }

    /// Run discrete handlers against `discrete`, which the caller has
    /// already seeded from the context.
    fn dispatch_discrete_variable_update_handler(
        &self,
        context: &Context<T>,
        events: &EventCollection<DiscreteUpdateEvent<T>>,
        discrete: &mut DiscreteValues<T>,
    ) -> FrameworkResult<EventStatus> {
        let mut status = EventStatus::did_nothing();
        for event in events.events() {
            status.keep_more_severe(event.handle(context, discrete));
            if status.is_failure() {
                break;
            }
        }
        Ok(status)
    }

    fn dispatch_unrestricted_update_handler(
        &self,
        context: &Context<T>,
        events: &EventCollection<UnrestrictedUpdateEvent<T>>,
        state: &mut State<T>,
    ) -> FrameworkResult<EventStatus> {
        let mut status = EventStatus::did_nothing();
        for event in events.events() {
            status.keep_more_severe(event.handle(context, state));
            if status.is_failure() {
                break;
            }
        }
        Ok(status)
    }

    fn do_apply_discrete_variable_update(
        &self,
        events: &EventCollection<DiscreteUpdateEvent<T>>,
        discrete: &mut DiscreteValues<T>,
        context: &mut Context<T>,
    ) -> FrameworkResult<()> {
        let _ = events;
        context.set_discrete_state_from(discrete)
    }

    fn do_apply_unrestricted_update(
        &self,
        events: &EventCollection<UnrestrictedUpdateEvent<T>>,
        state: &mut State<T>,
        context: &mut Context<T>,
    ) -> FrameworkResult<()> {
        let _ = events;
        context.set_state_from(state)
    }

    // ---- witness functions and feedthrough ----

    fn do_get_witness_functions<'a>(
        &'a self,
        context: &Context<T>,
        witnesses: &mut Vec<&'a WitnessFunction<T>>,
    ) -> FrameworkResult<()> {
        let _ = context;
        witnesses.extend(self.base().witness_functions());
        Ok(())
    }

    /// (input, output) pairs that may feed through. Leaves derive this from
    /// the ticket graph, so a pair is reported unless no path exists.
    fn get_direct_feedthroughs(&self) -> Vec<(InputPortIndex, OutputPortIndex)> {
        self.base().ticket_feedthroughs()
    }
}

/// Weak handle from a child to the composite that owns it.
#[derive(Clone)]
pub struct ParentService<T: Scalar> {
    parent: Weak<dyn System<T>>,
}

impl<T: Scalar> ParentService<T> {
    pub fn new(parent: Weak<dyn System<T>>) -> Self {
        Self { parent }
    }

    pub fn parent(&self) -> Option<Arc<dyn System<T>>> {
        self.parent.upgrade()
    }

    /// Outermost ancestor.
    pub fn root(&self) -> Option<Arc<dyn System<T>>> {
        let mut current = self.parent()?;
        while let Some(next) = current.base().parent_system() {
            current = next;
        }
        Some(current)
    }
}

impl<T: Scalar> core::fmt::Debug for ParentService<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let id = self.parent().map(|p| p.base().id());
        f.debug_struct("ParentService").field("parent", &id).finish()
    }
}

/// Freeze a constructed system and register it as parent of its children.
pub fn share<T: Scalar, S: System<T>>(system: S) -> Arc<dyn System<T>> {
    share_boxed(Box::new(system))
}

pub fn share_boxed<T: Scalar>(system: Box<dyn System<T>>) -> Arc<dyn System<T>> {
    let shared: Arc<dyn System<T>> = Arc::from(system);
    let me = Arc::downgrade(&shared);
    shared.register_subsystems(&me);
    shared
}

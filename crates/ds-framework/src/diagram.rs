//! Composite systems.
//!
//! A `Diagram` owns an ordered list of child systems and no state of its
//! own. Its context has one subcontext per child, in the same order, and
//! every recursive hook fans out to the children through their validated
//! entry points. Port wiring between children is out of scope here;
//! children read whatever is fixed on their own input ports.

use core::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use ds_core::{Scalar, SystemId, extract_f64};
use ds_values::{BasicVector, ContinuousState, DiscreteValues, State};
use tracing::{debug, warn};

use crate::base::SystemBase;
use crate::collection::{CompositeEventCollection, EventCollection};
use crate::context::Context;
use crate::converter::{SystemFamily, SystemScalarConverter};
use crate::error::{FrameworkError, FrameworkResult};
use crate::event::{
    AnyEvent, DiscreteUpdateEvent, PeriodicEventData, PublishEvent, UnrestrictedUpdateEvent,
};
use crate::status::EventStatus;
use crate::system::{ParentService, System, share};
use crate::witness::WitnessFunction;

pub struct Diagram<T: Scalar> {
    base: SystemBase<T>,
    subsystems: Vec<Arc<dyn System<T>>>,
}

impl<T: Scalar> Diagram<T> {
    fn from_subsystems(name: Option<String>, subsystems: Vec<Arc<dyn System<T>>>) -> Self {
        let mut base = SystemBase::of::<Diagram<T>>();
        if let Some(name) = name {
            base.set_name(name);
        }
        base.set_converter(SystemScalarConverter::for_family::<DiagramFamily>());
        Self { base, subsystems }
    }

    pub fn num_subsystems(&self) -> usize {
        self.subsystems.len()
    }

    pub fn subsystem_by_name(&self, name: &str) -> Option<&Arc<dyn System<T>>> {
        self.subsystems.iter().find(|s| s.base().name() == name)
    }

    fn child_context<'a>(&self, context: &'a Context<T>, index: usize) -> FrameworkResult<&'a Context<T>> {
        context.subcontext(index).ok_or_else(|| self.tree_mismatch("context", index))
    }

    fn tree_mismatch(&self, what: &'static str, index: usize) -> FrameworkError {
        FrameworkError::TreeMismatch {
            system: self.base.label(),
            what,
            index,
        }
    }

    /// Run `f` on each child's slice of `events`, putting it back afterwards
    /// even when `f` fails.
    fn for_each_child_events<F>(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
        mut f: F,
    ) -> FrameworkResult<()>
    where
        F: FnMut(&dyn System<T>, &Context<T>, &mut CompositeEventCollection<T>) -> FrameworkResult<()>,
    {
        for (i, child) in self.subsystems.iter().enumerate() {
            let sub_context = self.child_context(context, i)?;
            let mut sub_events = events
                .take_child(i)
                .ok_or_else(|| self.tree_mismatch("event collection", i))?;
            let result = f(child.as_ref(), sub_context, &mut sub_events);
            events.restore_child(i, sub_events);
            result?;
        }
        Ok(())
    }
}

/// `len` entries of `v` starting at `start`; short when `v` is.
fn segment<T: Scalar>(v: &BasicVector<T>, start: usize, len: usize) -> BasicVector<T> {
    BasicVector::from_vec(v.iter().skip(start).take(len).cloned().collect())
}

fn write_segment<T: Scalar>(dst: &mut BasicVector<T>, start: usize, src: &BasicVector<T>) -> FrameworkResult<()> {
    for (k, value) in src.iter().enumerate() {
        dst.set(start + k, value.clone())?;
    }
    Ok(())
}

/// Scalar family of [`Diagram`]; a diagram converts when every child does.
pub struct DiagramFamily;

impl SystemFamily for DiagramFamily {
    type Of<S: Scalar> = Diagram<S>;

    fn convert<S: Scalar, U: Scalar>(source: &Diagram<S>) -> Option<Diagram<U>> {
        let children = source
            .subsystems
            .iter()
            .map(|child| child.to_scalar_type_maybe::<U>())
            .collect::<Option<Vec<_>>>()?;
        Some(Diagram::from_subsystems(
            Some(source.base.name().to_string()),
            children,
        ))
    }
}

impl<T: Scalar> System<T> for Diagram<T> {
    fn base(&self) -> &SystemBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<T> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subsystems(&self) -> &[Arc<dyn System<T>>] {
        &self.subsystems
    }

    fn register_subsystems(&self, me: &Weak<dyn System<T>>) {
        for child in &self.subsystems {
            if !child.base().set_parent(ParentService::new(me.clone())) {
                warn!(child = %child.base().label(), "subsystem already had a parent");
            }
        }
    }

    fn do_calc_time_derivatives(
        &self,
        context: &Context<T>,
        derivatives: &mut ContinuousState<T>,
    ) -> FrameworkResult<()> {
        for (i, child) in self.subsystems.iter().enumerate() {
            let sub_context = self.child_context(context, i)?;
            let mut sub = derivatives.take_subsystem(i)?;
            let result = child.calc_time_derivatives(sub_context, &mut sub);
            derivatives.restore_subsystem(i, sub)?;
            result?;
        }
        Ok(())
    }

    fn do_calc_potential_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        let mut total = T::zero();
        for (i, child) in self.subsystems.iter().enumerate() {
            total = total + child.calc_potential_energy(self.child_context(context, i)?)?;
        }
        Ok(total)
    }

    fn do_calc_kinetic_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        let mut total = T::zero();
        for (i, child) in self.subsystems.iter().enumerate() {
            total = total + child.calc_kinetic_energy(self.child_context(context, i)?)?;
        }
        Ok(total)
    }

    fn do_calc_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        let mut total = T::zero();
        for (i, child) in self.subsystems.iter().enumerate() {
            total = total + child.calc_conservative_power(self.child_context(context, i)?)?;
        }
        Ok(total)
    }

    fn do_calc_non_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        let mut total = T::zero();
        for (i, child) in self.subsystems.iter().enumerate() {
            total = total + child.calc_non_conservative_power(self.child_context(context, i)?)?;
        }
        Ok(total)
    }

    /// Children's residuals stacked in child order.
    fn do_calc_implicit_time_derivatives_residual(
        &self,
        context: &Context<T>,
        proposed_derivatives: &ContinuousState<T>,
        residual: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        let mut at = 0;
        for (i, child) in self.subsystems.iter().enumerate() {
            let sub_context = self.child_context(context, i)?;
            let proposed = proposed_derivatives
                .subsystem(i)
                .ok_or_else(|| self.tree_mismatch("time derivatives", i))?;
            let mut sub = child.allocate_implicit_time_derivatives_residual();
            child.calc_implicit_time_derivatives_residual(sub_context, proposed, &mut sub)?;
            write_segment(residual, at, &sub)?;
            at += sub.size();
        }
        Ok(())
    }

    fn do_map_velocity_to_qdot(
        &self,
        context: &Context<T>,
        generalized_velocity: &BasicVector<T>,
        qdot: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        let (mut v_at, mut q_at) = (0, 0);
        for (i, child) in self.subsystems.iter().enumerate() {
            let sub_context = self.child_context(context, i)?;
            let nv = sub_context.num_generalized_velocities();
            let nq = sub_context.num_generalized_positions();
            let v = segment(generalized_velocity, v_at, nv);
            let mut sub = BasicVector::zeros(nq);
            child.map_velocity_to_qdot(sub_context, &v, &mut sub)?;
            write_segment(qdot, q_at, &sub)?;
            v_at += nv;
            q_at += nq;
        }
        Ok(())
    }

    fn do_map_qdot_to_velocity(
        &self,
        context: &Context<T>,
        qdot: &BasicVector<T>,
        generalized_velocity: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        let (mut q_at, mut v_at) = (0, 0);
        for (i, child) in self.subsystems.iter().enumerate() {
            let sub_context = self.child_context(context, i)?;
            let nq = sub_context.num_generalized_positions();
            let nv = sub_context.num_generalized_velocities();
            let q = segment(qdot, q_at, nq);
            let mut sub = BasicVector::zeros(nv);
            child.map_qdot_to_velocity(sub_context, &q, &mut sub)?;
            write_segment(generalized_velocity, v_at, &sub)?;
            q_at += nq;
            v_at += nv;
        }
        Ok(())
    }

    /// Earliest time over the children; children not due then are cleared.
    fn do_calc_next_update_time(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<T> {
        let mut times: Vec<f64> = Vec::with_capacity(self.subsystems.len());
        let mut earliest: Option<(f64, T)> = None;
        self.for_each_child_events(context, events, |child, sub_context, sub_events| {
            let time = child.calc_next_update_time(sub_context, sub_events)?;
            let t = extract_f64(&time, "next update time")?;
            times.push(t);
            if earliest.as_ref().is_none_or(|(best, _)| t < *best) {
                earliest = Some((t, time));
            }
            Ok(())
        })?;
        let Some((next, time)) = earliest else {
            return Ok(T::infinity());
        };
        for (i, t) in times.into_iter().enumerate() {
            if t != next {
                if let Some(mut sub) = events.take_child(i) {
                    sub.clear();
                    events.restore_child(i, sub);
                }
            }
        }
        Ok(time)
    }

    fn do_get_periodic_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        self.for_each_child_events(context, events, |child, sub_context, sub_events| {
            child.get_periodic_events(sub_context, sub_events)
        })
    }

    fn do_get_per_step_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        self.for_each_child_events(context, events, |child, sub_context, sub_events| {
            child.get_per_step_events(sub_context, sub_events)
        })
    }

    fn do_get_initialization_events(
        &self,
        context: &Context<T>,
        events: &mut CompositeEventCollection<T>,
    ) -> FrameworkResult<()> {
        self.for_each_child_events(context, events, |child, sub_context, sub_events| {
            child.get_initialization_events(sub_context, sub_events)
        })
    }

    fn do_map_periodic_events_by_timing(&self) -> BTreeMap<PeriodicEventData, Vec<AnyEvent<T>>> {
        let mut map: BTreeMap<PeriodicEventData, Vec<AnyEvent<T>>> = BTreeMap::new();
        for child in &self.subsystems {
            for (timing, events) in child.map_periodic_events_by_timing() {
                map.entry(timing).or_default().extend(events);
            }
        }
        map
    }

    fn do_find_unique_periodic_discrete_updates(
        &self,
        context: &Context<T>,
        timing: &mut Option<PeriodicEventData>,
        events: &mut EventCollection<DiscreteUpdateEvent<T>>,
    ) -> FrameworkResult<()> {
        for (i, child) in self.subsystems.iter().enumerate() {
            let sub_context = self.child_context(context, i)?;
            let sub_events = events
                .subcollection_mut(i)
                .ok_or_else(|| self.tree_mismatch("event collection", i))?;
            child.do_find_unique_periodic_discrete_updates(sub_context, timing, sub_events)?;
        }
        Ok(())
    }

    fn dispatch_publish_handler(
        &self,
        context: &Context<T>,
        events: &EventCollection<PublishEvent<T>>,
    ) -> FrameworkResult<EventStatus> {
        let mut status = EventStatus::did_nothing();
        for (i, child) in self.subsystems.iter().enumerate() {
            let Some(sub_events) = events.subcollection(i).filter(|e| e.has_events()) else {
                continue;
            };
            status.keep_more_severe(child.publish(self.child_context(context, i)?, sub_events)?);
            if status.is_failure() {
                break;
            }
        }
        Ok(status)
    }

    fn dispatch_discrete_variable_update_handler(
        &self,
        context: &Context<T>,
        events: &EventCollection<DiscreteUpdateEvent<T>>,
        discrete: &mut DiscreteValues<T>,
    ) -> FrameworkResult<EventStatus> {
        let mut status = EventStatus::did_nothing();
        for (i, child) in self.subsystems.iter().enumerate() {
            let Some(sub_events) = events.subcollection(i).filter(|e| e.has_events()) else {
                continue;
            };
            let sub_context = self.child_context(context, i)?;
            let mut sub = discrete.take_subsystem(i)?;
            let result = child.calc_discrete_variable_update(sub_context, sub_events, &mut sub);
            discrete.restore_subsystem(i, sub)?;
            status.keep_more_severe(result?);
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
        for (i, child) in self.subsystems.iter().enumerate() {
            let Some(sub_events) = events.subcollection(i).filter(|e| e.has_events()) else {
                continue;
            };
            let sub_context = self.child_context(context, i)?;
            let mut sub = state.take_substate(i)?;
            let result = child.calc_unrestricted_update(sub_context, sub_events, &mut sub);
            state.restore_substate(i, sub)?;
            status.keep_more_severe(result?);
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
        for (i, child) in self.subsystems.iter().enumerate() {
            let Some(sub_events) = events.subcollection(i).filter(|e| e.has_events()) else {
                continue;
            };
            let sub_context = context
                .subcontext_mut(i)
                .ok_or_else(|| self.tree_mismatch("context", i))?;
            let mut sub = discrete.take_subsystem(i)?;
            let result = child.apply_discrete_variable_update(sub_events, &mut sub, sub_context);
            discrete.restore_subsystem(i, sub)?;
            result?;
        }
        Ok(())
    }

    fn do_apply_unrestricted_update(
        &self,
        events: &EventCollection<UnrestrictedUpdateEvent<T>>,
        state: &mut State<T>,
        context: &mut Context<T>,
    ) -> FrameworkResult<()> {
        for (i, child) in self.subsystems.iter().enumerate() {
            let Some(sub_events) = events.subcollection(i).filter(|e| e.has_events()) else {
                continue;
            };
            let sub_context = context
                .subcontext_mut(i)
                .ok_or_else(|| self.tree_mismatch("context", i))?;
            let mut sub = state.take_substate(i)?;
            let result = child.apply_unrestricted_update(sub_events, &mut sub, sub_context);
            state.restore_substate(i, sub)?;
            result?;
        }
        Ok(())
    }

    fn do_get_witness_functions<'a>(
        &'a self,
        context: &Context<T>,
        witnesses: &mut Vec<&'a WitnessFunction<T>>,
    ) -> FrameworkResult<()> {
        for (i, child) in self.subsystems.iter().enumerate() {
            child.do_get_witness_functions(self.child_context(context, i)?, witnesses)?;
        }
        Ok(())
    }
}

/// Collects children and freezes them into a shared [`Diagram`].
pub struct DiagramBuilder<T: Scalar> {
    name: Option<String>,
    subsystems: Vec<Arc<dyn System<T>>>,
    ids: HashSet<SystemId>,
}

impl<T: Scalar> Default for DiagramBuilder<T> {
    fn default() -> Self {
        Self {
            name: None,
            subsystems: Vec::new(),
            ids: HashSet::new(),
        }
    }
}

impl<T: Scalar> DiagramBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a child. A system may belong to at most one diagram, and names
    /// must be unique among siblings.
    pub fn add_system(&mut self, system: Arc<dyn System<T>>) -> FrameworkResult<Arc<dyn System<T>>> {
        let base = system.base();
        if let Some(parent) = base.parent_system() {
            return Err(FrameworkError::AlreadyOwned {
                system: base.label(),
                parent: parent.base().label(),
            });
        }
        if !self.ids.insert(base.id()) {
            return Err(FrameworkError::AlreadyOwned {
                system: base.label(),
                parent: "this diagram builder".into(),
            });
        }
        if self.subsystems.iter().any(|s| s.base().name() == base.name()) {
            self.ids.remove(&base.id());
            return Err(FrameworkError::InvalidArg {
                what: "subsystem names must be unique within a diagram",
            });
        }
        self.subsystems.push(Arc::clone(&system));
        Ok(system)
    }

    pub fn num_systems(&self) -> usize {
        self.subsystems.len()
    }

    pub fn build(self) -> FrameworkResult<Arc<dyn System<T>>> {
        if self.subsystems.is_empty() {
            return Err(FrameworkError::InvalidArg {
                what: "a diagram needs at least one subsystem",
            });
        }
        let diagram = Diagram::from_subsystems(self.name, self.subsystems);
        debug!(
            diagram = %diagram.base.name(),
            children = diagram.subsystems.len(),
            "built diagram"
        );
        Ok(share(diagram))
    }
}

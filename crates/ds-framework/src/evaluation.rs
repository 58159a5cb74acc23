//! Validated entry points on `dyn System<T>`: context allocation and
//! navigation, cached evaluation, ports, constraints and witness functions.
//!
//! Every method taking a context (or a value allocated by a system) checks
//! that it belongs to this system before calling the node's hooks.

use std::sync::Arc;

use ds_core::{CacheIndex, ConstraintIndex, InputPortIndex, OutputPortIndex, Scalar, SystemId};
use ds_values::{BasicVector, ContinuousState, DiscreteValues, PortValue, ValueError};
use rand::RngCore;
use tracing::debug;

use crate::constraint::SystemConstraint;
use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::options::ContextConfig;
use crate::ports::{InputPort, OutputPort, SystemOutput};
use crate::system::System;
use crate::ticket::DependencyTicket as D;
use crate::witness::WitnessFunction;

/// What the name and sole-port lookups need from a port.
trait NamedPort {
    fn port_name(&self) -> &str;
    fn is_deprecated(&self) -> bool;
    fn warn_deprecated(&self, owner: &str);
}

impl<T: Scalar> NamedPort for InputPort<T> {
    fn port_name(&self) -> &str {
        self.name()
    }

    fn is_deprecated(&self) -> bool {
        self.deprecation().is_some()
    }

    fn warn_deprecated(&self, owner: &str) {
        self.warn_if_deprecated(owner);
    }
}

impl<T: Scalar> NamedPort for OutputPort<T> {
    fn port_name(&self) -> &str {
        self.name()
    }

    fn is_deprecated(&self) -> bool {
        self.deprecation().is_some()
    }

    fn warn_deprecated(&self, owner: &str) {
        self.warn_if_deprecated(owner);
    }
}

fn port_at<'p, P: NamedPort>(
    ports: &'p [P],
    index: usize,
    kind: &'static str,
    owner: &str,
) -> FrameworkResult<&'p P> {
    let port = ports.get(index).ok_or_else(|| FrameworkError::PortIndexOob {
        system: owner.to_string(),
        kind,
        index,
        count: ports.len(),
    })?;
    port.warn_deprecated(owner);
    Ok(port)
}

fn port_by_name<'p, P: NamedPort>(
    ports: &'p [P],
    name: &str,
    kind: &'static str,
    owner: &str,
) -> FrameworkResult<&'p P> {
    if let Some(port) = ports.iter().find(|p| p.port_name() == name) {
        port.warn_deprecated(owner);
        return Ok(port);
    }
    let valid = if ports.is_empty() {
        format!("it has no {kind} ports")
    } else {
        ports.iter().map(NamedPort::port_name).collect::<Vec<_>>().join(", ")
    };
    Err(FrameworkError::PortNameNotFound {
        system: owner.to_string(),
        kind,
        name: name.to_string(),
        valid,
    })
}

fn sole_port<'p, P: NamedPort>(
    ports: &'p [P],
    kind: &'static str,
    owner: &str,
) -> FrameworkResult<&'p P> {
    if ports.is_empty() {
        return Err(FrameworkError::NoPorts {
            system: owner.to_string(),
            kind,
        });
    }
    let mut current = ports.iter().filter(|p| !p.is_deprecated());
    match (current.next(), current.next()) {
        (Some(port), None) => Ok(port),
        _ => Err(FrameworkError::TooManyPorts {
            system: owner.to_string(),
            kind,
            count: ports.len(),
        }),
    }
}

fn check_size(what: &'static str, expected: usize, actual: usize) -> FrameworkResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ValueError::SizeMismatch {
            what,
            expected,
            actual,
        }
        .into())
    }
}

impl<T: Scalar> dyn System<T> {
    // ---- context allocation ----

    /// Context tree with model values, not yet defaulted.
    pub fn allocate_context(&self) -> Context<T> {
        let mut context = self.allocate_context_node();
        context.mark_root();
        context
    }

    fn allocate_context_node(&self) -> Context<T> {
        let base = self.base();
        let cache = crate::cache::DependencyCache::new(base.graph(), base.cache_entries().len());
        let mut context = Context::new(
            base.id(),
            base.allocate_own_state(),
            base.allocate_own_parameters(),
            base.tickets().clone(),
            cache,
        );
        for child in self.subsystems() {
            context.push_subcontext(child.allocate_context_node());
        }
        context
    }

    pub fn create_default_context(&self) -> FrameworkResult<Context<T>> {
        self.create_context_with(&ContextConfig::default())
    }

    pub fn create_context_with(&self, config: &ContextConfig) -> FrameworkResult<Context<T>> {
        config.validate()?;
        let mut context = self.allocate_context();
        context.set_time(T::from_f64(config.initial_time))?;
        context.set_accuracy(config.accuracy)?;
        if !config.caching_enabled {
            context.disable_caching();
        }
        self.set_default_context(&mut context)?;
        Ok(context)
    }

    /// Reset state and parameters to their defaults, throughout the tree.
    pub fn set_default_context(&self, context: &mut Context<T>) -> FrameworkResult<()> {
        self.reset_context(context, None, "set_default_context")
    }

    /// Draw parameters, then state, from `rng` throughout the tree. Nodes
    /// without a distribution fall back to their defaults.
    pub fn set_random_context(&self, context: &mut Context<T>, rng: &mut dyn RngCore) -> FrameworkResult<()> {
        self.reset_context(context, Some(rng), "set_random_context")
    }

    fn reset_context(
        &self,
        context: &mut Context<T>,
        mut rng: Option<&mut dyn RngCore>,
        operation: &'static str,
    ) -> FrameworkResult<()> {
        self.base().validate_context(context)?;
        let before = context.state_shape();
        let params_before = context.parameter_shape();
        self.reset_context_node(context, &mut rng)?;
        let after = context.state_shape();
        let params_after = context.parameter_shape();
        if before != after || params_before != params_after {
            return Err(FrameworkError::ShapeChanged {
                system: self.base().label(),
                operation,
                before: format!("{before}; parameters={params_before:?}"),
                after: format!("{after}; parameters={params_after:?}"),
            });
        }
        Ok(())
    }

    fn reset_context_node(
        &self,
        context: &mut Context<T>,
        rng: &mut Option<&mut dyn RngCore>,
    ) -> FrameworkResult<()> {
        let mut parameters = context.parameters().clone();
        let sizes = parameters.numeric_sizes();
        match rng {
            Some(rng) => self.set_random_parameters(context, &mut parameters, &mut **rng)?,
            None => self.set_default_parameters(context, &mut parameters)?,
        }
        if parameters.numeric_sizes() != sizes {
            return Err(FrameworkError::ShapeChanged {
                system: self.base().label(),
                operation: "set_default_parameters",
                before: format!("{sizes:?}"),
                after: format!("{:?}", parameters.numeric_sizes()),
            });
        }
        context.set_own_parameters(&parameters)?;

        let mut state = context.state().clone();
        let shape = state.shape();
        match rng {
            Some(rng) => self.set_random_state(context, &mut state, &mut **rng)?,
            None => self.set_default_state(context, &mut state)?,
        }
        if state.shape() != shape {
            return Err(FrameworkError::ShapeChanged {
                system: self.base().label(),
                operation: "set_default_state",
                before: shape.to_string(),
                after: state.shape().to_string(),
            });
        }
        context.set_own_state(&state)?;

        for (i, child) in self.subsystems().iter().enumerate() {
            let sub = context
                .subcontext_mut(i)
                .ok_or_else(|| FrameworkError::TreeMismatch {
                    system: self.base().label(),
                    what: "context",
                    index: i,
                })?;
            child.reset_context_node(sub, rng)?;
        }
        Ok(())
    }

    /// Fix every input port in the tree to its model value: zeros for
    /// vector ports, the declared model for abstract ports. Values already
    /// fixed are overwritten.
    pub fn allocate_fixed_inputs(&self, context: &mut Context<T>) -> FrameworkResult<()> {
        self.base().validate_context(context)?;
        for port in self.base().input_ports() {
            port.fix_value(context, port.allocate_value())?;
        }
        for (i, child) in self.subsystems().iter().enumerate() {
            let sub = context
                .subcontext_mut(i)
                .ok_or_else(|| FrameworkError::TreeMismatch {
                    system: self.base().label(),
                    what: "context",
                    index: i,
                })?;
            child.allocate_fixed_inputs(sub)?;
        }
        Ok(())
    }

    /// Derivative storage shaped like the continuous state tree.
    pub fn allocate_time_derivatives(&self) -> ContinuousState<T> {
        let mut derivatives = self.base().allocate_own_time_derivatives();
        for child in self.subsystems() {
            derivatives.push_subsystem(child.allocate_time_derivatives());
        }
        derivatives
    }

    /// Scratch discrete values shaped like the discrete state tree.
    pub fn allocate_discrete_variables(&self) -> DiscreteValues<T> {
        let mut discrete = self.base().allocate_own_discrete_variables();
        for child in self.subsystems() {
            discrete.push_subsystem(child.allocate_discrete_variables());
        }
        discrete
    }

    pub fn allocate_output(&self) -> SystemOutput<T> {
        let base = self.base();
        let values = base.output_ports().iter().map(OutputPort::allocate).collect();
        SystemOutput::new(base.id(), values)
    }

    // ---- model-level counts ----

    pub fn num_continuous_states(&self) -> usize {
        self.base().num_own_continuous_states()
            + self
                .subsystems()
                .iter()
                .map(|c| c.num_continuous_states())
                .sum::<usize>()
    }

    pub fn num_discrete_state_groups(&self) -> usize {
        self.base().num_own_discrete_state_groups()
            + self
                .subsystems()
                .iter()
                .map(|c| c.num_discrete_state_groups())
                .sum::<usize>()
    }

    pub fn num_abstract_states(&self) -> usize {
        self.base().num_own_abstract_states()
            + self
                .subsystems()
                .iter()
                .map(|c| c.num_abstract_states())
                .sum::<usize>()
    }

    pub fn num_cache_entries(&self) -> usize {
        self.base().cache_entries().len()
    }

    // ---- navigation ----

    /// Child positions leading from this system to `target`.
    pub(crate) fn path_to(&self, target: SystemId) -> Option<Vec<usize>> {
        if self.base().id() == target {
            return Some(Vec::new());
        }
        for (i, child) in self.subsystems().iter().enumerate() {
            if let Some(mut path) = child.path_to(target) {
                path.insert(0, i);
                return Some(path);
            }
        }
        None
    }

    fn path_to_or_err(&self, target: &dyn System<T>) -> FrameworkResult<Vec<usize>> {
        self.path_to(target.base().id())
            .ok_or_else(|| FrameworkError::SubsystemNotContained {
                subsystem: target.base().label(),
                system: self.base().label(),
            })
    }

    fn walk_down<'a>(&self, context: &'a Context<T>, path: &[usize]) -> FrameworkResult<&'a Context<T>> {
        let mut current = context;
        for &i in path {
            current = current.subcontext(i).ok_or_else(|| FrameworkError::TreeMismatch {
                system: self.base().label(),
                what: "context",
                index: i,
            })?;
        }
        Ok(current)
    }

    /// Context of `target` inside `context`, which must be this system's.
    pub fn get_subsystem_context<'a>(
        &self,
        target: &dyn System<T>,
        context: &'a Context<T>,
    ) -> FrameworkResult<&'a Context<T>> {
        self.base().validate_context(context)?;
        let path = self.path_to_or_err(target)?;
        self.walk_down(context, &path)
    }

    /// Mutable variant; every ancestor on the way down notes that its
    /// subtree may change.
    pub fn get_mutable_subsystem_context<'a>(
        &self,
        target: &dyn System<T>,
        context: &'a mut Context<T>,
    ) -> FrameworkResult<&'a mut Context<T>> {
        self.base().validate_context(context)?;
        let path = self.path_to_or_err(target)?;
        let mut current = context;
        for i in path {
            current = current
                .subcontext_mut(i)
                .ok_or_else(|| FrameworkError::TreeMismatch {
                    system: self.base().label(),
                    what: "context",
                    index: i,
                })?;
        }
        Ok(current)
    }

    /// This system's context inside the root context of its tree.
    pub fn get_my_context_from_root<'a>(&self, root: &'a Context<T>) -> FrameworkResult<&'a Context<T>> {
        if !root.is_root() {
            return Err(FrameworkError::NotRootContext {
                system: self.base().label(),
            });
        }
        match self.base().parent_service().and_then(|p| p.root()) {
            None => {
                self.base().validate_context(root)?;
                Ok(root)
            }
            Some(root_system) => root_system.get_subsystem_context(self, root),
        }
    }

    pub fn get_my_mutable_context_from_root<'a>(
        &self,
        root: &'a mut Context<T>,
    ) -> FrameworkResult<&'a mut Context<T>> {
        if !root.is_root() {
            return Err(FrameworkError::NotRootContext {
                system: self.base().label(),
            });
        }
        match self.base().parent_service().and_then(|p| p.root()) {
            None => {
                self.base().validate_context(root)?;
                Ok(root)
            }
            Some(root_system) => root_system.get_mutable_subsystem_context(self, root),
        }
    }

    // ---- continuous dynamics and energy ----

    pub fn calc_time_derivatives(
        &self,
        context: &Context<T>,
        derivatives: &mut ContinuousState<T>,
    ) -> FrameworkResult<()> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(derivatives, "ContinuousState")?;
        self.do_calc_time_derivatives(context, derivatives)
    }

    pub fn eval_time_derivatives(&self, context: &Context<T>) -> FrameworkResult<Arc<ContinuousState<T>>> {
        self.base().standard_entry(D::XCDOT)?.eval(self, context)
    }

    /// Length of the implicit residual, one entry per continuous state.
    pub fn implicit_time_derivatives_residual_size(&self) -> usize {
        self.num_continuous_states()
    }

    pub fn allocate_implicit_time_derivatives_residual(&self) -> BasicVector<T> {
        BasicVector::zeros(self.implicit_time_derivatives_residual_size())
    }

    /// Residual of the implicit dynamics `g(t, x, proposed) = 0`.
    pub fn calc_implicit_time_derivatives_residual(
        &self,
        context: &Context<T>,
        proposed_derivatives: &ContinuousState<T>,
        residual: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(proposed_derivatives, "ContinuousState")?;
        check_size(
            "proposed time derivatives",
            context.num_continuous_states(),
            proposed_derivatives.size(),
        )?;
        check_size(
            "implicit residual",
            self.implicit_time_derivatives_residual_size(),
            residual.size(),
        )?;
        self.do_calc_implicit_time_derivatives_residual(context, proposed_derivatives, residual)
    }

    // ---- generalized coordinates ----

    /// Time derivative of the generalized positions for velocity `v`.
    pub fn map_velocity_to_qdot(
        &self,
        context: &Context<T>,
        generalized_velocity: &BasicVector<T>,
        qdot: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        self.base().validate_context(context)?;
        check_size(
            "generalized velocity",
            context.num_generalized_velocities(),
            generalized_velocity.size(),
        )?;
        check_size("qdot", context.num_generalized_positions(), qdot.size())?;
        self.do_map_velocity_to_qdot(context, generalized_velocity, qdot)
    }

    pub fn map_qdot_to_velocity(
        &self,
        context: &Context<T>,
        qdot: &BasicVector<T>,
        generalized_velocity: &mut BasicVector<T>,
    ) -> FrameworkResult<()> {
        self.base().validate_context(context)?;
        check_size("qdot", context.num_generalized_positions(), qdot.size())?;
        check_size(
            "generalized velocity",
            context.num_generalized_velocities(),
            generalized_velocity.size(),
        )?;
        self.do_map_qdot_to_velocity(context, qdot, generalized_velocity)
    }

    pub fn calc_potential_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.base().validate_context(context)?;
        self.do_calc_potential_energy(context)
    }

    pub fn calc_kinetic_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.base().validate_context(context)?;
        self.do_calc_kinetic_energy(context)
    }

    pub fn calc_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.base().validate_context(context)?;
        self.do_calc_conservative_power(context)
    }

    pub fn calc_non_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.base().validate_context(context)?;
        self.do_calc_non_conservative_power(context)
    }

    fn eval_standard_scalar(&self, ticket: D, context: &Context<T>) -> FrameworkResult<T> {
        let value = self.base().standard_entry(ticket)?.eval::<T>(self, context)?;
        Ok((*value).clone())
    }

    pub fn eval_potential_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.eval_standard_scalar(D::POTENTIAL_ENERGY, context)
    }

    pub fn eval_kinetic_energy(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.eval_standard_scalar(D::KINETIC_ENERGY, context)
    }

    pub fn eval_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.eval_standard_scalar(D::CONSERVATIVE_POWER, context)
    }

    pub fn eval_non_conservative_power(&self, context: &Context<T>) -> FrameworkResult<T> {
        self.eval_standard_scalar(D::NONCONSERVATIVE_POWER, context)
    }

    /// Memoized value of a declared cache entry.
    pub fn eval_cache_entry<V: Send + Sync + 'static>(
        &self,
        context: &Context<T>,
        index: CacheIndex,
    ) -> FrameworkResult<Arc<V>> {
        let entry = self
            .base()
            .cache_entry(index)
            .ok_or_else(|| FrameworkError::InvalidArg {
                what: "cache entry index out of range",
            })?;
        entry.eval(self, context)
    }

    // ---- ports ----

    pub fn num_input_ports(&self) -> usize {
        self.base().input_ports().len()
    }

    pub fn num_output_ports(&self) -> usize {
        self.base().output_ports().len()
    }

    pub fn get_input_port(&self, index: InputPortIndex) -> FrameworkResult<&InputPort<T>> {
        port_at(self.base().input_ports(), index.index(), "input", &self.base().label())
    }

    pub fn get_output_port(&self, index: OutputPortIndex) -> FrameworkResult<&OutputPort<T>> {
        port_at(self.base().output_ports(), index.index(), "output", &self.base().label())
    }

    pub fn get_input_port_by_name(&self, name: &str) -> FrameworkResult<&InputPort<T>> {
        port_by_name(self.base().input_ports(), name, "input", &self.base().label())
    }

    pub fn get_output_port_by_name(&self, name: &str) -> FrameworkResult<&OutputPort<T>> {
        port_by_name(self.base().output_ports(), name, "output", &self.base().label())
    }

    pub fn has_input_port(&self, name: &str) -> bool {
        self.base().input_ports().iter().any(|p| p.name() == name)
    }

    pub fn has_output_port(&self, name: &str) -> bool {
        self.base().output_ports().iter().any(|p| p.name() == name)
    }

    /// The only non-deprecated input port.
    pub fn get_sole_input_port(&self) -> FrameworkResult<&InputPort<T>> {
        sole_port(self.base().input_ports(), "input", &self.base().label())
    }

    pub fn get_sole_output_port(&self) -> FrameworkResult<&OutputPort<T>> {
        sole_port(self.base().output_ports(), "output", &self.base().label())
    }

    /// Compute every output port into `output`, bypassing the cache.
    pub fn calc_output(&self, context: &Context<T>, output: &mut SystemOutput<T>) -> FrameworkResult<()> {
        let base = self.base();
        base.validate_context(context)?;
        base.validate_created_for(output, "SystemOutput")?;
        for port in base.output_ports() {
            let value = output.get_mut(port.index()).ok_or(FrameworkError::PortIndexOob {
                system: base.label(),
                kind: "output",
                index: port.index().index(),
                count: base.output_ports().len(),
            })?;
            port.calc(self, context, value)?;
        }
        Ok(())
    }

    /// Memoized value of one output port.
    pub fn eval_output(&self, context: &Context<T>, index: OutputPortIndex) -> FrameworkResult<Arc<PortValue<T>>> {
        let port = self.get_output_port(index)?;
        self.eval_cache_entry(context, port.cache_index())
    }

    pub fn eval_vector_output(
        &self,
        context: &Context<T>,
        index: OutputPortIndex,
    ) -> FrameworkResult<BasicVector<T>> {
        let value = self.eval_output(context, index)?;
        value
            .as_vector()
            .cloned()
            .ok_or_else(|| FrameworkError::PortValueType {
                port: format!("output port {index} of {}", self.base().label()),
                detail: "expected a vector value".into(),
            })
    }

    pub fn has_any_direct_feedthrough(&self) -> bool {
        !self.get_direct_feedthroughs().is_empty()
    }

    pub fn has_direct_feedthrough(&self, output: OutputPortIndex) -> bool {
        self.get_direct_feedthroughs()
            .iter()
            .any(|&(_, o)| o == output)
    }

    pub fn has_direct_feedthrough_pair(&self, input: InputPortIndex, output: OutputPortIndex) -> bool {
        self.get_direct_feedthroughs().contains(&(input, output))
    }

    // ---- constraints ----

    pub fn num_constraints(&self) -> usize {
        self.base().constraints().len()
    }

    pub fn get_constraint(&self, index: ConstraintIndex) -> FrameworkResult<&SystemConstraint<T>> {
        let constraints = self.base().constraints();
        constraints
            .get(index.index())
            .ok_or(FrameworkError::ConstraintIndexOob {
                index: index.index(),
                count: constraints.len(),
            })
    }

    /// `Some(true)` if every constraint holds within `tol`, `Some(false)` as
    /// soon as one is violated, `None` if some could not be decided.
    pub fn check_system_constraints_satisfied(
        &self,
        context: &Context<T>,
        tol: f64,
    ) -> FrameworkResult<Option<bool>> {
        self.base().validate_context(context)?;
        let mut decided = true;
        for constraint in self.base().constraints().iter() {
            match constraint.check_satisfied(self, context, tol)? {
                Some(true) => {}
                Some(false) => {
                    debug!(
                        system = %self.base().pathname(),
                        constraint = constraint.description(),
                        tol,
                        "constraint not satisfied"
                    );
                    return Ok(Some(false));
                }
                None => decided = false,
            }
        }
        Ok(decided.then_some(true))
    }

    // ---- witness functions ----

    pub fn get_witness_functions<'a>(
        &'a self,
        context: &Context<T>,
    ) -> FrameworkResult<Vec<&'a WitnessFunction<T>>> {
        self.base().validate_context(context)?;
        let mut witnesses = Vec::new();
        self.do_get_witness_functions(context, &mut witnesses)?;
        Ok(witnesses)
    }

    /// Evaluate `witness` against the context of the subsystem declaring it.
    pub fn calc_witness_value(
        &self,
        context: &Context<T>,
        witness: &WitnessFunction<T>,
    ) -> FrameworkResult<T> {
        self.base().validate_context(context)?;
        let path = self
            .path_to(witness.system_id())
            .ok_or_else(|| FrameworkError::SubsystemNotContained {
                subsystem: format!("witness function '{}'", witness.description()),
                system: self.base().label(),
            })?;
        witness.calc(self.walk_down(context, &path)?)
    }
}

//! Runtime counterpart of a system.
//!
//! A `Context` holds everything that changes while a system is simulated:
//! time, state, parameters, fixed input values and the memo cache. Child
//! contexts mirror the system's children one to one. Every mutator notes the
//! affected dependency tickets so dependent cache entries go out of date.

use ds_core::{
    AbstractParameterIndex, AbstractStateIndex, DiscreteStateIndex, HasSystemId, InputPortIndex,
    NumericParameterIndex, Scalar, SystemId,
};
use ds_values::{
    AbstractValues, BasicVector, ContinuousState, DiscreteValues, Parameters,
    PortValue, State, StateShape, ValueError,
};

use crate::cache::DependencyCache;
use crate::error::{FrameworkError, FrameworkResult};
use crate::ticket::DependencyTicket as D;
use crate::ticket::DependencyTicket;

/// Tickets minted by the owning system for this node's value groups.
#[derive(Clone, Debug, Default)]
pub(crate) struct ContextTickets {
    pub discrete: Vec<DependencyTicket>,
    pub abstract_state: Vec<DependencyTicket>,
    pub numeric_parameters: Vec<DependencyTicket>,
    pub abstract_parameters: Vec<DependencyTicket>,
    pub input_ports: Vec<DependencyTicket>,
}

#[derive(Clone, Debug)]
pub struct Context<T: Scalar> {
    system_id: SystemId,
    is_root: bool,
    time: T,
    true_time: Option<T>,
    accuracy: Option<f64>,
    state: State<T>,
    parameters: Parameters<T>,
    inputs: Vec<Option<PortValue<T>>>,
    tickets: ContextTickets,
    cache: DependencyCache,
    subcontexts: Vec<Context<T>>,
}

fn structure_mismatch(what: &'static str, expected: usize, actual: usize) -> FrameworkError {
    ValueError::StructureMismatch {
        what,
        detail: format!("context has {expected} children, value has {actual}"),
    }
    .into()
}

impl<T: Scalar> Context<T> {
    pub(crate) fn new(
        system_id: SystemId,
        state: State<T>,
        parameters: Parameters<T>,
        tickets: ContextTickets,
        cache: DependencyCache,
    ) -> Self {
        let num_inputs = tickets.input_ports.len();
        Self {
            system_id,
            is_root: false,
            time: T::zero(),
            true_time: None,
            accuracy: None,
            state,
            parameters,
            inputs: vec![None; num_inputs],
            tickets,
            cache,
            subcontexts: Vec::new(),
        }
    }

    pub(crate) fn push_subcontext(&mut self, child: Context<T>) {
        self.subcontexts.push(child);
    }

    pub(crate) fn mark_root(&mut self) {
        self.is_root = true;
    }

    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    // ---- tree navigation ----

    pub fn num_subcontexts(&self) -> usize {
        self.subcontexts.len()
    }

    pub fn subcontext(&self, index: usize) -> Option<&Context<T>> {
        self.subcontexts.get(index)
    }

    /// Mutable child access. Anything below may change, so this node's
    /// aggregate tickets are conservatively marked changed.
    pub fn subcontext_mut(&mut self, index: usize) -> Option<&mut Context<T>> {
        if index >= self.subcontexts.len() {
            return None;
        }
        for ticket in [D::XC, D::XD, D::XA, D::PN, D::PA, D::ALL_INPUT_PORTS] {
            self.cache.note_changed(ticket);
        }
        self.subcontexts.get_mut(index)
    }

    // ---- time & accuracy ----

    pub fn time(&self) -> &T {
        &self.time
    }

    /// Set the time of the whole tree. Only a root context may do this,
    /// so every node in a tree always reports the same time.
    pub fn set_time(&mut self, time: T) -> FrameworkResult<()> {
        self.ensure_root("set_time")?;
        self.propagate_time(time);
        Ok(())
    }

    fn propagate_time(&mut self, time: T) {
        for child in &mut self.subcontexts {
            child.propagate_time(time.clone());
        }
        self.time = time;
        self.cache.note_changed(D::TIME);
    }

    fn ensure_root(&self, operation: &'static str) -> FrameworkResult<()> {
        if self.is_root {
            Ok(())
        } else {
            Err(FrameworkError::RootContextOnly {
                operation,
                context: self.system_id.to_string(),
            })
        }
    }

    /// Time as known to an outer driver when it differs from the nominal time.
    pub fn true_time(&self) -> Option<&T> {
        self.true_time.as_ref()
    }

    pub fn set_true_time(&mut self, true_time: Option<T>) {
        self.true_time = true_time;
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    /// Root only, like [`Context::set_time`].
    pub fn set_accuracy(&mut self, accuracy: Option<f64>) -> FrameworkResult<()> {
        self.ensure_root("set_accuracy")?;
        self.propagate_accuracy(accuracy);
        Ok(())
    }

    fn propagate_accuracy(&mut self, accuracy: Option<f64>) {
        for child in &mut self.subcontexts {
            child.propagate_accuracy(accuracy);
        }
        self.accuracy = accuracy;
        self.cache.note_changed(D::ACCURACY);
    }

    // ---- this node's own state ----

    /// State owned by this node (empty for a composite).
    pub fn state(&self) -> &State<T> {
        &self.state
    }

    pub fn continuous_state(&self) -> &ContinuousState<T> {
        self.state.continuous()
    }

    pub fn continuous_state_vector(&self) -> &BasicVector<T> {
        self.state.continuous().vector()
    }

    pub fn continuous_state_mut(&mut self) -> &mut ContinuousState<T> {
        self.cache.note_changed(D::XC);
        self.state.continuous_mut()
    }

    pub fn discrete_state(&self) -> &DiscreteValues<T> {
        self.state.discrete()
    }

    pub fn discrete_state_vector(&self, index: DiscreteStateIndex) -> FrameworkResult<&BasicVector<T>> {
        Ok(self.state.discrete().group(index.index())?)
    }

    pub fn discrete_state_vector_mut(
        &mut self,
        index: DiscreteStateIndex,
    ) -> FrameworkResult<&mut BasicVector<T>> {
        if let Some(&ticket) = self.tickets.discrete.get(index.index()) {
            self.cache.note_changed(ticket);
        }
        Ok(self.state.discrete_mut().group_mut(index.index())?)
    }

    pub fn abstract_state<V: 'static>(&self, index: AbstractStateIndex) -> FrameworkResult<&V> {
        Ok(self.state.abstract_state().get::<V>(index.index())?)
    }

    pub fn abstract_state_mut<V: 'static>(&mut self, index: AbstractStateIndex) -> FrameworkResult<&mut V> {
        if let Some(&ticket) = self.tickets.abstract_state.get(index.index()) {
            self.cache.note_changed(ticket);
        }
        Ok(self.state.abstract_state_mut().get_mut::<V>(index.index())?)
    }

    // ---- parameters ----

    pub fn parameters(&self) -> &Parameters<T> {
        &self.parameters
    }

    pub fn numeric_parameter(&self, index: NumericParameterIndex) -> FrameworkResult<&BasicVector<T>> {
        Ok(self.parameters.numeric(index.index())?)
    }

    pub fn numeric_parameter_mut(
        &mut self,
        index: NumericParameterIndex,
    ) -> FrameworkResult<&mut BasicVector<T>> {
        if let Some(&ticket) = self.tickets.numeric_parameters.get(index.index()) {
            self.cache.note_changed(ticket);
        }
        Ok(self.parameters.numeric_mut(index.index())?)
    }

    pub fn abstract_parameter<V: 'static>(&self, index: AbstractParameterIndex) -> FrameworkResult<&V> {
        Ok(self.parameters.abstract_value(index.index())?.get::<V>()?)
    }

    pub fn abstract_parameter_mut<V: 'static>(
        &mut self,
        index: AbstractParameterIndex,
    ) -> FrameworkResult<&mut V> {
        if let Some(&ticket) = self.tickets.abstract_parameters.get(index.index()) {
            self.cache.note_changed(ticket);
        }
        Ok(self.parameters.abstract_value_mut(index.index())?.get_mut::<V>()?)
    }

    // ---- aggregate counts over the subtree ----

    pub fn num_continuous_states(&self) -> usize {
        self.state.continuous().size()
            + self.subcontexts.iter().map(Self::num_continuous_states).sum::<usize>()
    }

    /// Generalized positions `q` over the subtree.
    pub fn num_generalized_positions(&self) -> usize {
        self.state.continuous().num_q()
            + self.subcontexts.iter().map(Self::num_generalized_positions).sum::<usize>()
    }

    /// Generalized velocities `v` over the subtree.
    pub fn num_generalized_velocities(&self) -> usize {
        self.state.continuous().num_v()
            + self.subcontexts.iter().map(Self::num_generalized_velocities).sum::<usize>()
    }

    pub fn num_discrete_state_groups(&self) -> usize {
        self.state.discrete().num_groups()
            + self.subcontexts.iter().map(Self::num_discrete_state_groups).sum::<usize>()
    }

    pub fn num_abstract_states(&self) -> usize {
        self.state.abstract_state().size()
            + self.subcontexts.iter().map(Self::num_abstract_states).sum::<usize>()
    }

    pub fn num_numeric_parameter_groups(&self) -> usize {
        self.parameters.num_numeric_groups()
            + self.subcontexts.iter().map(Self::num_numeric_parameter_groups).sum::<usize>()
    }

    pub fn num_abstract_parameters(&self) -> usize {
        self.parameters.num_abstract()
            + self.subcontexts.iter().map(Self::num_abstract_parameters).sum::<usize>()
    }

    /// Input ports of this node only.
    pub fn num_input_ports(&self) -> usize {
        self.inputs.len()
    }

    /// Dimensions of the whole state tree.
    pub fn state_shape(&self) -> StateShape {
        let mut discrete_groups = self.state.discrete().group_sizes();
        for child in &self.subcontexts {
            discrete_groups.extend(child.state_shape().discrete_groups);
        }
        StateShape {
            continuous: self.num_continuous_states(),
            discrete_groups,
            abstract_slots: self.num_abstract_states(),
        }
    }

    /// Numeric parameter group sizes over the subtree, depth-first.
    pub fn parameter_shape(&self) -> (Vec<usize>, usize) {
        let mut sizes = self.parameters.numeric_sizes();
        for child in &self.subcontexts {
            sizes.extend(child.parameter_shape().0);
        }
        (sizes, self.num_abstract_parameters())
    }

    // ---- input values ----

    /// Value fixed on an input port of this node, if any.
    pub fn input_value(&self, index: InputPortIndex) -> Option<&PortValue<T>> {
        self.inputs.get(index.index()).and_then(Option::as_ref)
    }

    /// Fixed vector value on an input port of this node, if any.
    pub fn vector_input(&self, index: InputPortIndex) -> FrameworkResult<Option<&BasicVector<T>>> {
        match self.input_value(index) {
            None => Ok(None),
            Some(PortValue::Vector(v)) => Ok(Some(v)),
            Some(PortValue::Abstract(v)) => Err(FrameworkError::PortValueType {
                port: format!("input port {index} of context {}", self.system_id),
                detail: format!("expected a vector value, found {}", v.value_type_name()),
            }),
        }
    }

    pub(crate) fn set_input_value(&mut self, index: InputPortIndex, value: PortValue<T>) {
        if let Some(slot) = self.inputs.get_mut(index.index()) {
            *slot = Some(value);
        }
        if let Some(&ticket) = self.tickets.input_ports.get(index.index()) {
            self.cache.note_changed(ticket);
        }
    }

    // ---- whole-tree state access ----

    /// Assemble the state of this node and every descendant.
    pub fn clone_state(&self) -> State<T> {
        let mut state = self.state.clone();
        for child in &self.subcontexts {
            state.push_substate(child.clone_state());
        }
        state
    }

    pub fn clone_discrete_state(&self) -> DiscreteValues<T> {
        let mut discrete = self.state.discrete().clone();
        for child in &self.subcontexts {
            discrete.push_subsystem(child.clone_discrete_state());
        }
        discrete
    }

    pub fn clone_continuous_state(&self) -> ContinuousState<T> {
        let mut continuous = self.state.continuous().clone();
        for child in &self.subcontexts {
            continuous.push_subsystem(child.clone_continuous_state());
        }
        continuous
    }

    /// Distribute a whole-tree state over this node and its descendants.
    pub fn set_state_from(&mut self, state: &State<T>) -> FrameworkResult<()> {
        self.set_continuous_state_from(state.continuous())?;
        self.set_discrete_state_from(state.discrete())?;
        self.set_abstract_state_from(state.abstract_state())
    }

    pub fn set_continuous_state_from(&mut self, xc: &ContinuousState<T>) -> FrameworkResult<()> {
        if xc.num_subsystems() != self.subcontexts.len() {
            return Err(structure_mismatch(
                "continuous state",
                self.subcontexts.len(),
                xc.num_subsystems(),
            ));
        }
        self.state.continuous_mut().vector_mut().set_from(xc.vector())?;
        self.cache.note_changed(D::XC);
        for (i, child) in self.subcontexts.iter_mut().enumerate() {
            if let Some(sub) = xc.subsystem(i) {
                child.set_continuous_state_from(sub)?;
            }
        }
        Ok(())
    }

    pub fn set_discrete_state_from(&mut self, xd: &DiscreteValues<T>) -> FrameworkResult<()> {
        if xd.num_subsystems() != self.subcontexts.len() {
            return Err(structure_mismatch(
                "discrete state",
                self.subcontexts.len(),
                xd.num_subsystems(),
            ));
        }
        let own = self.state.discrete().own_groups().len();
        if xd.own_groups().len() != own {
            return Err(ValueError::SizeMismatch {
                what: "DiscreteValues group count",
                expected: own,
                actual: xd.own_groups().len(),
            }
            .into());
        }
        for (i, group) in xd.own_groups().iter().enumerate() {
            self.state.discrete_mut().group_mut(i)?.set_from(group)?;
            if let Some(&ticket) = self.tickets.discrete.get(i) {
                self.cache.note_changed(ticket);
            }
        }
        self.cache.note_changed(D::XD);
        for (i, child) in self.subcontexts.iter_mut().enumerate() {
            if let Some(sub) = xd.subsystem(i) {
                child.set_discrete_state_from(sub)?;
            }
        }
        Ok(())
    }

    pub fn set_abstract_state_from(&mut self, xa: &AbstractValues) -> FrameworkResult<()> {
        if xa.num_subsystems() != self.subcontexts.len() {
            return Err(structure_mismatch(
                "abstract state",
                self.subcontexts.len(),
                xa.num_subsystems(),
            ));
        }
        let own = self.state.abstract_state().own_size();
        if xa.own_size() != own {
            return Err(ValueError::SizeMismatch {
                what: "AbstractValues slot count",
                expected: own,
                actual: xa.own_size(),
            }
            .into());
        }
        for i in 0..own {
            let source = xa.value(i)?;
            self.state.abstract_state_mut().value_mut(i)?.set_from(source)?;
            if let Some(&ticket) = self.tickets.abstract_state.get(i) {
                self.cache.note_changed(ticket);
            }
        }
        self.cache.note_changed(D::XA);
        for (i, child) in self.subcontexts.iter_mut().enumerate() {
            if let Some(sub) = xa.subsystem(i) {
                child.set_abstract_state_from(sub)?;
            }
        }
        Ok(())
    }

    /// Replace this node's own state (no descendants).
    pub(crate) fn set_own_state(&mut self, state: &State<T>) -> FrameworkResult<()> {
        self.state.set_from(state)?;
        self.note_all_state_changed();
        Ok(())
    }

    /// Replace this node's own parameters (no descendants).
    pub(crate) fn set_own_parameters(&mut self, parameters: &Parameters<T>) -> FrameworkResult<()> {
        self.parameters.set_from(parameters)?;
        for ticket in self
            .tickets
            .numeric_parameters
            .iter()
            .chain(&self.tickets.abstract_parameters)
        {
            self.cache.note_changed(*ticket);
        }
        self.cache.note_changed(D::PN);
        self.cache.note_changed(D::PA);
        Ok(())
    }

    fn note_all_state_changed(&mut self) {
        for ticket in self.tickets.discrete.iter().chain(&self.tickets.abstract_state) {
            self.cache.note_changed(*ticket);
        }
        for ticket in [D::XC, D::XD, D::XA] {
            self.cache.note_changed(ticket);
        }
    }

    /// Copy time, accuracy, state and parameters from a context of the
    /// same shape. Root only, since it sets the time.
    pub fn set_time_state_and_parameters_from(&mut self, other: &Context<T>) -> FrameworkResult<()> {
        self.ensure_root("set_time_state_and_parameters_from")?;
        self.copy_time_state_and_parameters(other)
    }

    fn copy_time_state_and_parameters(&mut self, other: &Context<T>) -> FrameworkResult<()> {
        if other.subcontexts.len() != self.subcontexts.len() {
            return Err(structure_mismatch(
                "context",
                self.subcontexts.len(),
                other.subcontexts.len(),
            ));
        }
        self.time = other.time.clone();
        self.accuracy = other.accuracy;
        self.cache.note_changed(D::TIME);
        self.cache.note_changed(D::ACCURACY);
        self.set_own_state(&other.state)?;
        self.set_own_parameters(&other.parameters)?;
        for (mine, theirs) in self.subcontexts.iter_mut().zip(&other.subcontexts) {
            mine.copy_time_state_and_parameters(theirs)?;
        }
        Ok(())
    }

    // ---- cache control ----

    pub fn cache(&self) -> &DependencyCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut DependencyCache {
        &mut self.cache
    }

    pub fn disable_caching(&mut self) {
        self.cache.disable();
        for child in &mut self.subcontexts {
            child.disable_caching();
        }
    }

    pub fn enable_caching(&mut self) {
        self.cache.enable();
        for child in &mut self.subcontexts {
            child.enable_caching();
        }
    }

    /// Mark every cache entry in the subtree out of date.
    pub fn invalidate_all_caches(&mut self) {
        self.cache.invalidate_all();
        for child in &mut self.subcontexts {
            child.invalidate_all_caches();
        }
    }
}

impl<T: Scalar> HasSystemId for Context<T> {
    fn system_id(&self) -> Option<SystemId> {
        Some(self.system_id)
    }
}

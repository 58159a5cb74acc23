//! Declaration-time bookkeeping every system carries.
//!
//! A concrete system owns one `SystemBase` and fills it in its constructor:
//! state and parameter models, ports, cache entries, events, witness
//! functions and constraints. Each declaration mints the dependency tickets
//! the matching context later tracks. Once the system is shared the base is
//! read-only.

use core::fmt;
use std::sync::{Arc, OnceLock};

use ds_core::{
    AbstractParameterIndex, AbstractStateIndex, CacheIndex, ConstraintIndex, DiscreteStateIndex,
    HasSystemId, InputPortIndex, NumericParameterIndex, OutputPortIndex, Scalar, SystemId,
};
use ds_values::{
    AbstractValue, AbstractValues, BasicVector, ContinuousState, DiscreteValues, Parameters,
    PortValue, State, Value,
};

use crate::cache::{CacheEntry, CacheRule, CacheValue, cache_rule};
use crate::constraint::{ConstraintRegistry, ExternalSystemConstraint, SystemConstraint};
use crate::context::{Context, ContextTickets};
use crate::converter::SystemScalarConverter;
use crate::error::{FrameworkError, FrameworkResult};
use crate::event::{AnyEvent, PeriodicEventData, TriggerType};
use crate::ports::{
    InputModel, InputPort, OutputAllocator, OutputCalc, OutputPort, OutputPortSpec, PortDataType,
    bind_input_eval,
};
use crate::system::{ParentService, System};
use crate::ticket::DependencyTicket as D;
use crate::ticket::{DependencyTicket, TicketGraph};
use crate::witness::{WitnessFunction, WitnessTriggerDirection};

/// Default values copied into every freshly allocated context.
#[derive(Clone, Debug)]
struct ModelValues<T: Scalar> {
    continuous: ContinuousState<T>,
    discrete: Vec<BasicVector<T>>,
    abstract_state: Vec<Box<dyn AbstractValue>>,
    numeric_parameters: Vec<BasicVector<T>>,
    abstract_parameters: Vec<Box<dyn AbstractValue>>,
}

impl<T: Scalar> Default for ModelValues<T> {
    fn default() -> Self {
        Self {
            continuous: ContinuousState::default(),
            discrete: Vec::new(),
            abstract_state: Vec::new(),
            numeric_parameters: Vec::new(),
            abstract_parameters: Vec::new(),
        }
    }
}

pub struct SystemBase<T: Scalar> {
    id: SystemId,
    name: String,
    type_name: String,
    parent: OnceLock<ParentService<T>>,
    graph: TicketGraph,
    tickets: ContextTickets,
    model: ModelValues<T>,
    input_ports: Vec<InputPort<T>>,
    output_ports: Vec<OutputPort<T>>,
    cache_entries: Vec<CacheEntry<T>>,
    constraints: ConstraintRegistry<T>,
    converter: SystemScalarConverter,
    periodic_events: Vec<(PeriodicEventData, AnyEvent<T>)>,
    per_step_events: Vec<AnyEvent<T>>,
    initialization_events: Vec<AnyEvent<T>>,
    forced_events: Vec<AnyEvent<T>>,
    witness_functions: Vec<WitnessFunction<T>>,
}

/// Strip module paths from a `core::any::type_name` string.
fn nice_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            segment.clear();
        } else if c.is_alphanumeric() || c == '_' {
            segment.push(c);
        } else {
            out.push_str(&segment);
            segment.clear();
            out.push(c);
        }
    }
    out.push_str(&segment);
    out
}

impl<T: Scalar> SystemBase<T> {
    /// Base for a system of type `S`, named after the type.
    pub fn of<S: ?Sized>() -> Self {
        Self::new(core::any::type_name::<S>())
    }

    pub fn new(type_name: &str) -> Self {
        let type_name = nice_type_name(type_name);
        let name = type_name
            .split('<')
            .next()
            .unwrap_or(type_name.as_str())
            .to_string();
        let mut base = Self {
            id: SystemId::next(),
            name,
            type_name,
            parent: OnceLock::new(),
            graph: TicketGraph::new(),
            tickets: ContextTickets::default(),
            model: ModelValues::default(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            cache_entries: Vec::new(),
            constraints: ConstraintRegistry::default(),
            converter: SystemScalarConverter::new(),
            periodic_events: Vec::new(),
            per_step_events: Vec::new(),
            initialization_events: Vec::new(),
            forced_events: Vec::new(),
            witness_functions: Vec::new(),
        };
        base.install_standard_entries();
        base
    }

    fn install_standard_entries(&mut self) {
        let energy = vec![D::ACCURACY, D::ALL_STATE, D::ALL_PARAMETERS];
        self.push_cache_entry(
            D::POTENTIAL_ENERGY,
            "potential energy".into(),
            energy.clone(),
            cache_rule(|system, context| {
                Ok(Arc::new(system.calc_potential_energy(context)?) as CacheValue)
            }),
        );
        self.push_cache_entry(
            D::KINETIC_ENERGY,
            "kinetic energy".into(),
            energy.clone(),
            cache_rule(|system, context| {
                Ok(Arc::new(system.calc_kinetic_energy(context)?) as CacheValue)
            }),
        );
        self.push_cache_entry(
            D::CONSERVATIVE_POWER,
            "conservative power".into(),
            energy,
            cache_rule(|system, context| {
                Ok(Arc::new(system.calc_conservative_power(context)?) as CacheValue)
            }),
        );
        self.push_cache_entry(
            D::NONCONSERVATIVE_POWER,
            "non-conservative power".into(),
            vec![D::ALL_SOURCES],
            cache_rule(|system, context| {
                Ok(Arc::new(system.calc_non_conservative_power(context)?) as CacheValue)
            }),
        );
        self.push_cache_entry(
            D::XCDOT,
            "time derivatives".into(),
            vec![D::ALL_SOURCES],
            cache_rule(|system, context| {
                let mut derivatives = system.allocate_time_derivatives();
                system.calc_time_derivatives(context, &mut derivatives)?;
                Ok(Arc::new(derivatives) as CacheValue)
            }),
        );
        self.push_cache_entry(
            D::UNIQUE_PERIODIC_DISCRETE_UPDATE,
            "unique periodic discrete update".into(),
            vec![D::ALL_SOURCES],
            cache_rule(|system, context| {
                let mut discrete = system.allocate_discrete_variables();
                system.calc_unique_periodic_discrete_update(context, &mut discrete)?;
                Ok(Arc::new(discrete) as CacheValue)
            }),
        );
    }

    fn push_cache_entry(
        &mut self,
        ticket: DependencyTicket,
        description: String,
        prerequisites: Vec<DependencyTicket>,
        rule: Arc<CacheRule<T>>,
    ) -> CacheIndex {
        let index = CacheIndex::new(self.cache_entries.len());
        self.graph.set_prerequisites(ticket, prerequisites.iter().copied());
        self.cache_entries.push(CacheEntry::new(
            self.id,
            index,
            ticket,
            description,
            prerequisites,
            rule,
        ));
        index
    }

    fn check_tickets(&self, tickets: &[DependencyTicket]) -> FrameworkResult<()> {
        match tickets.iter().find(|t| !self.graph.contains(**t)) {
            Some(&ticket) => Err(FrameworkError::UnknownTicket {
                system: self.label(),
                ticket,
            }),
            None => Ok(()),
        }
    }

    // ---- identity ----

    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Type name without module paths, e.g. `ZeroOrderHold<f64>`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn parent_service(&self) -> Option<&ParentService<T>> {
        self.parent.get()
    }

    pub fn parent_system(&self) -> Option<Arc<dyn System<T>>> {
        self.parent.get().and_then(ParentService::parent)
    }

    pub fn has_parent(&self) -> bool {
        self.parent.get().is_some()
    }

    /// Returns false when a parent was already registered.
    pub(crate) fn set_parent(&self, parent: ParentService<T>) -> bool {
        self.parent.set(parent).is_ok()
    }

    /// `::root::child` style path through the ownership tree.
    pub fn pathname(&self) -> String {
        match self.parent_system() {
            Some(parent) => format!("{}::{}", parent.base().pathname(), self.name),
            None => format!("::{}", self.name),
        }
    }

    /// Type and pathname, used in every error message.
    pub fn label(&self) -> String {
        format!("{} system '{}'", self.type_name, self.pathname())
    }

    // ---- validation ----

    pub fn validate_context(&self, context: &Context<T>) -> FrameworkResult<()> {
        self.validate_created_for(context, "Context")
    }

    /// Check that `item` was allocated by this system.
    pub fn validate_created_for<X: HasSystemId + ?Sized>(
        &self,
        item: &X,
        what: &'static str,
    ) -> FrameworkResult<()> {
        match item.system_id() {
            Some(id) if id == self.id => Ok(()),
            found => Err(FrameworkError::ContextMismatch {
                system: self.label(),
                what,
                expected: self.id,
                found: found.map_or_else(|| "<none>".to_string(), |id| id.to_string()),
            }),
        }
    }

    // ---- state and parameters ----

    /// Zero-initialized continuous state partitioned as (q, v, z).
    pub fn declare_continuous_state(
        &mut self,
        num_q: usize,
        num_v: usize,
        num_z: usize,
    ) -> FrameworkResult<()> {
        self.declare_continuous_state_with(BasicVector::zeros(num_q + num_v + num_z), num_q, num_v, num_z)
    }

    pub fn declare_continuous_state_with(
        &mut self,
        model: BasicVector<T>,
        num_q: usize,
        num_v: usize,
        num_z: usize,
    ) -> FrameworkResult<()> {
        self.model.continuous = ContinuousState::new(model, num_q, num_v, num_z)?;
        Ok(())
    }

    pub fn declare_discrete_state(&mut self, model: impl Into<BasicVector<T>>) -> DiscreteStateIndex {
        let index = DiscreteStateIndex::new(self.model.discrete.len());
        let ticket = self.mint_source_ticket(D::XD);
        self.tickets.discrete.push(ticket);
        self.model.discrete.push(model.into());
        index
    }

    pub fn declare_abstract_state<V>(&mut self, model: V) -> AbstractStateIndex
    where
        V: Clone + fmt::Debug + Send + Sync + 'static,
    {
        let index = AbstractStateIndex::new(self.model.abstract_state.len());
        let ticket = self.mint_source_ticket(D::XA);
        self.tickets.abstract_state.push(ticket);
        self.model.abstract_state.push(Value::boxed(model));
        index
    }

    pub fn declare_numeric_parameter(&mut self, model: impl Into<BasicVector<T>>) -> NumericParameterIndex {
        let index = NumericParameterIndex::new(self.model.numeric_parameters.len());
        let ticket = self.mint_source_ticket(D::PN);
        self.tickets.numeric_parameters.push(ticket);
        self.model.numeric_parameters.push(model.into());
        index
    }

    pub fn declare_abstract_parameter<V>(&mut self, model: V) -> AbstractParameterIndex
    where
        V: Clone + fmt::Debug + Send + Sync + 'static,
    {
        let index = AbstractParameterIndex::new(self.model.abstract_parameters.len());
        let ticket = self.mint_source_ticket(D::PA);
        self.tickets.abstract_parameters.push(ticket);
        self.model.abstract_parameters.push(Value::boxed(model));
        index
    }

    /// New ticket feeding `aggregate`.
    fn mint_source_ticket(&mut self, aggregate: DependencyTicket) -> DependencyTicket {
        let ticket = self.graph.mint([]);
        self.graph.add_prerequisite(aggregate, ticket);
        ticket
    }

    pub fn discrete_state_ticket(&self, index: DiscreteStateIndex) -> Option<DependencyTicket> {
        self.tickets.discrete.get(index.index()).copied()
    }

    pub fn abstract_state_ticket(&self, index: AbstractStateIndex) -> Option<DependencyTicket> {
        self.tickets.abstract_state.get(index.index()).copied()
    }

    pub fn numeric_parameter_ticket(&self, index: NumericParameterIndex) -> Option<DependencyTicket> {
        self.tickets.numeric_parameters.get(index.index()).copied()
    }

    pub fn abstract_parameter_ticket(&self, index: AbstractParameterIndex) -> Option<DependencyTicket> {
        self.tickets.abstract_parameters.get(index.index()).copied()
    }

    pub fn num_own_continuous_states(&self) -> usize {
        self.model.continuous.own_size()
    }

    pub fn num_own_discrete_state_groups(&self) -> usize {
        self.model.discrete.len()
    }

    pub fn num_own_abstract_states(&self) -> usize {
        self.model.abstract_state.len()
    }

    pub fn num_own_numeric_parameter_groups(&self) -> usize {
        self.model.numeric_parameters.len()
    }

    pub fn num_own_abstract_parameters(&self) -> usize {
        self.model.abstract_parameters.len()
    }

    pub(crate) fn tickets(&self) -> &ContextTickets {
        &self.tickets
    }

    pub fn graph(&self) -> &TicketGraph {
        &self.graph
    }

    pub(crate) fn allocate_own_state(&self) -> State<T> {
        State::new(
            self.model.continuous.clone(),
            DiscreteValues::new(self.model.discrete.clone()),
            AbstractValues::new(self.model.abstract_state.clone()),
        )
        .with_system_id(self.id)
    }

    pub(crate) fn allocate_own_parameters(&self) -> Parameters<T> {
        Parameters::new(
            self.model.numeric_parameters.clone(),
            self.model.abstract_parameters.clone(),
        )
        .with_system_id(self.id)
    }

    /// Zeroed derivative storage for this node only.
    pub(crate) fn allocate_own_time_derivatives(&self) -> ContinuousState<T> {
        let mut derivatives = self.model.continuous.clone().with_system_id(self.id);
        derivatives.vector_mut().values_mut().fill(T::zero());
        derivatives
    }

    pub(crate) fn allocate_own_discrete_variables(&self) -> DiscreteValues<T> {
        DiscreteValues::new(self.model.discrete.clone()).with_system_id(self.id)
    }

    /// Copy the declared model values into this node's part of `state`.
    pub fn set_default_state(&self, state: &mut State<T>) -> FrameworkResult<()> {
        state
            .continuous_mut()
            .vector_mut()
            .set_from(self.model.continuous.vector())?;
        for (i, group) in self.model.discrete.iter().enumerate() {
            state.discrete_mut().group_mut(i)?.set_from(group)?;
        }
        for (i, value) in self.model.abstract_state.iter().enumerate() {
            state.abstract_state_mut().value_mut(i)?.set_from(value.as_ref())?;
        }
        Ok(())
    }

    pub fn set_default_parameters(&self, parameters: &mut Parameters<T>) -> FrameworkResult<()> {
        for (i, group) in self.model.numeric_parameters.iter().enumerate() {
            parameters.numeric_mut(i)?.set_from(group)?;
        }
        for (i, value) in self.model.abstract_parameters.iter().enumerate() {
            parameters.abstract_value_mut(i)?.set_from(value.as_ref())?;
        }
        Ok(())
    }

    // ---- ports ----

    pub fn declare_vector_input_port(
        &mut self,
        name: impl Into<String>,
        size: usize,
    ) -> FrameworkResult<InputPortIndex> {
        self.push_input_port(name.into(), InputModel::Vector(size))
    }

    pub fn declare_abstract_input_port<V>(
        &mut self,
        name: impl Into<String>,
        model: V,
    ) -> FrameworkResult<InputPortIndex>
    where
        V: Clone + fmt::Debug + Send + Sync + 'static,
    {
        self.push_input_port(name.into(), InputModel::Abstract(Value::boxed(model)))
    }

    fn push_input_port(&mut self, name: String, model: InputModel) -> FrameworkResult<InputPortIndex> {
        if self.input_ports.iter().any(|p| p.name() == name) {
            return Err(FrameworkError::DuplicatePortName {
                system: self.label(),
                kind: "input",
                name,
            });
        }
        let index = InputPortIndex::new(self.input_ports.len());
        let ticket = self.mint_source_ticket(D::ALL_INPUT_PORTS);
        self.tickets.input_ports.push(ticket);
        let eval = bind_input_eval(move |context: &Context<T>| context.input_value(index));
        self.input_ports.push(InputPort::new(
            self.id,
            index,
            name,
            ticket,
            model,
            Arc::new(eval),
        ));
        Ok(index)
    }

    /// Vector output port backed by a cache entry with `prerequisites`.
    pub fn declare_vector_output_port<F>(
        &mut self,
        name: impl Into<String>,
        size: usize,
        prerequisites: impl IntoIterator<Item = DependencyTicket>,
        calc: F,
    ) -> FrameworkResult<OutputPortIndex>
    where
        F: Fn(&dyn System<T>, &Context<T>, &mut BasicVector<T>) -> FrameworkResult<()>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let port = name.clone();
        let allocator: Arc<OutputAllocator<T>> =
            Arc::new(move || PortValue::Vector(BasicVector::zeros(size)));
        let calc: Arc<OutputCalc<T>> = Arc::new(
            move |system: &dyn System<T>, context: &Context<T>, value: &mut PortValue<T>| {
                match value.as_vector_mut() {
                    Some(vector) => calc(system, context, vector),
                    None => Err(FrameworkError::PortValueType {
                        port: format!("output port '{port}'"),
                        detail: "expected a vector value".into(),
                    }),
                }
            },
        );
        self.push_output_port(
            name,
            PortDataType::Vector,
            Some(size),
            prerequisites.into_iter().collect(),
            allocator,
            calc,
        )
    }

    pub fn declare_abstract_output_port<V, F>(
        &mut self,
        name: impl Into<String>,
        model: V,
        prerequisites: impl IntoIterator<Item = DependencyTicket>,
        calc: F,
    ) -> FrameworkResult<OutputPortIndex>
    where
        V: Clone + fmt::Debug + Send + Sync + 'static,
        F: Fn(&dyn System<T>, &Context<T>, &mut V) -> FrameworkResult<()> + Send + Sync + 'static,
    {
        let allocator: Arc<OutputAllocator<T>> =
            Arc::new(move || PortValue::Abstract(Value::boxed(model.clone())));
        let calc: Arc<OutputCalc<T>> = Arc::new(
            move |system: &dyn System<T>, context: &Context<T>, value: &mut PortValue<T>| {
                match value.as_abstract_mut() {
                    Some(holder) => calc(system, context, holder.get_mut::<V>()?),
                    None => Err(FrameworkError::PortValueType {
                        port: "abstract output port".into(),
                        detail: "expected an abstract value".into(),
                    }),
                }
            },
        );
        self.push_output_port(
            name.into(),
            PortDataType::Abstract,
            None,
            prerequisites.into_iter().collect(),
            allocator,
            calc,
        )
    }

    fn push_output_port(
        &mut self,
        name: String,
        data_type: PortDataType,
        size: Option<usize>,
        prerequisites: Vec<DependencyTicket>,
        allocator: Arc<OutputAllocator<T>>,
        calc: Arc<OutputCalc<T>>,
    ) -> FrameworkResult<OutputPortIndex> {
        if self.output_ports.iter().any(|p| p.name() == name) {
            return Err(FrameworkError::DuplicatePortName {
                system: self.label(),
                kind: "output",
                name,
            });
        }
        self.check_tickets(&prerequisites)?;
        let index = OutputPortIndex::new(self.output_ports.len());
        let entry_alloc = allocator.clone();
        let entry_calc = calc.clone();
        let rule = cache_rule(move |system, context| {
            let mut value = entry_alloc();
            entry_calc(system, context, &mut value)?;
            Ok(Arc::new(value) as CacheValue)
        });
        let ticket = self.graph.mint(prerequisites.iter().copied());
        let cache_index = self.push_cache_entry(
            ticket,
            format!("output port '{name}'"),
            prerequisites.clone(),
            rule,
        );
        let spec = OutputPortSpec {
            name,
            data_type,
            size,
            cache_index,
            ticket,
            prerequisites,
            allocator,
            calc,
        };
        self.output_ports.push(OutputPort::new(self.id, index, spec));
        Ok(index)
    }

    pub fn deprecate_input_port(
        &mut self,
        index: InputPortIndex,
        message: impl Into<String>,
    ) -> FrameworkResult<()> {
        let count = self.input_ports.len();
        let system = self.label();
        let port = self
            .input_ports
            .get_mut(index.index())
            .ok_or(FrameworkError::PortIndexOob {
                system,
                kind: "input",
                index: index.index(),
                count,
            })?;
        port.set_deprecation(message.into());
        Ok(())
    }

    pub fn deprecate_output_port(
        &mut self,
        index: OutputPortIndex,
        message: impl Into<String>,
    ) -> FrameworkResult<()> {
        let count = self.output_ports.len();
        let system = self.label();
        let port = self
            .output_ports
            .get_mut(index.index())
            .ok_or(FrameworkError::PortIndexOob {
                system,
                kind: "output",
                index: index.index(),
                count,
            })?;
        port.set_deprecation(message.into());
        Ok(())
    }

    pub fn input_ports(&self) -> &[InputPort<T>] {
        &self.input_ports
    }

    pub fn output_ports(&self) -> &[OutputPort<T>] {
        &self.output_ports
    }

    /// Pairs whose output ticket is reachable from the input ticket.
    pub fn ticket_feedthroughs(&self) -> Vec<(InputPortIndex, OutputPortIndex)> {
        if self.input_ports.is_empty() || self.output_ports.is_empty() {
            return Vec::new();
        }
        let closure = self.graph.downstream_closure();
        let mut pairs = Vec::new();
        for input in &self.input_ports {
            let reached = &closure[input.ticket().index()];
            for output in &self.output_ports {
                if reached.contains(&output.ticket()) {
                    pairs.push((input.index(), output.index()));
                }
            }
        }
        pairs
    }

    // ---- cache entries ----

    /// Declare a memoized quantity. Returns its index; its ticket may be
    /// used as a prerequisite of later entries and output ports.
    pub fn declare_cache_entry<V, F>(
        &mut self,
        description: impl Into<String>,
        prerequisites: impl IntoIterator<Item = DependencyTicket>,
        calc: F,
    ) -> FrameworkResult<CacheIndex>
    where
        V: Send + Sync + 'static,
        F: Fn(&dyn System<T>, &Context<T>) -> FrameworkResult<V> + Send + Sync + 'static,
    {
        let prerequisites: Vec<DependencyTicket> = prerequisites.into_iter().collect();
        self.check_tickets(&prerequisites)?;
        let ticket = self.graph.mint(prerequisites.iter().copied());
        let rule = cache_rule(move |system, context| Ok(Arc::new(calc(system, context)?) as CacheValue));
        Ok(self.push_cache_entry(ticket, description.into(), prerequisites, rule))
    }

    pub fn cache_entries(&self) -> &[CacheEntry<T>] {
        &self.cache_entries
    }

    pub fn cache_entry(&self, index: CacheIndex) -> Option<&CacheEntry<T>> {
        self.cache_entries.get(index.index())
    }

    /// The entry every system installs for a well-known ticket.
    pub(crate) fn standard_entry(&self, ticket: DependencyTicket) -> FrameworkResult<&CacheEntry<T>> {
        self.cache_entries
            .iter()
            .find(|entry| entry.ticket() == ticket)
            .ok_or_else(|| FrameworkError::UnknownTicket {
                system: self.label(),
                ticket,
            })
    }

    // ---- events ----

    pub fn declare_periodic_event(
        &mut self,
        period: f64,
        offset: f64,
        event: impl Into<AnyEvent<T>>,
    ) -> FrameworkResult<()> {
        let timing = PeriodicEventData::new(period, offset)?;
        self.periodic_events
            .push((timing, event.into().with_periodic_timing(timing)));
        Ok(())
    }

    pub fn declare_per_step_event(&mut self, event: impl Into<AnyEvent<T>>) {
        self.per_step_events
            .push(event.into().with_trigger(TriggerType::PerStep));
    }

    pub fn declare_initialization_event(&mut self, event: impl Into<AnyEvent<T>>) {
        self.initialization_events
            .push(event.into().with_trigger(TriggerType::Initialization));
    }

    pub fn declare_forced_event(&mut self, event: impl Into<AnyEvent<T>>) {
        self.forced_events
            .push(event.into().with_trigger(TriggerType::Forced));
    }

    pub fn periodic_events(&self) -> &[(PeriodicEventData, AnyEvent<T>)] {
        &self.periodic_events
    }

    pub fn per_step_events(&self) -> &[AnyEvent<T>] {
        &self.per_step_events
    }

    pub fn initialization_events(&self) -> &[AnyEvent<T>] {
        &self.initialization_events
    }

    pub fn forced_events(&self) -> &[AnyEvent<T>] {
        &self.forced_events
    }

    pub fn declare_witness_function<F>(
        &mut self,
        description: impl Into<String>,
        direction: WitnessTriggerDirection,
        calc: F,
        event: Option<AnyEvent<T>>,
    ) -> usize
    where
        F: Fn(&Context<T>) -> T + Send + Sync + 'static,
    {
        self.witness_functions.push(WitnessFunction::new(
            self.id,
            description.into(),
            direction,
            Arc::new(calc),
            event,
        ));
        self.witness_functions.len() - 1
    }

    pub fn witness_functions(&self) -> &[WitnessFunction<T>] {
        &self.witness_functions
    }

    // ---- constraints ----

    pub fn add_constraint(&mut self, constraint: SystemConstraint<T>) -> FrameworkResult<ConstraintIndex> {
        if let Some(external) = self.constraints.first_external() {
            return Err(FrameworkError::InternalConstraintAfterExternal {
                system: self.label(),
                internal: constraint.description().to_string(),
                external: external.description().to_string(),
            });
        }
        Ok(ConstraintIndex::new(self.constraints.push_internal(constraint)))
    }

    pub fn add_external_constraint(&mut self, constraint: ExternalSystemConstraint) -> ConstraintIndex {
        ConstraintIndex::new(self.constraints.push_external(constraint))
    }

    pub fn add_external_constraints(
        &mut self,
        constraints: impl IntoIterator<Item = ExternalSystemConstraint>,
    ) {
        for constraint in constraints {
            self.add_external_constraint(constraint);
        }
    }

    pub(crate) fn constraints(&self) -> &ConstraintRegistry<T> {
        &self.constraints
    }

    pub fn external_constraints(&self) -> &[ExternalSystemConstraint] {
        self.constraints.externals()
    }

    // ---- scalar conversion ----

    pub fn converter(&self) -> &SystemScalarConverter {
        &self.converter
    }

    pub fn set_converter(&mut self, converter: SystemScalarConverter) {
        self.converter = converter;
    }
}

impl<T: Scalar> fmt::Debug for SystemBase<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemBase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("input_ports", &self.input_ports.len())
            .field("output_ports", &self.output_ports.len())
            .field("cache_entries", &self.cache_entries.len())
            .field("constraints", &self.constraints.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_type_names_drop_module_paths() {
        assert_eq!(
            nice_type_name("ds_primitives::hold::ZeroOrderHold<f64>"),
            "ZeroOrderHold<f64>"
        );
        assert_eq!(
            nice_type_name("a::Pair<b::X, ds_core::autodiff::AutoDiff>"),
            "Pair<X, AutoDiff>"
        );
    }

    #[test]
    fn standard_entries_come_first() {
        let base = SystemBase::<f64>::new("demo::Plant");
        assert_eq!(base.name(), "Plant");
        let tickets: Vec<_> = base.cache_entries().iter().map(CacheEntry::ticket).collect();
        assert_eq!(
            tickets,
            vec![
                D::POTENTIAL_ENERGY,
                D::KINETIC_ENERGY,
                D::CONSERVATIVE_POWER,
                D::NONCONSERVATIVE_POWER,
                D::XCDOT,
                D::UNIQUE_PERIODIC_DISCRETE_UPDATE,
            ]
        );
        assert!(base.graph().depends_on(D::XCDOT, D::TIME));
        assert!(!base.graph().depends_on(D::POTENTIAL_ENERGY, D::ALL_INPUT_PORTS));
    }

    #[test]
    fn group_tickets_feed_their_aggregates() {
        let mut base = SystemBase::<f64>::new("demo::Plant");
        let xd = base.declare_discrete_state(vec![0.0, 1.0]);
        let pn = base.declare_numeric_parameter(vec![2.0]);
        let u = base.declare_vector_input_port("u", 1).expect("port");
        let xd_ticket = base.discrete_state_ticket(xd).expect("ticket");
        let pn_ticket = base.numeric_parameter_ticket(pn).expect("ticket");
        let u_ticket = base.input_ports()[u.index()].ticket();
        assert!(base.graph().depends_on(D::ALL_STATE, xd_ticket));
        assert!(base.graph().depends_on(D::ALL_PARAMETERS, pn_ticket));
        assert!(base.graph().depends_on(D::ALL_SOURCES, u_ticket));
        assert!(!base.graph().depends_on(D::ALL_SOURCES_EXCEPT_INPUT_PORTS, u_ticket));
    }

    #[test]
    fn duplicate_port_names_are_rejected() {
        let mut base = SystemBase::<f64>::new("demo::Plant");
        base.declare_vector_input_port("u", 1).expect("first");
        let err = base.declare_vector_input_port("u", 2).unwrap_err();
        assert!(matches!(err, FrameworkError::DuplicatePortName { kind: "input", .. }));
    }

    #[test]
    fn cache_entries_reject_unknown_tickets() {
        let mut base = SystemBase::<f64>::new("demo::Plant");
        let bogus = {
            let mut other = TicketGraph::new();
            for _ in 0..50 {
                other.mint([]);
            }
            other.mint([])
        };
        let err = base
            .declare_cache_entry("bad", [bogus], |_, _| Ok(0.0_f64))
            .unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownTicket { .. }));
    }

    #[test]
    fn feedthrough_follows_output_prerequisites() {
        let mut base = SystemBase::<f64>::new("demo::Plant");
        let u = base.declare_vector_input_port("u", 1).expect("port");
        let direct = base
            .declare_vector_output_port("direct", 1, [D::ALL_SOURCES], |_, _, _| Ok(()))
            .expect("port");
        let held = base
            .declare_vector_output_port("held", 1, [D::XD], |_, _, _| Ok(()))
            .expect("port");
        let pairs = base.ticket_feedthroughs();
        assert!(pairs.contains(&(u, direct)));
        assert!(!pairs.contains(&(u, held)));
    }

    #[test]
    fn internal_constraint_after_external_is_rejected() {
        use crate::constraint::ConstraintBounds;
        use nalgebra::DVector;

        let mut base = SystemBase::<f64>::new("demo::Plant");
        base.add_external_constraint(ExternalSystemConstraint::new(
            "ext",
            ConstraintBounds::equality(1),
        ));
        let internal = SystemConstraint::new(
            "int",
            ConstraintBounds::equality(1),
            |_: &dyn System<f64>, _: &Context<f64>| Ok(DVector::from_element(1, 0.0)),
        );
        let err = base.add_constraint(internal).unwrap_err();
        assert!(err.to_string().contains("named int"));
        assert!(err.to_string().contains("named ext"));
    }
}

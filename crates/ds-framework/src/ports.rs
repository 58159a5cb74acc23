//! Input and output ports.

use core::any::type_name;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ds_core::{CacheIndex, HasSystemId, InputPortIndex, OutputPortIndex, Scalar, SystemId};
use ds_values::{AbstractValue, BasicVector, PortValue, Value};
use tracing::warn;

use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::system::System;
use crate::ticket::DependencyTicket;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortDataType {
    Vector,
    Abstract,
}

impl fmt::Display for PortDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDataType::Vector => f.write_str("vector"),
            PortDataType::Abstract => f.write_str("abstract"),
        }
    }
}

/// Evaluator bound to one input port index.
pub type InputEval<T> = dyn for<'a> Fn(&'a Context<T>) -> Option<&'a PortValue<T>> + Send + Sync;

pub(crate) fn bind_input_eval<T, F>(f: F) -> F
where
    T: Scalar,
    F: for<'a> Fn(&'a Context<T>) -> Option<&'a PortValue<T>> + Send + Sync + 'static,
{
    f
}

/// Logs the deprecation message the first time the port is looked up.
#[derive(Debug, Default)]
struct Deprecation {
    message: Option<String>,
    warned: AtomicBool,
}

impl Deprecation {
    fn new(message: Option<String>) -> Self {
        Self {
            message,
            warned: AtomicBool::new(false),
        }
    }

    fn warn_once(&self, port: &str, owner: &str) {
        if let Some(message) = &self.message {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!(port, system = owner, "port is deprecated: {message}");
            }
        }
    }
}

/// Declared value model of an input port, used to type-check fixed values.
#[derive(Clone, Debug)]
pub(crate) enum InputModel {
    Vector(usize),
    Abstract(Box<dyn AbstractValue>),
}

pub struct InputPort<T: Scalar> {
    system_id: SystemId,
    index: InputPortIndex,
    name: String,
    ticket: DependencyTicket,
    model: InputModel,
    deprecation: Deprecation,
    eval: Arc<InputEval<T>>,
}

impl<T: Scalar> InputPort<T> {
    pub(crate) fn new(
        system_id: SystemId,
        index: InputPortIndex,
        name: String,
        ticket: DependencyTicket,
        model: InputModel,
        eval: Arc<InputEval<T>>,
    ) -> Self {
        Self {
            system_id,
            index,
            name,
            ticket,
            model,
            deprecation: Deprecation::default(),
            eval,
        }
    }

    pub fn index(&self) -> InputPortIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.ticket
    }

    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    pub fn data_type(&self) -> PortDataType {
        match self.model {
            InputModel::Vector(_) => PortDataType::Vector,
            InputModel::Abstract(_) => PortDataType::Abstract,
        }
    }

    /// Vector size, `None` for abstract ports.
    pub fn size(&self) -> Option<usize> {
        match self.model {
            InputModel::Vector(n) => Some(n),
            InputModel::Abstract(_) => None,
        }
    }

    pub fn deprecation(&self) -> Option<&str> {
        self.deprecation.message.as_deref()
    }

    pub(crate) fn set_deprecation(&mut self, message: String) {
        self.deprecation = Deprecation::new(Some(message));
    }

    pub(crate) fn warn_if_deprecated(&self, owner: &str) {
        self.deprecation.warn_once(&self.name, owner);
    }

    fn label(&self) -> String {
        format!("input port '{}' of system {}", self.name, self.system_id)
    }

    fn check_context(&self, context: &Context<T>) -> FrameworkResult<()> {
        if context.system_id() != self.system_id {
            return Err(FrameworkError::ContextMismatch {
                system: self.label(),
                what: "Context",
                expected: self.system_id,
                found: context.system_id().to_string(),
            });
        }
        Ok(())
    }

    /// Current value, or `None` when nothing is fixed on the port.
    pub fn eval<'a>(&self, context: &'a Context<T>) -> FrameworkResult<Option<&'a PortValue<T>>> {
        self.check_context(context)?;
        Ok((self.eval)(context))
    }

    pub fn eval_vector<'a>(&self, context: &'a Context<T>) -> FrameworkResult<Option<&'a BasicVector<T>>> {
        match self.eval(context)? {
            None => Ok(None),
            Some(PortValue::Vector(v)) => Ok(Some(v)),
            Some(PortValue::Abstract(v)) => Err(FrameworkError::PortValueType {
                port: self.label(),
                detail: format!("expected a vector value, found {}", v.value_type_name()),
            }),
        }
    }

    pub fn eval_abstract<'a, V: 'static>(&self, context: &'a Context<T>) -> FrameworkResult<Option<&'a V>> {
        match self.eval(context)? {
            None => Ok(None),
            Some(PortValue::Abstract(v)) => Ok(Some(v.get::<V>()?)),
            Some(PortValue::Vector(_)) => Err(FrameworkError::PortValueType {
                port: self.label(),
                detail: format!("expected {}, found a vector value", type_name::<V>()),
            }),
        }
    }

    pub fn has_value(&self, context: &Context<T>) -> FrameworkResult<bool> {
        Ok(self.eval(context)?.is_some())
    }

    /// A fresh value of the declared model: zeros or a copy of the model.
    pub fn allocate_value(&self) -> PortValue<T> {
        match &self.model {
            InputModel::Vector(n) => PortValue::Vector(BasicVector::zeros(*n)),
            InputModel::Abstract(model) => PortValue::Abstract(model.clone()),
        }
    }

    /// Check that `value` matches the port's declared type and size.
    pub fn check_value(&self, value: &PortValue<T>) -> FrameworkResult<()> {
        match (&self.model, value) {
            (InputModel::Vector(n), PortValue::Vector(v)) if v.size() == *n => Ok(()),
            (InputModel::Vector(n), PortValue::Vector(v)) => Err(FrameworkError::PortValueType {
                port: self.label(),
                detail: format!("expected a vector of size {n}, got size {}", v.size()),
            }),
            (InputModel::Abstract(model), PortValue::Abstract(v)) if model.same_type_as(v.as_ref()) => {
                Ok(())
            }
            (InputModel::Abstract(model), PortValue::Abstract(v)) => {
                Err(FrameworkError::PortValueType {
                    port: self.label(),
                    detail: format!(
                        "expected {}, got {}",
                        model.value_type_name(),
                        v.value_type_name()
                    ),
                })
            }
            (InputModel::Vector(_), PortValue::Abstract(v)) => Err(FrameworkError::PortValueType {
                port: self.label(),
                detail: format!("expected a vector value, got {}", v.value_type_name()),
            }),
            (InputModel::Abstract(model), PortValue::Vector(_)) => {
                Err(FrameworkError::PortValueType {
                    port: self.label(),
                    detail: format!("expected {}, got a vector value", model.value_type_name()),
                })
            }
        }
    }

    /// Fix a value on this port in `context`.
    pub fn fix_value(&self, context: &mut Context<T>, value: PortValue<T>) -> FrameworkResult<()> {
        self.check_context(context)?;
        self.check_value(&value)?;
        context.set_input_value(self.index, value);
        Ok(())
    }

    pub fn fix_vector(&self, context: &mut Context<T>, value: impl Into<BasicVector<T>>) -> FrameworkResult<()> {
        self.fix_value(context, PortValue::Vector(value.into()))
    }

    pub fn fix_abstract<V>(&self, context: &mut Context<T>, value: V) -> FrameworkResult<()>
    where
        V: Clone + fmt::Debug + Send + Sync + 'static,
    {
        self.fix_value(context, PortValue::Abstract(Value::boxed(value)))
    }
}

impl<T: Scalar> fmt::Debug for InputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("data_type", &self.data_type())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

pub type OutputAllocator<T> = dyn Fn() -> PortValue<T> + Send + Sync;
pub type OutputCalc<T> =
    dyn Fn(&dyn System<T>, &Context<T>, &mut PortValue<T>) -> FrameworkResult<()> + Send + Sync;

pub struct OutputPort<T: Scalar> {
    system_id: SystemId,
    index: OutputPortIndex,
    name: String,
    data_type: PortDataType,
    size: Option<usize>,
    cache_index: CacheIndex,
    ticket: DependencyTicket,
    prerequisites: Vec<DependencyTicket>,
    allocator: Arc<OutputAllocator<T>>,
    calc: Arc<OutputCalc<T>>,
    deprecation: Deprecation,
}

pub(crate) struct OutputPortSpec<T: Scalar> {
    pub name: String,
    pub data_type: PortDataType,
    pub size: Option<usize>,
    pub cache_index: CacheIndex,
    pub ticket: DependencyTicket,
    pub prerequisites: Vec<DependencyTicket>,
    pub allocator: Arc<OutputAllocator<T>>,
    pub calc: Arc<OutputCalc<T>>,
}

impl<T: Scalar> OutputPort<T> {
    pub(crate) fn new(system_id: SystemId, index: OutputPortIndex, spec: OutputPortSpec<T>) -> Self {
        Self {
            system_id,
            index,
            name: spec.name,
            data_type: spec.data_type,
            size: spec.size,
            cache_index: spec.cache_index,
            ticket: spec.ticket,
            prerequisites: spec.prerequisites,
            allocator: spec.allocator,
            calc: spec.calc,
            deprecation: Deprecation::default(),
        }
    }

    pub fn index(&self) -> OutputPortIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> PortDataType {
        self.data_type
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Cache entry memoizing this port's value.
    pub fn cache_index(&self) -> CacheIndex {
        self.cache_index
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.ticket
    }

    pub fn prerequisites(&self) -> &[DependencyTicket] {
        &self.prerequisites
    }

    pub fn deprecation(&self) -> Option<&str> {
        self.deprecation.message.as_deref()
    }

    pub(crate) fn set_deprecation(&mut self, message: String) {
        self.deprecation = Deprecation::new(Some(message));
    }

    pub(crate) fn warn_if_deprecated(&self, owner: &str) {
        self.deprecation.warn_once(&self.name, owner);
    }

    pub fn allocate(&self) -> PortValue<T> {
        (self.allocator)()
    }

    /// Compute the port value into `value` without touching the cache.
    pub fn calc(
        &self,
        system: &dyn System<T>,
        context: &Context<T>,
        value: &mut PortValue<T>,
    ) -> FrameworkResult<()> {
        if context.system_id() != self.system_id {
            return Err(FrameworkError::ContextMismatch {
                system: format!("output port '{}' of system {}", self.name, self.system_id),
                what: "Context",
                expected: self.system_id,
                found: context.system_id().to_string(),
            });
        }
        let kind_ok = match self.data_type {
            PortDataType::Vector => value.is_vector(),
            PortDataType::Abstract => !value.is_vector(),
        };
        if !kind_ok {
            return Err(FrameworkError::PortValueType {
                port: format!("output port '{}'", self.name),
                detail: format!("expected a {} value", self.data_type),
            });
        }
        (self.calc)(system, context, value)
    }
}

impl<T: Scalar> fmt::Debug for OutputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("size", &self.size)
            .field("prerequisites", &self.prerequisites)
            .finish_non_exhaustive()
    }
}

/// One value per output port of a system.
#[derive(Clone, Debug)]
pub struct SystemOutput<T: Scalar> {
    system_id: SystemId,
    values: Vec<PortValue<T>>,
}

impl<T: Scalar> SystemOutput<T> {
    pub(crate) fn new(system_id: SystemId, values: Vec<PortValue<T>>) -> Self {
        Self { system_id, values }
    }

    pub fn num_ports(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: OutputPortIndex) -> Option<&PortValue<T>> {
        self.values.get(index.index())
    }

    pub fn get_mut(&mut self, index: OutputPortIndex) -> Option<&mut PortValue<T>> {
        self.values.get_mut(index.index())
    }

    pub fn vector(&self, index: OutputPortIndex) -> Option<&BasicVector<T>> {
        self.get(index).and_then(PortValue::as_vector)
    }
}

impl<T: Scalar> HasSystemId for SystemOutput<T> {
    fn system_id(&self) -> Option<SystemId> {
        Some(self.system_id)
    }
}

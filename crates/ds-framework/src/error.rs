//! Error types for the execution kernel.
//!
//! Every variant that concerns a particular system carries a `system` label of
//! the form `<type> system '<pathname>'`.

use ds_core::{CoreError, ScalarKind, SystemId};
use ds_values::ValueError;
use thiserror::Error;

use crate::ticket::DependencyTicket;

pub type FrameworkResult<T> = Result<T, FrameworkError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameworkError {
    #[error("{what} was not created for {system} (expected {expected}, found {found})")]
    ContextMismatch {
        system: String,
        what: &'static str,
        expected: SystemId,
        found: String,
    },

    #[error("State variable dimensions cannot be changed in {operation}() on {system} (before: {before}; after: {after})")]
    ShapeChanged {
        system: String,
        operation: &'static str,
        before: String,
        after: String,
    },

    #[error("{system}: {kind} port index {index} is out of range; there are only {count} {kind} ports")]
    PortIndexOob {
        system: String,
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("System {system} does not have an {kind} port named {name} (valid port names: {valid})")]
    PortNameNotFound {
        system: String,
        kind: &'static str,
        name: String,
        valid: String,
    },

    #[error("System {system} already has an {kind} port named {name}")]
    DuplicatePortName {
        system: String,
        kind: &'static str,
        name: String,
    },

    #[error("System {system} does not have any {kind}s")]
    NoPorts { system: String, kind: &'static str },

    #[error(
        "System {system} has {count} {kind}s, so this convenience function cannot be used; instead, use another overload e.g. get_{kind}(index) or get_{kind}_by_name(name)"
    )]
    TooManyPorts {
        system: String,
        kind: &'static str,
        count: usize,
    },

    #[error("Wrong value for {port}: {detail}")]
    PortValueType { port: String, detail: String },

    #[error("Constraint index {index} is out of range. There are only {count} constraints.")]
    ConstraintIndexOob { index: usize, count: usize },

    #[error(
        "{system} cannot add an internal constraint (named {internal}) after an external constraint (named {external}) has already been added"
    )]
    InternalConstraintAfterExternal {
        system: String,
        internal: String,
        external: String,
    },

    #[error("Constraint '{description}' produced {actual} values but its bounds have size {expected}")]
    ConstraintSize {
        description: String,
        expected: usize,
        actual: usize,
    },

    #[error("{system} does not support scalar conversion to {target}")]
    ConversionUnsupported { system: String, target: ScalarKind },

    #[error("System::clone_system(): {system} does not support cloning")]
    CloningUnsupported { system: String },

    #[error("{system}: next update time is NaN")]
    NanNextUpdateTime { system: String },

    #[error("{system}: next update time {time} is finite but no events were scheduled")]
    UnscheduledNextUpdate { system: String, time: f64 },

    #[error("{subsystem} is not contained in {system}")]
    SubsystemNotContained { subsystem: String, system: String },

    #[error("{system}: the supplied context is not a root context")]
    NotRootContext { system: String },

    #[error("Context::{operation}() is only allowed on a root context; context of system {context} is a subcontext")]
    RootContextOnly {
        operation: &'static str,
        context: String,
    },

    #[error("{system}: {detail}")]
    NoUniquePeriodicUpdate { system: String, detail: &'static str },

    #[error("{operation}() on {system} failed: {message}")]
    EventHandlerFailed {
        operation: &'static str,
        system: String,
        message: String,
    },

    #[error("{system} must override {hook}")]
    MissingOverride { system: String, hook: &'static str },

    #[error("{system}: {what} has no entry for child {index}")]
    TreeMismatch {
        system: String,
        what: &'static str,
        index: usize,
    },

    #[error("Cache entry '{description}' does not hold a value of type {expected}")]
    CacheValueType {
        description: String,
        expected: &'static str,
    },

    #[error("{system}: unknown dependency ticket {ticket}")]
    UnknownTicket {
        system: String,
        ticket: DependencyTicket,
    },

    #[error("{system} already belongs to {parent}")]
    AlreadyOwned { system: String, parent: String },

    #[error("Events dispatched out of order: {operation} requires phase {expected}, current phase is {actual}")]
    EventPhase {
        operation: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

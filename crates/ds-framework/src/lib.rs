//! ds-framework: the hybrid-system execution kernel.
//!
//! Provides:
//! - `System` (per-node hooks) and `SystemBase` (declarations every node carries)
//! - `Context` (time, state, parameters, fixed inputs and the memo cache)
//! - dependency tickets and the invalidation-tracked `DependencyCache`
//! - events, event collections and dispatch in the order unrestricted,
//!   discrete, publish
//! - input/output ports, constraints and witness functions
//! - scalar conversion and cloning across f64, AutoDiff and Expression
//! - `Diagram`, a composite of child systems
//!
//! Model authors implement `System` for their type and declare everything in
//! the constructor. Callers use the validated methods on `dyn System<T>`.

pub mod base;
pub mod cache;
pub mod collection;
pub mod constraint;
pub mod context;
pub mod conversion;
pub mod converter;
pub mod diagram;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod options;
pub mod ports;
pub mod scheduler;
pub mod status;
pub mod system;
pub mod ticket;
pub mod witness;

pub use base::SystemBase;
pub use cache::{CacheEntry, CacheValue, DependencyCache};
pub use collection::{CompositeEventCollection, EventCollection};
pub use constraint::{
    ConstraintBounds, ConstraintOrigin, ConstraintType, ExternalSystemConstraint, SystemConstraint,
};
pub use context::Context;
pub use converter::{SystemFamily, SystemScalarConverter};
pub use diagram::{Diagram, DiagramBuilder, DiagramFamily};
pub use error::{FrameworkError, FrameworkResult};
pub use event::{
    AnyEvent, DiscreteUpdateEvent, EventKind, PeriodicEventData, PublishEvent, TriggerType,
    UnrestrictedUpdateEvent,
};
pub use options::ContextConfig;
pub use ports::{InputPort, OutputPort, PortDataType, SystemOutput};
pub use scheduler::{EventDispatch, EventPhase};
pub use status::{EventStatus, Severity};
pub use system::{ParentService, System, share, share_boxed};
pub use ticket::{DependencyTicket, TicketGraph};
pub use witness::{WitnessFunction, WitnessTriggerDirection};

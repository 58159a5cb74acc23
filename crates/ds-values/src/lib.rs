//! ds-values: value containers carried by contexts.
//!
//! Provides:
//! - `BasicVector` (numeric vector over any `Scalar`)
//! - `AbstractValue` / `Value` (type-erased, clonable values)
//! - state containers (`ContinuousState`, `DiscreteValues`, `AbstractValues`, `State`)
//! - `Parameters` and `PortValue`
//!
//! Every container is tree-shaped so that a composite system's view is the
//! ordered union of its children's.

pub mod abstract_value;
pub mod basic_vector;
pub mod error;
pub mod parameters;
pub mod port_value;
pub mod state;

pub use abstract_value::{AbstractValue, Value};
pub use basic_vector::BasicVector;
pub use error::{ValueError, ValueResult};
pub use parameters::Parameters;
pub use port_value::PortValue;
pub use state::{AbstractValues, ContinuousState, DiscreteValues, State, StateShape};

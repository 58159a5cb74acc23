//! Concrete leaf systems built on the dynsys kernel.
//!
//! Provides:
//! - `ConstantVectorSource`: a parameter-backed constant output
//! - `ZeroOrderHold`: periodic sample-and-hold of a vector input
//! - `DiscretePiController`: sampled PI control with output clamping and anti-windup
//! - `FirstOrderLag`: rate-limited first-order actuator with position limits
//! - `RotatingShaft`: damped torsional oscillator with energy accounting
//!
//! Configuration is plain `f64`; the systems themselves are generic over
//! the scalar type and convert between f64, AutoDiff and (where every
//! operation is decidable) Expression.

pub mod constant_source;
pub mod error;
pub mod first_order_lag;
pub mod pi_controller;
pub mod shaft;
pub mod zero_order_hold;

pub use constant_source::ConstantVectorSource;
pub use error::{PrimitiveError, PrimitiveResult};
pub use first_order_lag::{FirstOrderLag, FirstOrderLagConfig};
pub use pi_controller::{DiscretePiController, PiConfig};
pub use shaft::{RotatingShaft, ShaftConfig};
pub use zero_order_hold::ZeroOrderHold;

use ds_core::{CoreError, Scalar};
use ds_framework::FrameworkResult;
use ds_values::BasicVector;

/// Element `index` of `vector`, or an index error naming `what`.
pub(crate) fn element<T: Scalar>(
    vector: &BasicVector<T>,
    index: usize,
    what: &'static str,
) -> FrameworkResult<T> {
    vector.get(index).cloned().ok_or_else(|| {
        CoreError::IndexOob {
            what,
            index,
            len: vector.size(),
        }
        .into()
    })
}

//! ds-core: stable foundation for dynsys.
//!
//! Contains:
//! - ids (system identity tokens + compact typed indices)
//! - scalar (the `Scalar` abstraction and its three representations)
//! - error (shared error types)

pub mod autodiff;
pub mod error;
pub mod ids;
pub mod scalar;
pub mod symbolic;

// Re-exports: nice ergonomics for downstream crates
pub use autodiff::AutoDiff;
pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use scalar::*;
pub use symbolic::Expression;

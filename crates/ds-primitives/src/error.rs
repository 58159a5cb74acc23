//! Error types for the primitive systems.

use ds_framework::FrameworkError;
use thiserror::Error;

pub type PrimitiveResult<T> = Result<T, PrimitiveError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrimitiveError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error(transparent)]
    Framework(#[from] FrameworkError),
}

use thiserror::Error;

use crate::scalar::ScalarKind;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Index out of bounds: {what} (index={index}, len={len})")]
    IndexOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Cannot extract a numeric value for {what} from a non-constant {kind} scalar")]
    NotExtractable { what: &'static str, kind: ScalarKind },

    #[error("Symbolic variable '{name}' has no value in the environment")]
    UnboundVariable { name: String },
}

use thiserror::Error;

pub type ValueResult<T> = Result<T, ValueError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("Size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Index out of bounds: {what} (index={index}, len={len})")]
    IndexOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Type mismatch: expected a value of type {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Structure mismatch in {what}: {detail}")]
    StructureMismatch { what: &'static str, detail: String },
}
